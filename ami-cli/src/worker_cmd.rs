//! `ami worker`: runs one worker's event loop and forwards its datagrams to
//! the local collector it is paired with over a point-to-point TCP link.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

use ami_codec::Channel;
use ami_fabric::TcpEndpoint;
use ami_runtime::{ControlMessage, Worker};
use ami_types::Operation;

use crate::net::Link;
use crate::source_spec;

#[allow(clippy::too_many_arguments)]
pub fn run(
    node_num: u64,
    num_workers: usize,
    num_local_collectors: usize,
    heartbeat: u64,
    source_spec_str: &str,
    graph_file: Option<PathBuf>,
    collector_host: &str,
    collector_port: u16,
) -> Result<()> {
    let source = source_spec::parse(source_spec_str)?;
    let mut worker = Worker::new(node_num, num_workers, num_local_collectors, heartbeat, "default", source);

    if let Some(path) = graph_file {
        let bytes = std::fs::read(&path).with_context(|| format!("reading graph file {}", path.display()))?;
        let ops: Vec<Operation> = ami_codec::decode(&bytes)?;
        worker.apply_control(ControlMessage::Graph { version: 1, ops }).context("installing initial graph")?;
    }

    let endpoint = TcpEndpoint::connect((collector_host, collector_port))
        .with_context(|| format!("connecting to local collector at {collector_host}:{collector_port}"))?;
    let link = Link::new(endpoint, node_num);

    info!(node_num, "worker started");
    let mut forwarded = 0u64;
    while let Some(step) = worker.step() {
        if let Some(datagram) = step.datagram {
            link.send(Channel::CollectorIn, "datagram", &datagram)?;
            forwarded += 1;
        }
    }
    info!(forwarded, "worker exhausted its source, exiting");
    Ok(())
}
