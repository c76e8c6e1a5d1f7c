//! `ami collector`: a local or global collector tier. Accepts one
//! connection per expected contributor, fans their datagrams in, and
//! forwards completed results downstream (or logs them, for a global
//! collector run standalone without a manager to talk to).

use std::net::TcpListener;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

use ami_codec::Channel;
use ami_fabric::TcpEndpoint;
use ami_graph::Graph;
use ami_runtime::Collector;
use ami_types::{CollectorMessage, Color, Operation};

use crate::net::Link;

#[allow(clippy::too_many_arguments)]
pub fn run(
    color: Color,
    node_num: u64,
    num_workers: usize,
    num_local_collectors: usize,
    num_contribs: usize,
    depth: usize,
    listen_host: &str,
    listen_port: u16,
    graph_file: Option<PathBuf>,
    downstream: Option<(String, u16)>,
) -> Result<()> {
    let mut collector = Collector::new(color, "default", depth, num_contribs);

    if let Some(path) = graph_file {
        let bytes = std::fs::read(&path).with_context(|| format!("reading graph file {}", path.display()))?;
        let ops: Vec<Operation> = ami_codec::decode(&bytes)?;
        let mut graph = Graph::new("default");
        graph.add(ops)?;
        let compiled = graph.compile(num_workers, num_local_collectors, 1)?;
        collector.install(&compiled, num_contribs);
    }

    let listener = TcpListener::bind((listen_host, listen_port))
        .with_context(|| format!("binding collector-in on {listen_host}:{listen_port}"))?;
    info!(node_num, num_contribs, "collector listening for contributors");
    let mut upstream = Vec::with_capacity(num_contribs);
    for _ in 0..num_contribs {
        let (stream, peer) = listener.accept()?;
        info!(%peer, "contributor connected");
        upstream.push(Link::new(TcpEndpoint::from_stream(stream)?, node_num));
    }

    let downstream_link = match downstream {
        Some((host, port)) => {
            let endpoint = TcpEndpoint::connect((host.as_str(), port)).with_context(|| format!("connecting downstream to {host}:{port}"))?;
            Some(Link::new(endpoint, node_num))
        }
        None => None,
    };

    let mut live: Vec<bool> = vec![true; upstream.len()];
    while live.iter().any(|alive| *alive) {
        for (i, link) in upstream.iter().enumerate() {
            if !live[i] {
                continue;
            }
            match link.try_recv::<CollectorMessage>() {
                Ok(Some(msg)) => {
                    if let Some(forwarded) = collector.ingest(msg)? {
                        match &downstream_link {
                            Some(link) => link.send(Channel::CollectorIn, "datagram", &forwarded)?,
                            None => info!(kind = ?forwarded.message.kind, "collector result (no downstream configured)"),
                        }
                    }
                }
                Ok(None) => {}
                Err(_) => live[i] = false,
            }
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    info!("every contributor disconnected, collector exiting");
    Ok(())
}
