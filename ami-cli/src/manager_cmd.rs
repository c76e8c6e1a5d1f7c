//! `ami manager`: the control plane. One thread serves client-comm
//! request/reply connections; a second receives finalized results from the
//! global collector over the node-message channel. Both share one
//! `Manager` behind a mutex — a concession to not pulling in an async
//! runtime for what spec.md models as two distinct logical tasks on one
//! process.

use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{Context, Result};
use tracing::{info, warn};

use ami_fabric::TcpEndpoint;
use ami_runtime::{ClientCommand, Manager};
use ami_types::CollectorMessage;

use crate::net::Link;

pub fn run(host: &str, num_workers: usize, num_nodes: usize, client_port: u16, node_port: u16) -> Result<()> {
    let manager = Arc::new(Mutex::new(Manager::new(num_workers, num_nodes)));

    let client_manager = Arc::clone(&manager);
    let client_host = host.to_string();
    let client_thread = thread::spawn(move || serve_client_comm(&client_host, client_port, client_manager));

    let node_manager = Arc::clone(&manager);
    let node_host = host.to_string();
    let node_thread = thread::spawn(move || serve_node_messages(&node_host, node_port, node_manager));

    client_thread.join().expect("client-comm thread panicked")?;
    node_thread.join().expect("node-message thread panicked")?;
    Ok(())
}

fn serve_client_comm(host: &str, port: u16, manager: Arc<Mutex<Manager>>) -> Result<()> {
    let listener = TcpListener::bind((host, port)).with_context(|| format!("binding client-comm on {host}:{port}"))?;
    info!(host, port, "manager listening for client commands");
    for stream in listener.incoming() {
        let stream = stream?;
        let link = Link::new(TcpEndpoint::from_stream(stream)?, 0);
        let cmd: ClientCommand = match link.recv() {
            Ok(cmd) => cmd,
            Err(err) => {
                warn!(%err, "dropping an unreadable client request");
                continue;
            }
        };
        let reply = manager.lock().expect("manager mutex poisoned").handle(cmd);
        link.send(ami_codec::Channel::ClientComm, "reply", &reply)?;
    }
    Ok(())
}

fn serve_node_messages(host: &str, port: u16, manager: Arc<Mutex<Manager>>) -> Result<()> {
    let listener = TcpListener::bind((host, port)).with_context(|| format!("binding node-message on {host}:{port}"))?;
    info!(host, port, "manager listening for collector results");
    for stream in listener.incoming() {
        let stream = stream?;
        let link = Link::new(TcpEndpoint::from_stream(stream)?, 0);
        loop {
            let msg: CollectorMessage = match link.recv() {
                Ok(msg) => msg,
                Err(_) => break,
            };
            if let ami_types::MsgKind::Datagram(payload) = msg.message.kind {
                let mut manager = manager.lock().expect("manager mutex poisoned");
                if let Err(err) = manager.ingest_result(&msg.graph_name, msg.version, msg.heartbeat, payload) {
                    warn!(%err, "failed to ingest a collector result");
                }
            }
        }
    }
    Ok(())
}
