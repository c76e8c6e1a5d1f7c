//! Command-line entry point for the AMI runtime: `manager`, `worker`,
//! `collector`, and the `local` convenience launcher (spec.md §6).

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use ami_logging::LogLevel;
use ami_types::Color;

mod collector_cmd;
mod local_cmd;
mod manager_cmd;
mod net;
mod source_spec;
mod worker_cmd;

#[derive(Parser)]
#[command(name = "ami", about = "Distributed live-analysis monitoring runtime")]
struct Cli {
    #[arg(long, default_value = "127.0.0.1", global = true)]
    host: String,
    #[arg(long, default_value = "info", global = true)]
    log_level: LogLevel,
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// The control plane: authoritative graph table, client commands, result ingestion.
    Manager {
        #[arg(long)]
        num_workers: usize,
        #[arg(long)]
        num_nodes: usize,
        #[arg(long)]
        client_port: u16,
        #[arg(long)]
        node_port: u16,
    },
    /// One worker process: runs a source and forwards datagrams to a local collector.
    Worker {
        #[arg(long)]
        node_num: u64,
        #[arg(long)]
        num_workers: usize,
        /// Needed because `compile(W, L, version)` is parameterized by
        /// both dimensions even though only one worker tier is executed
        /// here (spec.md §4.1).
        #[arg(long)]
        num_local_collectors: usize,
        #[arg(long, default_value_t = 100)]
        heartbeat: u64,
        #[arg(long)]
        graph_file: Option<PathBuf>,
        #[arg(long)]
        collector_host: String,
        #[arg(long)]
        collector_port: u16,
        /// `scheme://fields`, e.g. `static://a:scalar` or `random://a:scalar:0:1`.
        source: String,
    },
    /// A local or global collector tier.
    Collector {
        #[arg(long)]
        node_num: u64,
        #[arg(long)]
        num_workers: usize,
        #[arg(long)]
        num_local_collectors: usize,
        #[arg(long)]
        num_contribs: usize,
        #[arg(long, default_value_t = 10)]
        depth: usize,
        #[arg(long)]
        port: u16,
        #[arg(long)]
        graph_file: Option<PathBuf>,
        /// Runs the global tier instead of a local collector.
        #[arg(long)]
        global: bool,
        #[arg(long)]
        downstream_host: Option<String>,
        #[arg(long)]
        downstream_port: Option<u16>,
    },
    /// Spawns one manager, one global collector, one local collector per
    /// node, and a worker per (node, worker) pair as child processes.
    Local {
        #[arg(long, default_value_t = 2)]
        num_workers: usize,
        #[arg(long, default_value_t = 1)]
        num_nodes: usize,
        #[arg(long, default_value_t = 100)]
        heartbeat: u64,
        source: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = ami_logging::init(cli.log_level, cli.log_file.clone());

    match cli.command {
        Command::Manager { num_workers, num_nodes, client_port, node_port } => {
            manager_cmd::run(&cli.host, num_workers, num_nodes, client_port, node_port)
        }
        Command::Worker { node_num, num_workers, num_local_collectors, heartbeat, graph_file, collector_host, collector_port, source } => {
            worker_cmd::run(node_num, num_workers, num_local_collectors, heartbeat, &source, graph_file, &collector_host, collector_port)
        }
        Command::Collector { node_num, num_workers, num_local_collectors, num_contribs, depth, port, graph_file, global, downstream_host, downstream_port } => {
            let color = if global { Color::GlobalCollector } else { Color::LocalCollector };
            let downstream = match (downstream_host, downstream_port) {
                (Some(host), Some(port)) => Some((host, port)),
                _ => None,
            };
            collector_cmd::run(color, node_num, num_workers, num_local_collectors, num_contribs, depth, &cli.host, port, graph_file, downstream)
        }
        Command::Local { num_workers, num_nodes, heartbeat, source } => {
            local_cmd::run(&cli.host, num_workers, num_nodes, heartbeat, &source, None)
        }
    }
}
