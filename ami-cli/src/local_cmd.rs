//! `ami local`: spawns a manager, a global collector, one local collector
//! per node, and one worker per (node, worker) pair as child processes,
//! wired together over loopback TCP with ports allocated from a fixed base
//! (spec.md §6 names Unix IPC sockets under a temp dir; this workspace's
//! fabric only speaks TCP/in-process channels, so loopback TCP stands in).
//! Worker children are watched by a [`Supervisor`] so a killed worker is
//! restarted in place, matching spec.md §8 scenario 3.

use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use ami_runtime::{ChildStatus, RuntimeError, Supervised, Supervisor};

const BASE_PORT: u16 = 27000;

struct ChildProcess {
    child: Child,
    respawn: Box<dyn Fn() -> std::io::Result<Child> + Send>,
    /// Latches once the child has exited with a zero status, so a worker
    /// that simply ran out of events is never mistaken for a crash.
    done: bool,
}

impl ChildProcess {
    fn leaf(child: Child) -> Self {
        ChildProcess { child, respawn: Box::new(|| -> std::io::Result<Child> { Err(std::io::Error::other("not respawnable")) }), done: false }
    }
}

impl Supervised for ChildProcess {
    fn is_alive(&mut self) -> bool {
        if self.done {
            return true;
        }
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                self.done = status.success();
                self.done
            }
            Err(_) => false,
        }
    }

    fn restart(&mut self) -> Result<(), RuntimeError> {
        self.child = (self.respawn)().map_err(|e| RuntimeError::Rejected(e.to_string()))?;
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
pub fn run(host: &str, num_workers: usize, num_nodes: usize, heartbeat: u64, source_spec: &str, log_dir: Option<PathBuf>) -> Result<()> {
    let log_dir = log_dir.unwrap_or_else(std::env::temp_dir).join(format!("ami-local-{}", std::process::id()));
    std::fs::create_dir_all(&log_dir).with_context(|| format!("creating log directory {}", log_dir.display()))?;
    info!(dir = %log_dir.display(), "local launcher using this directory for child logs");

    let self_exe = std::env::current_exe().context("locating the ami binary to re-exec for children")?;
    let client_port = BASE_PORT;
    let node_port = BASE_PORT + 1;
    let global_port = BASE_PORT + 2;
    let local_base = BASE_PORT + 10;
    let workers_per_node = (num_workers / num_nodes.max(1)).max(1);

    let manager = spawn(&self_exe, &log_dir, "manager", |cmd| {
        cmd.args([
            "manager",
            "--host",
            host,
            "--num-workers",
            &num_workers.to_string(),
            "--num-nodes",
            &num_nodes.to_string(),
            "--client-port",
            &client_port.to_string(),
            "--node-port",
            &node_port.to_string(),
        ]);
    })?;
    let mut children = vec![manager];

    let global_collector = spawn(&self_exe, &log_dir, "global-collector", |cmd| {
        cmd.args([
            "collector",
            "--host",
            host,
            "--global",
            "--node-num",
            "0",
            "--num-workers",
            &num_workers.to_string(),
            "--num-local-collectors",
            &num_nodes.to_string(),
            "--num-contribs",
            &num_nodes.to_string(),
            "--port",
            &global_port.to_string(),
            "--downstream-host",
            host,
            "--downstream-port",
            &node_port.to_string(),
        ]);
    })?;
    children.push(global_collector);

    let mut supervised_workers = Vec::new();
    for node in 0..num_nodes {
        let local_port = local_base + node as u16;
        let node_id = node as u64;
        let host_owned = host.to_string();
        let local_collector = spawn(&self_exe, &log_dir, &format!("local-collector-{node_id}"), move |cmd| {
            cmd.args([
                "collector",
                "--host",
                &host_owned,
                "--node-num",
                &node_id.to_string(),
                "--num-workers",
                &num_workers.to_string(),
                "--num-local-collectors",
                &num_nodes.to_string(),
                "--num-contribs",
                &workers_per_node.to_string(),
                "--port",
                &local_port.to_string(),
                "--downstream-host",
                host,
                "--downstream-port",
                &global_port.to_string(),
            ]);
        })?;
        children.push(local_collector);

        for w in 0..workers_per_node {
            let identity = node_id * (workers_per_node as u64) + w as u64;
            let source_spec = source_spec.to_string();
            let host_owned = host.to_string();
            let self_exe_owned = self_exe.clone();
            let log_dir_owned = log_dir.clone();
            let make_child = move || -> std::io::Result<Child> {
                let mut cmd = Command::new(&self_exe_owned);
                cmd.args([
                    "worker",
                    "--host",
                    &host_owned,
                    "--node-num",
                    &identity.to_string(),
                    "--num-workers",
                    &num_workers.to_string(),
                    "--num-local-collectors",
                    &num_nodes.to_string(),
                    "--heartbeat",
                    &heartbeat.to_string(),
                    "--collector-host",
                    &host_owned,
                    "--collector-port",
                    &local_port.to_string(),
                    &source_spec,
                ]);
                attach_log(&mut cmd, &log_dir_owned, &format!("worker-{identity}"))?;
                cmd.spawn()
            };
            let child = make_child().with_context(|| format!("spawning worker-{identity}"))?;
            supervised_workers
                .push(Supervisor::new(format!("worker-{identity}"), ChildProcess { child, respawn: Box::new(make_child), done: false }));
        }
    }

    loop {
        let mut pending = false;
        for supervisor in supervised_workers.iter_mut() {
            if supervisor.child().done || supervisor.status() == ChildStatus::PermanentlyFailed {
                continue;
            }
            pending = true;
            if let Err(err) = supervisor.tick() {
                warn!(%err, "worker permanently failed after its restart budget");
            }
        }
        if !pending {
            break;
        }
        std::thread::sleep(Duration::from_millis(250));
    }

    for mut proc in children {
        let _ = proc.child.kill();
        let _ = proc.child.wait();
    }
    Ok(())
}

fn spawn(self_exe: &std::path::Path, log_dir: &std::path::Path, label: &str, configure: impl FnOnce(&mut Command)) -> Result<ChildProcess> {
    let mut cmd = Command::new(self_exe);
    configure(&mut cmd);
    attach_log(&mut cmd, log_dir, label)?;
    let child = cmd.spawn().with_context(|| format!("spawning {label}"))?;
    Ok(ChildProcess::leaf(child))
}

fn attach_log(cmd: &mut Command, log_dir: &std::path::Path, label: &str) -> std::io::Result<()> {
    let log_path = log_dir.join(format!("{label}.log"));
    let file = std::fs::File::create(log_path)?;
    cmd.stdout(file.try_clone()?);
    cmd.stderr(file);
    Ok(())
}
