//! The dispatch fabric broker.
//!
//! Two unix-socket endpoints: the frontend takes one framed request per
//! gateway connection, the backend holds one persistent connection per
//! worker. A worker announces itself with an identity frame
//! (`Worker-<pid>`) followed by `READY`; requests go to idle workers in
//! registration order; with no idle worker the client is told to try again
//! (503) rather than queued. `SIGCHLD` is the sole worker-failure signal:
//! the dead worker leaves the table, its client (if any) receives one
//! synthesized 500, and a replacement process is spawned.

mod table;

pub use table::DispatchTable;

use crate::error::{busy_reply, worker_died_reply};
use crate::framing::{read_frame, write_frame};
use serde_json::json;
use std::collections::HashMap;
use std::io::Write;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

pub const DEFAULT_FRONTEND_URL: &str = "ipc://@frontend.ipc";
pub const DEFAULT_BACKEND_URL: &str = "ipc://@backend.ipc";

/// Map an `ipc://` url onto a filesystem socket path. Abstract-namespace
/// names (`@name`) land in the temp directory.
pub fn socket_path(url: &str) -> PathBuf {
    let rest = url.strip_prefix("ipc://").unwrap_or(url);
    if let Some(name) = rest.strip_prefix('@') {
        std::env::temp_dir().join(format!("laf-{name}"))
    } else {
        PathBuf::from(rest)
    }
}

/// Reply channel for one waiting gateway client.
type ReplySlot = mpsc::Sender<Vec<u8>>;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub basedir: PathBuf,
    pub deployment: String,
    pub frontend_url: String,
    pub backend_url: String,
    pub workers: usize,
    /// Alternative worker binary; the bundled `laf-worker` otherwise.
    pub worker_bin: Option<String>,
    pub notify_sock: Option<String>,
    pub journal_sock: Option<String>,
}

pub struct Broker {
    config: BrokerConfig,
    table: Arc<Mutex<DispatchTable<ReplySlot>>>,
    writers: Arc<Mutex<HashMap<String, UnixStream>>>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Broker {
        Broker {
            config,
            table: Arc::new(Mutex::new(DispatchTable::new())),
            writers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run the broker: bind both endpoints, start the pool, serve forever.
    pub fn run(&self) -> anyhow::Result<()> {
        if let Some(sock) = &self.config.notify_sock {
            std::env::set_var("NOTIFICATION_SOCK", sock);
        }
        if let Some(sock) = &self.config.journal_sock {
            std::env::set_var("JOURNAL_SOCK", sock);
        }

        let backend_path = socket_path(&self.config.backend_url);
        let frontend_path = socket_path(&self.config.frontend_url);
        let _ = std::fs::remove_file(&backend_path);
        let _ = std::fs::remove_file(&frontend_path);
        let backend = UnixListener::bind(&backend_path)?;
        let frontend = UnixListener::bind(&frontend_path)?;
        info!(
            frontend = %frontend_path.display(),
            backend = %backend_path.display(),
            workers = self.config.workers,
            "broker listening"
        );

        self.install_sigchld_handler()?;

        {
            let table = self.table.clone();
            let writers = self.writers.clone();
            std::thread::spawn(move || backend_accept_loop(backend, table, writers));
        }

        for _ in 0..self.config.workers {
            if let Err(e) = spawn_worker(&self.config) {
                error!(error = %e, "cannot spawn worker");
            }
        }

        for conn in frontend.incoming() {
            match conn {
                Ok(stream) => {
                    let table = self.table.clone();
                    let writers = self.writers.clone();
                    std::thread::spawn(move || handle_client(stream, table, writers));
                }
                Err(e) => warn!(error = %e, "frontend accept failed"),
            }
        }
        Ok(())
    }

    /// Reap dead workers, settle their clients, and respawn replacements.
    /// The table is an owned object captured by the handler thread; there
    /// is no global.
    fn install_sigchld_handler(&self) -> anyhow::Result<()> {
        use signal_hook::consts::SIGCHLD;
        use signal_hook::iterator::Signals;

        let table = self.table.clone();
        let writers = self.writers.clone();
        let config = self.config.clone();
        let mut signals = Signals::new([SIGCHLD])?;
        std::thread::spawn(move || {
            for _signal in signals.forever() {
                loop {
                    // SAFETY: plain waitpid with WNOHANG; no memory is shared.
                    let pid = unsafe { libc::waitpid(-1, std::ptr::null_mut(), libc::WNOHANG) };
                    if pid <= 0 {
                        break;
                    }
                    let worker_id = format!("Worker-{pid}");
                    debug!(worker = %worker_id, "reaping dead worker");
                    let client = table
                        .lock()
                        .map(|mut t| t.remove(&worker_id))
                        .unwrap_or(None);
                    writers.lock().map(|mut w| w.remove(&worker_id)).ok();
                    if let Some(slot) = client {
                        let reply = json!({ "resp": worker_died_reply(), "code": 500 });
                        let _ = slot.send(serde_json::to_vec(&reply).unwrap_or_default());
                        info!(worker = %worker_id, "synthesized 500 for assigned client");
                    }
                    if let Err(e) = spawn_worker(&config) {
                        error!(error = %e, "cannot respawn worker");
                    }
                }
            }
        });
        Ok(())
    }
}

/// Spawn one worker process, propagating the fabric environment.
fn spawn_worker(config: &BrokerConfig) -> anyhow::Result<u32> {
    let program = match &config.worker_bin {
        Some(bin) => PathBuf::from(bin),
        None => {
            let mut exe = std::env::current_exe()?;
            exe.set_file_name("laf-worker");
            exe
        }
    };
    let mut cmd = std::process::Command::new(&program);
    cmd.arg(&config.basedir)
        .env("WORKER_SOCKET", &config.backend_url)
        .env("DEPLOYMENT", &config.deployment);
    if let Some(sock) = &config.notify_sock {
        cmd.env("NOTIFICATION_SOCK", sock);
    }
    if let Some(sock) = &config.journal_sock {
        cmd.env("JOURNAL_SOCK", sock);
    }
    let child = cmd.spawn()?;
    info!(pid = child.id(), program = %program.display(), "worker spawned");
    Ok(child.id())
}

fn backend_accept_loop(
    listener: UnixListener,
    table: Arc<Mutex<DispatchTable<ReplySlot>>>,
    writers: Arc<Mutex<HashMap<String, UnixStream>>>,
) {
    for conn in listener.incoming() {
        match conn {
            Ok(stream) => {
                let table = table.clone();
                let writers = writers.clone();
                std::thread::spawn(move || handle_worker(stream, table, writers));
            }
            Err(e) => warn!(error = %e, "backend accept failed"),
        }
    }
}

/// Serve one worker connection: identity frame, then READY/reply frames
/// until the worker goes away.
fn handle_worker(
    mut stream: UnixStream,
    table: Arc<Mutex<DispatchTable<ReplySlot>>>,
    writers: Arc<Mutex<HashMap<String, UnixStream>>>,
) {
    let worker_id = match read_frame(&mut stream) {
        Ok(Some(frame)) => String::from_utf8_lossy(&frame).into_owned(),
        _ => {
            warn!("worker connection closed before identity frame");
            return;
        }
    };
    debug!(worker = %worker_id, "worker connected");
    match stream.try_clone() {
        Ok(writer) => {
            if let Ok(mut map) = writers.lock() {
                map.insert(worker_id.clone(), writer);
            }
        }
        Err(e) => {
            error!(worker = %worker_id, error = %e, "cannot clone worker stream");
            return;
        }
    }

    loop {
        match read_frame(&mut stream) {
            Ok(Some(frame)) if frame == b"READY" => {
                debug!(worker = %worker_id, "worker ready");
                if let Ok(mut t) = table.lock() {
                    t.ready(&worker_id);
                }
            }
            Ok(Some(reply)) => {
                debug!(worker = %worker_id, bytes = reply.len(), "worker reply");
                let slot = table
                    .lock()
                    .map(|mut t| t.take_client(&worker_id))
                    .unwrap_or(None);
                match slot {
                    Some(slot) => {
                        let _ = slot.send(reply);
                    }
                    None => {
                        warn!(worker = %worker_id, "reply from worker with no assigned client");
                    }
                }
            }
            Ok(None) => {
                debug!(worker = %worker_id, "worker connection closed");
                break;
            }
            Err(e) => {
                warn!(worker = %worker_id, error = %e, "worker connection error");
                break;
            }
        }
    }
    // Removal and client settlement happen in the SIGCHLD handler.
}

/// Serve one gateway connection: one framed request, one framed reply.
fn handle_client(
    mut stream: UnixStream,
    table: Arc<Mutex<DispatchTable<ReplySlot>>>,
    writers: Arc<Mutex<HashMap<String, UnixStream>>>,
) {
    let request = match read_frame(&mut stream) {
        Ok(Some(frame)) => frame,
        _ => return,
    };

    let (reply_tx, reply_rx) = mpsc::channel::<Vec<u8>>();
    loop {
        let assigned = table
            .lock()
            .map(|mut t| t.assign(reply_tx.clone()))
            .unwrap_or(None);
        let Some(worker_id) = assigned else {
            info!("service unavailable, no idle worker");
            let busy = json!({ "resp": busy_reply(), "code": 503 });
            let _ = write_frame(&mut stream, &serde_json::to_vec(&busy).unwrap_or_default());
            return;
        };

        let forwarded = writers.lock().ok().and_then(|mut map| {
            map.get_mut(&worker_id).map(|w| {
                write_frame(&mut *w, &request)?;
                w.flush()
            })
        });
        match forwarded {
            Some(Ok(())) => {
                debug!(worker = %worker_id, "request forwarded");
                break;
            }
            _ => {
                // The worker went away between READY and the forward; drop
                // it and scan again.
                warn!(worker = %worker_id, "cannot forward to worker, dropping it");
                if let Ok(mut t) = table.lock() {
                    t.remove(&worker_id);
                }
                if let Ok(mut map) = writers.lock() {
                    map.remove(&worker_id);
                }
            }
        }
    }

    match reply_rx.recv() {
        Ok(reply) => {
            let _ = write_frame(&mut stream, &reply);
        }
        Err(_) => {
            error!("reply channel closed without a reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_path_mapping() {
        let p = socket_path("ipc://@frontend.ipc");
        assert!(p.to_string_lossy().ends_with("laf-frontend.ipc"));
        assert_eq!(
            socket_path("ipc:///var/run/laf.sock"),
            PathBuf::from("/var/run/laf.sock")
        );
        assert_eq!(socket_path("/plain/path.sock"), PathBuf::from("/plain/path.sock"));
    }
}
