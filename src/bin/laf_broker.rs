//! Broker process: the load-balancing fabric between gateway and workers.

use clap::Parser;
use laf::broker::{Broker, BrokerConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "laf-broker")]
#[command(about = "LAF dispatch broker", long_about = None)]
struct Args {
    /// Base directory of the family
    #[arg(short, long)]
    basedir: PathBuf,

    /// Number of workers to keep in the pool
    #[arg(short, long)]
    workers: usize,

    /// Frontend socket for gateway clients
    #[arg(long, default_value = laf::broker::DEFAULT_FRONTEND_URL)]
    client_socket: String,

    /// Backend socket for workers
    #[arg(long, default_value = laf::broker::DEFAULT_BACKEND_URL)]
    worker_socket: String,

    /// Alternative worker binary
    #[arg(long)]
    worker_bin: Option<String>,

    /// Deployment of the server (e.g. prod, dev)
    #[arg(long)]
    deployment: String,

    /// Notification message socket
    #[arg(long)]
    notify_sock: Option<String>,

    /// Journal daemon socket
    #[arg(long)]
    journal_sock: Option<String>,
}

fn main() -> anyhow::Result<()> {
    laf::logger::init(false);
    let args = Args::parse();
    let broker = Broker::new(BrokerConfig {
        basedir: args.basedir,
        deployment: args.deployment,
        frontend_url: args.client_socket,
        backend_url: args.worker_socket,
        workers: args.workers,
        worker_bin: args.worker_bin,
        notify_sock: args.notify_sock,
        journal_sock: args.journal_sock,
    });
    broker.run()
}
