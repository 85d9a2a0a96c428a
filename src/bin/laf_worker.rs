//! Default worker process serving echo handlers for every configured lone.
//! Deployments with real handlers build their own binary on
//! `laf::worker::Worker` and hand it to the broker via `--worker-bin`.

use laf::worker::{echo_lones, Worker};
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    laf::logger::init(false);
    let basedir: PathBuf = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("basedir missing"))?;
    let socket_url =
        std::env::var("WORKER_SOCKET").unwrap_or_else(|_| laf::broker::DEFAULT_BACKEND_URL.into());
    let deployment = std::env::var("DEPLOYMENT").unwrap_or_else(|_| "prod".to_string());
    let worker = Worker::new(&basedir, &socket_url, &deployment, echo_lones)?;
    worker.run()
}
