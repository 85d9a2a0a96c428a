//! Gateway process: the HTTP front end of a family deployment.

use clap::Parser;
use laf::server::{AppService, GatewayConfig};
use may_minihttp::HttpServer;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "laf-server")]
#[command(about = "LAF HTTP gateway", long_about = None)]
struct Args {
    /// Base directory of the family
    #[arg(short, long)]
    basedir: PathBuf,

    /// Deployment of the server (e.g. prod, dev)
    #[arg(long)]
    deployment: String,

    /// Host to bind
    #[arg(long)]
    host: String,

    /// Port to bind
    #[arg(long, default_value = "8000")]
    port: u16,

    /// Frontend socket of the broker
    #[arg(long, default_value = laf::broker::DEFAULT_FRONTEND_URL)]
    client_socket: String,

    /// Authentication plugin name
    #[arg(long, default_value = "noauth")]
    auth_type: String,

    /// Authentication plugin data (YAML file)
    #[arg(long)]
    auth_data: Option<PathBuf>,

    /// Journal daemon socket
    #[arg(long)]
    journal_sock: Option<String>,

    /// Validation service socket
    #[arg(long)]
    validation_sock: Option<PathBuf>,

    /// Authorization service socket
    #[arg(long)]
    authorization_sock: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    laf::logger::init(false);
    let args = Args::parse();
    if let Some(sock) = &args.journal_sock {
        std::env::set_var("JOURNAL_SOCK", sock);
    }
    let service = AppService::new(GatewayConfig {
        basedir: args.basedir,
        deployment: args.deployment,
        client_socket: args.client_socket,
        auth_type: args.auth_type,
        auth_data: args.auth_data,
        validation_socket: args.validation_sock,
        authorization_socket: args.authorization_sock,
    })?;
    let addr = format!("{}:{}", args.host, args.port);
    tracing::info!(addr = %addr, "gateway starting");
    // start returns a coroutine JoinHandle; joining keeps the gateway up
    let handle = HttpServer(service).start(&addr)?;
    handle
        .join()
        .map_err(|e| anyhow::anyhow!("gateway crashed: {e:?}"))
}
