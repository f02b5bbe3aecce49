use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sinkhole::filter::Blocklist;
use sinkhole::resolver::Resolver;
use sinkhole::server::Server;

/// Fixed client-facing port.
const LISTEN_PORT: u16 = 5300;

#[derive(Parser)]
#[command(name = "sinkhole")]
#[command(about = "DNS sinkhole with iterative resolution", long_about = None)]
struct Args {
    /// Blocklist file, one domain per line
    blocklist: Option<PathBuf>,
}

async fn run(args: Args) -> io::Result<()> {
    let blocklist = match &args.blocklist {
        Some(path) => Blocklist::load(path),
        None => Blocklist::empty(),
    };

    let bind_addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], LISTEN_PORT));
    let server = Server::bind(bind_addr, blocklist, Resolver::new()).await?;

    info!(addr = %bind_addr, "sinkhole listening");
    server.run().await
}

fn main() -> ExitCode {
    // Usage errors exit 1 before anything binds; --help and --version are
    // not errors.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build runtime");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(run(args)) {
        error!(port = LISTEN_PORT, error = %e, "server failed");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}
