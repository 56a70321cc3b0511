use clap::Parser;
use log::info;
use server::network::Server;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

/// Main-method of the application.
/// Parses command-line arguments, starts the listening server, and waits
/// for a termination signal before running the graceful shutdown.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "3999")]
        port: u16,
        /// Maximum number of simultaneous connections
        #[clap(short, long, default_value = "64")]
        capacity: usize,
    }

    env_logger::init();
    let args = Args::parse();

    let address = format!("{}:{}", args.host, args.port);
    let server = Server::new(&address, args.capacity).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_handle = tokio::spawn(async move { server.run(shutdown_rx).await });

    let mut hangup = signal(SignalKind::hangup())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
        _ = hangup.recv() => {
            info!("SIGHUP received, shutting down");
        }
    }

    // Stop accepting, half-close every live connection, and wait for the
    // workers to drain before exiting.
    let _ = shutdown_tx.send(true);
    server_handle.await?;

    info!("server terminated");
    Ok(())
}
