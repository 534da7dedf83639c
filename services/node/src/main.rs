//! Dark-pool darknode
//!
//! Boots the node: identity, listener, swarm bootstrap, and the
//! order-matching engine, then runs until interrupted.

mod config;
mod externals;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dispatch::shutdown_channel;
use ome::{ComputationBacklog, Confirmer, LedgerSettler, Ome, OmeOptions, SmpcMatcher};
use router::{NodeService, Router, Swarm, TcpStreamClient};
use stream::connector::StreamConnector;
use stream::recycler::StreamRecycler;
use stream::streamer::{StreamClient, StreamServer, Streamer};
use tracing::{error, info, warn};

use config::Config;
use externals::{DevLedger, EmptyOrderbook, InMemoryStorer, LocalSmpc, PlainDecrypter};

#[derive(Parser, Debug)]
#[command(name = "darkpool-node", about = "Dark-pool order-matching node")]
struct Args {
    /// Path to the JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured listen host.
    #[arg(long)]
    host: Option<String>,

    /// Override the configured listen port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let keypair = Arc::new(config.keypair()?);
    let multi_address = keypair.multi_address(config.host.clone(), config.port);
    info!(address = %keypair.address(), listen = %multi_address, "starting darknode");

    let (shutdown_handle, shutdown) = shutdown_channel();

    // Network plane: connector, dialer, recycler, router, swarm, listener.
    let connector = Arc::new(StreamConnector::new(keypair.address()));
    let client = Arc::new(TcpStreamClient::new(
        Arc::clone(&keypair),
        multi_address.clone(),
    ));
    let streamer = Streamer::new(
        keypair.address(),
        client as Arc<dyn StreamClient>,
        Arc::clone(&connector) as Arc<dyn StreamServer>,
    );
    let router = Arc::new(Router::new(
        config.max_connections,
        multi_address.clone(),
        StreamRecycler::new(streamer),
    ));
    let swarm = Arc::new(Swarm::new(Arc::clone(&keypair), multi_address));
    let service = Arc::new(NodeService::new(
        Arc::clone(&router),
        Arc::clone(&swarm),
        connector,
        Arc::new(PlainDecrypter),
    ));
    let mut service_errs = service.run(shutdown.clone(), config.host.clone(), config.port);

    swarm.bootstrap(shutdown.clone(), &config.bootstrap).await;

    // Matching plane: storer fed from the fragment fan-out, engine wired
    // against the development collaborators.
    let storer = Arc::new(InMemoryStorer::new());
    Arc::clone(&storer).run(shutdown.clone(), &router);

    let ledger = Arc::new(DevLedger);
    let smpc = Arc::new(LocalSmpc);
    let matcher = Arc::new(SmpcMatcher::new(
        Arc::clone(&router),
        Arc::clone(&swarm),
        Arc::clone(&smpc) as Arc<dyn ome::Smpc>,
    ));
    let ome = Arc::new(Ome::new(
        matcher,
        Confirmer::new(Arc::clone(&ledger) as Arc<dyn ome::Ledger>),
        Arc::new(LedgerSettler::new(ledger as Arc<dyn ome::Ledger>)),
        storer,
        Arc::new(EmptyOrderbook),
        smpc as Arc<dyn ome::Smpc>,
        ComputationBacklog::new(),
        OmeOptions::default(),
    ));
    let mut ome_errs = ome.run(shutdown.clone());

    // Run until interrupted, surfacing pipeline errors as they come.
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                shutdown_handle.shutdown();
                break;
            }
            err = service_errs.recv() => {
                match err {
                    Some(err) => error!(error = %err, "node service failed"),
                    None => warn!("service error stream closed"),
                }
                shutdown_handle.shutdown();
                break;
            }
            err = ome_errs.recv() => match err {
                Some(err) => warn!(error = %err, "engine error"),
                None => {
                    warn!("engine error stream closed");
                    shutdown_handle.shutdown();
                    break;
                }
            }
        }
    }

    Ok(())
}
