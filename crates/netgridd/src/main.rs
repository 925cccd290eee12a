//! netgridd — the netgrid daemon.
//!
//! Runs the managed-network controller on one host: the catalog, the
//! REST API and the startup/shutdown lifecycle. In cluster mode the
//! member list seeds the catalog's membership view and peer sub-requests
//! go over HTTP.
//!
//! # Usage
//!
//! ```text
//! netgridd standalone --port 8443 --data-dir /var/lib/netgrid
//! netgridd cluster --member-name server01 --address 10.0.0.1:8443 \
//!     --member server01=10.0.0.1:8443 --member server02=10.0.0.2:8443
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{debug, info};

use netgrid_api::{AllowAll, Controller, EventBus};
use netgrid_catalog::{Catalog, MemberRecord, ProjectRecord};
use netgrid_cluster::{ClusterEnv, HttpClientFactory};
use netgrid_core::DEFAULT_PROJECT;
use netgrid_driver::{DriverContext, HostDatapath, MemoryUsage};
use netgridd::{network_shutdown, NetworkStartup};

#[derive(Parser)]
#[command(name = "netgridd", about = "netgrid network controller daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run as a single-member deployment.
    Standalone {
        /// Port to listen on.
        #[arg(long, default_value = "8443")]
        port: u16,

        /// Data directory for the catalog.
        #[arg(long, default_value = "/var/lib/netgrid")]
        data_dir: PathBuf,
    },

    /// Run as a cluster member.
    Cluster {
        /// Port to listen on.
        #[arg(long, default_value = "8443")]
        port: u16,

        /// Data directory for the catalog.
        #[arg(long, default_value = "/var/lib/netgrid")]
        data_dir: PathBuf,

        /// This member's name.
        #[arg(long)]
        member_name: String,

        /// Cluster members as name=host:port, repeatable.
        #[arg(long = "member")]
        members: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,netgridd=debug,netgrid=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Standalone { port, data_dir } => {
            run(port, data_dir, "standalone".to_string(), Vec::new()).await
        }
        Command::Cluster {
            port,
            data_dir,
            member_name,
            members,
        } => {
            let members = members
                .iter()
                .map(|spec| parse_member(spec))
                .collect::<anyhow::Result<Vec<_>>>()?;
            run(port, data_dir, member_name, members).await
        }
    }
}

fn parse_member(spec: &str) -> anyhow::Result<MemberRecord> {
    let (name, address) = spec
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("invalid member spec {spec:?}, expected name=host:port"))?;
    Ok(MemberRecord {
        name: name.to_string(),
        address: address.to_string(),
        alive: true,
    })
}

async fn run(
    port: u16,
    data_dir: PathBuf,
    member_name: String,
    members: Vec<MemberRecord>,
) -> anyhow::Result<()> {
    info!(member = %member_name, "netgrid daemon starting");

    std::fs::create_dir_all(&data_dir)?;
    let catalog = Catalog::open(&data_dir.join("netgrid.redb"))?;

    // Seed the default project and the membership view.
    if catalog.get_project(DEFAULT_PROJECT)?.is_none() {
        catalog.put_project(&ProjectRecord {
            name: DEFAULT_PROJECT.to_string(),
            config: Default::default(),
        })?;
    }
    if members.is_empty() {
        catalog.put_member(&MemberRecord {
            name: member_name.clone(),
            address: format!("127.0.0.1:{port}"),
            alive: true,
        })?;
    } else {
        for member in &members {
            catalog.put_member(member)?;
        }
    }
    info!(members = catalog.member_count()?, "catalog opened");

    // ── Shared subsystems ──────────────────────────────────────

    let datapath = Arc::new(HostDatapath::new());
    let usage = Arc::new(MemoryUsage::new());
    let cluster = Arc::new(ClusterEnv::new(
        &member_name,
        Arc::new(HttpClientFactory::notifier()),
    ));
    let events = EventBus::new();

    let controller = Controller::new(
        catalog.clone(),
        datapath.clone(),
        usage.clone(),
        cluster.clone(),
        Arc::new(AllowAll),
        events.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Log lifecycle events as they happen.
    let mut event_rx = events.subscribe();
    let mut event_shutdown = shutdown_rx.clone();
    let events_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                event = event_rx.recv() => match event {
                    Ok(event) => {
                        debug!(action = %event.action, source = %event.source, "lifecycle event")
                    }
                    Err(_) => break,
                },
                _ = event_shutdown.changed() => break,
            }
        }
    });

    // ── Startup engine ─────────────────────────────────────────

    let driver_ctx = DriverContext {
        catalog: catalog.clone(),
        datapath,
        usage,
        cluster,
    };

    let startup = Arc::new(NetworkStartup::new(driver_ctx.clone()));
    let retry_handle = startup.initialize(shutdown_rx).await?;
    info!("network startup pass complete");

    // ── API server ─────────────────────────────────────────────

    let router = netgrid_api::build_router(controller);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    if let Some(handle) = retry_handle {
        let _ = handle.await;
    }
    let _ = events_handle.await;

    network_shutdown(&driver_ctx).await;

    info!("netgrid daemon stopped");
    Ok(())
}
