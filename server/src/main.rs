use clap::Parser;
use log::{error, info, warn};
use server::auth_code::{AuthCodeService, AuthCodes};
use server::config::{ServerConfig, Settings};
use server::controller::ControllerKind;
use server::echo::LivenessEcho;
use server::firewall::{DisabledFirewall, FirewallGateway, RemoteFirewall};
use server::network::SessionServer;
use server::services::{ServerDirectory, Services};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const FIREWALL_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// INI file describing the lobby, firewall and game servers
    #[arg(short = 'c', long, default_value = "server.ini")]
    config: PathBuf,

    /// JSON file with menu settings
    #[arg(short = 's', long, default_value = "settings.json")]
    settings: PathBuf,

    /// Overrides [lobby] host
    #[arg(short = 'H', long)]
    host: Option<IpAddr>,

    /// Overrides [lobby] port
    #[arg(short, long)]
    port: Option<u16>,

    /// Overrides [lobby] controller (stack or manager)
    #[arg(long)]
    controller: Option<ControllerKind>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = ServerConfig::load(&args.config)?;
    if let Some(host) = args.host {
        config.lobby.host = host;
    }
    if let Some(port) = args.port {
        config.lobby.port = port;
    }
    if let Some(controller) = args.controller {
        config.lobby.controller = controller;
    }
    let settings = Settings::load(&args.settings);

    let (firewall, firewall_task): (Arc<dyn FirewallGateway>, _) = if config.firewall.enabled {
        info!("Firewall sync via {}", config.firewall.control_addr);
        let (remote, task) =
            RemoteFirewall::spawn(config.firewall.control_addr, config.firewall.connect_timeout);
        (Arc::new(remote), Some(task))
    } else {
        warn!("Firewall sync disabled");
        (Arc::new(DisabledFirewall), None)
    };

    let auth_codes = AuthCodes::with_limits(settings.auth_code_ttl, settings.max_auth_codes);
    let code_length = settings.auth_code_length;
    let services = Arc::new(
        Services::new(firewall)
            .with_directory(ServerDirectory::new(config.servers.clone()))
            .with_settings(settings)
            .with_auth_codes(auth_codes.clone())
            .with_public_ip(config.lobby.public_ip),
    );

    // Bind everything first so a taken port fails startup before anything runs
    let session = SessionServer::bind(config.session_addr(), &config.lobby, services).await?;
    let echo = LivenessEcho::bind(config.launcher_ping_addr()).await?;
    let auth = AuthCodeService::bind(config.auth_code_addr(), auth_codes, code_length).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut session_handle = tokio::spawn(session.run(shutdown_rx.clone()));
    let echo_handle = tokio::spawn(echo.run(shutdown_rx.clone()));
    let auth_handle = tokio::spawn(auth.run(shutdown_rx));

    tokio::select! {
        result = &mut session_handle => {
            if let Err(e) = result {
                error!("Session server task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    let _ = shutdown_tx.send(true);
    for (name, handle) in [("liveness echo", echo_handle), ("auth-code", auth_handle)] {
        if let Err(e) = handle.await {
            error!("{} task panicked: {}", name, e);
        }
    }
    if !session_handle.is_finished() {
        if let Err(e) = session_handle.await {
            error!("Session server task panicked: {}", e);
        }
    }

    // The sessions are gone, so the delivery task drains the last removals and stops
    if let Some(task) = firewall_task {
        match tokio::time::timeout(FIREWALL_FLUSH_TIMEOUT, task).await {
            Ok(Err(e)) => error!("Firewall delivery task panicked: {}", e),
            Ok(Ok(())) => {}
            Err(_) => warn!("Gave up flushing firewall rules after {:?}", FIREWALL_FLUSH_TIMEOUT),
        }
    }

    Ok(())
}
