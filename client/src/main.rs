use clap::{Parser, Subcommand};
use client::auth_code::request_auth_code;
use client::network::SessionClient;
use client::ping::ping;
use log::info;
use shared::{SessionRequest, SessionResponse};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Seconds to wait for each reply
    #[arg(short = 't', long, default_value = "2")]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ping the liveness echo port
    Ping {
        #[arg(short = 's', long, default_value = "127.0.0.1:7778")]
        server: SocketAddr,
    },

    /// Request a one-time auth code
    AuthCode {
        #[arg(short = 's', long, default_value = "127.0.0.1:7779")]
        server: SocketAddr,

        username: String,
    },

    /// Log in, list servers and optionally join one
    Login {
        #[arg(short = 's', long, default_value = "127.0.0.1:7777")]
        server: SocketAddr,

        username: String,

        password_hash: String,

        /// Auth code from the auth-code command
        #[arg(long)]
        auth_code: Option<String>,

        /// Server key or name to join after logging in
        #[arg(short = 'j', long)]
        join: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let timeout = Duration::from_secs(args.timeout);

    match args.command {
        Command::Ping { server } => {
            let rtt = ping(server, timeout).await?;
            info!("{} answered in {:.1}ms", server, rtt.as_secs_f64() * 1000.0);
        }

        Command::AuthCode { server, username } => {
            let code = request_auth_code(server, &username, timeout).await?;
            println!("{}", code);
        }

        Command::Login {
            server,
            username,
            password_hash,
            auth_code,
            join,
        } => {
            let mut session = SessionClient::connect(server, timeout).await?;

            let response = session
                .call(&SessionRequest::Login {
                    login_name: username.clone(),
                    password_hash,
                    display_name: username,
                    auth_code,
                })
                .await?;
            match response {
                SessionResponse::LoginAccepted { motd, .. } => info!("Logged in: {}", motd),
                other => {
                    info!("Login failed: {:?}", other);
                    session.disconnect().await?;
                    return Ok(());
                }
            }

            if let SessionResponse::ServerList { servers } =
                session.call(&SessionRequest::ListServers).await?
            {
                for server in servers {
                    info!(
                        "  {} ({}) at {}, {}/{} players",
                        server.key, server.name, server.addr, server.players, server.max_players
                    );
                }
            }

            if let Some(target) = join {
                let response = session
                    .call(&SessionRequest::JoinServer { server: target })
                    .await?;
                info!("Join: {:?}", response);
            }

            session.disconnect().await?;
        }
    }

    Ok(())
}
