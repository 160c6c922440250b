//! Terminal chat client.
//!
//! Wires the session SDK against a live gateway:
//! 1. Loads configuration from flags and the environment.
//! 2. Initializes logging.
//! 3. Opens a session for the requested scene and prints the roster.
//! 4. Bridges stdin lines to text events until EOF or Ctrl+C.

use anyhow::Context;
use clap::Parser;
use colloquy_client::{
    ClientConfig, Payload, RemoteTokenGenerator, Session, UserProfile,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chat", about = "Terminal chat against a dialogue gateway")]
struct Args {
    /// Scene to join.
    #[arg(long, env = "SCENE_NAME")]
    scene: String,
    /// Display name sent with the scene request.
    #[arg(long, env = "PLAYER_NAME", default_value = "Player")]
    player: String,
    /// Gateway hostname (host or host:port).
    #[arg(long, env = "GATEWAY_HOSTNAME")]
    gateway: String,
    /// Endpoint issuing session tokens.
    #[arg(long, env = "TOKEN_URL")]
    token_url: String,
    /// Talk to the gateway without TLS.
    #[arg(long, default_value_t = false)]
    insecure: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    let mut config = ClientConfig::default();
    config.connection.gateway.hostname = args.gateway.clone();
    config.connection.gateway.ssl = !args.insecure;

    let session = Session::builder(&args.scene)
        .config(config)
        .user(UserProfile {
            id: None,
            full_name: args.player.clone(),
        })
        .token_generator(Arc::new(RemoteTokenGenerator::new(&args.token_url)))
        .on_ready(|| info!("Session ready"))
        .on_error(|err| error!(error = %err, "Session error"))
        .on_disconnect(|| warn!("Disconnected from gateway"))
        .on_message(|packet| {
            if let Payload::Text(text) = &packet.payload {
                if packet.routing.source.is_character && text.is_final {
                    let who = packet
                        .routing
                        .source
                        .name
                        .clone()
                        .unwrap_or_else(|| "character".to_string());
                    println!("{who}: {}", text.text);
                }
            }
        })
        .build()
        .context("Failed to build session")?;

    session.open().await;
    if !session.is_active() {
        anyhow::bail!("Could not open a session for scene `{}`", args.scene);
    }

    let characters = session
        .characters()
        .await
        .context("Failed to load the scene roster")?;
    info!(scene = %args.scene, characters = characters.len(), "Connected");
    for character in &characters {
        println!("  in scene: {} ({})", character.name, character.id);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) if !line.trim().is_empty() => {
                        session.send(|factory| factory.text(line.trim())).await;
                    }
                    Some(_) => {}
                    None => break,
                }
            }
        }
    }

    session.close().await;
    info!("Session closed. Goodbye.");
    Ok(())
}
