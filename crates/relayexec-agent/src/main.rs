//! Relayexec Agent Binary
//!
//! Registers with a relay and executes the commands it forwards.

use anyhow::{Context, Result};
use clap::Parser;
use relayexec_agent::{Agent, AgentConfig};
use relayexec_transport::{RelayEndpoint, DEFAULT_RELAY_PORT};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay hostname or IP
    #[arg(env = "RELAYEXEC_HOST")]
    relay_host: String,

    /// Relay port
    #[arg(env = "RELAYEXEC_PORT", default_value_t = DEFAULT_RELAY_PORT)]
    relay_port: u16,

    /// Identity to register with (random when omitted)
    #[arg(env = "RELAYEXEC_AGENT_ID")]
    agent_id: Option<String>,

    /// Seconds to wait between connection attempts
    #[arg(long, env = "RELAYEXEC_RECONNECT_DELAY", default_value_t = 5)]
    reconnect_delay: u64,

    /// Seconds a single command may run
    #[arg(long, env = "RELAYEXEC_COMMAND_TIMEOUT", default_value_t = 30)]
    command_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = AgentConfig::new(RelayEndpoint::new(args.relay_host, args.relay_port))
        .with_reconnect_delay(Duration::from_secs(args.reconnect_delay))
        .with_command_timeout(Duration::from_secs(args.command_timeout));
    if let Some(agent_id) = args.agent_id {
        config = config.with_agent_id(agent_id);
    }

    let mut agent = Agent::new(config).context("Failed to create agent")?;
    info!("Starting relayexec agent {}", agent.agent_id());

    let shutdown = agent.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                shutdown.cancel();
            }
            Err(e) => error!("Failed to listen for interrupt: {}", e),
        }
    });

    agent.run().await
}
