//! Relayexec Client Binary
//!
//! Sends commands to relay-connected agents, either one-shot or from an
//! interactive prompt.

use anyhow::{Context, Result};
use clap::Parser;
use relayexec::{run_interactive, run_single, ClientConfig, Session};
use relayexec_transport::{RelayEndpoint, DEFAULT_RELAY_PORT};
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::{stdin, stdout, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay hostname or IP
    #[arg(env = "RELAYEXEC_HOST")]
    relay_host: String,

    /// [relay_port] [agent_id] [command...]; an agent and a command select
    /// single-shot mode
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "ARGS")]
    rest: Vec<String>,

    /// Relay port when none is given positionally
    #[arg(long, env = "RELAYEXEC_PORT", default_value_t = DEFAULT_RELAY_PORT)]
    port: u16,

    /// Seconds to wait for each response
    #[arg(long, env = "RELAYEXEC_TIMEOUT", default_value_t = 30)]
    timeout: u64,
}

/// Positional arguments after the host, resolved
#[derive(Debug, PartialEq, Eq)]
struct Invocation {
    port: u16,
    single: Option<(String, String)>,
}

/// Split `[relay_port] [agent_id] [command...]`.
///
/// A numeric first word is the port; anything else is the agent id. An agent
/// without a command falls back to interactive mode.
fn parse_invocation(rest: &[String], default_port: u16) -> Result<Invocation> {
    let mut words = rest.iter().peekable();

    let port = match words.peek() {
        Some(word) if word.chars().all(|c| c.is_ascii_digit()) => {
            let port = word.parse().with_context(|| format!("Invalid relay port: {}", word))?;
            words.next();
            port
        }
        _ => default_port,
    };

    let agent_id = words.next().cloned();
    let command = words.map(String::as_str).collect::<Vec<_>>().join(" ");

    let single = match agent_id {
        Some(agent_id) if !command.trim().is_empty() => Some((agent_id, command)),
        Some(agent_id) => {
            warn!("No command given for agent {}, starting interactive mode", agent_id);
            None
        }
        None => None,
    };

    Ok(Invocation { port, single })
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let invocation = parse_invocation(&args.rest, args.port)?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
    let result = runtime.block_on(run(args, invocation));
    // A blocked stdin read must not hold the process open
    runtime.shutdown_background();

    result
}

async fn run(args: Args, invocation: Invocation) -> Result<ExitCode> {
    let config = ClientConfig::new(RelayEndpoint::new(args.relay_host, invocation.port))
        .with_response_timeout(Duration::from_secs(args.timeout));
    let session = Session::connect(config).await.context("Connection error")?;
    info!("Registered as client {}", session.client_id());

    let mut output = stdout();
    let succeeded = tokio::select! {
        result = async {
            match &invocation.single {
                Some((agent_id, command)) => run_single(&session, agent_id, command, &mut output).await,
                None => run_interactive(&session, BufReader::new(stdin()), &mut output)
                    .await
                    .map(|()| true),
            }
        } => result?,
        _ = tokio::signal::ctrl_c() => {
            println!("\nGoodbye!");
            invocation.single.is_none()
        }
    };

    session.shutdown().await;

    Ok(if succeeded { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
