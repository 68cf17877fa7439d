//! Interactive and single-shot front ends

use crate::Session;
use relayexec_proto::CommandResponse;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Prompt printed before each interactive line
pub const PROMPT: &str = "remote> ";

/// What an interactive input line asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAction<'a> {
    /// Leave the client
    Quit,
    /// Print the roster
    List,
    /// Blank line
    Empty,
    /// Line that is not `<agent_id> <command>`
    Usage,
    /// Send `command` to `agent_id`
    Submit {
        /// Target agent
        agent_id: &'a str,
        /// Command line to run there
        command: &'a str,
    },
}

/// Parse one line of interactive input
pub fn parse_input(line: &str) -> InputAction<'_> {
    let line = line.trim();

    if line.is_empty() {
        return InputAction::Empty;
    }
    if ["quit", "exit", "q"].iter().any(|w| line.eq_ignore_ascii_case(w)) {
        return InputAction::Quit;
    }
    if line.eq_ignore_ascii_case("list") {
        return InputAction::List;
    }

    match line.split_once(char::is_whitespace) {
        Some((agent_id, command)) if !command.trim().is_empty() => InputAction::Submit {
            agent_id,
            command: command.trim(),
        },
        _ => InputAction::Usage,
    }
}

/// Render a response the way both front ends print it
pub fn render_response(response: &CommandResponse) -> String {
    format!(
        "\n--- Response from agent {} (cmd_id: {}) ---\n\
         Command: {}\n\
         Current directory: {}\n\
         Result:\n{}\n\
         --- End of response ---\n",
        response.agent_id,
        response.command_id.as_deref().unwrap_or("-"),
        response.command,
        response.current_dir,
        response.result,
    )
}

/// Submit one command and print its outcome; true on success
pub async fn run_single<W>(session: &Session, agent_id: &str, command: &str, output: &mut W) -> io::Result<bool>
where
    W: AsyncWrite + Unpin,
{
    let succeeded = submit_and_print(session, agent_id, command, output).await?;
    output.flush().await?;
    Ok(succeeded)
}

/// Read `<agent_id> <command>` lines until quit, end of input or the
/// connection closes.
///
/// Incoming envelopes keep being processed by the session while this waits
/// on input.
pub async fn run_interactive<R, W>(session: &Session, input: R, output: &mut W) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let banner = format!(
        "Connected to relay server at {}\n\
         Enter commands in the format: <agent_id> <command>\n\
         Special commands:\n  \
         list - show available agents\n  \
         quit - exit the client\n\
         Example: myserver01 cd /tmp\n\n",
        session.endpoint()
    );
    output.write_all(banner.as_bytes()).await?;

    let mut lines = input.lines();

    loop {
        output.write_all(PROMPT.as_bytes()).await?;
        output.flush().await?;

        let line = tokio::select! {
            _ = session.closed() => {
                output.write_all(b"\nConnection to relay closed\n").await?;
                break;
            }
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            debug!("End of input");
            output.write_all(b"\n").await?;
            break;
        };

        match parse_input(&line) {
            InputAction::Quit => break,
            InputAction::Empty => {}
            InputAction::List => {
                output.write_all(format!("{}\n", session.roster()).as_bytes()).await?;
            }
            InputAction::Usage => output.write_all(b"Usage: <agent_id> <command>\n").await?,
            InputAction::Submit { agent_id, command } => {
                submit_and_print(session, agent_id, command, output).await?;
            }
        }
    }

    output.write_all(b"Goodbye!\n").await?;
    output.flush().await
}

async fn submit_and_print<W>(session: &Session, agent_id: &str, command: &str, output: &mut W) -> io::Result<bool>
where
    W: AsyncWrite + Unpin,
{
    match session.router().submit(agent_id, command).await {
        Ok(response) => {
            output.write_all(render_response(&response).as_bytes()).await?;
            Ok(true)
        }
        Err(e) => {
            output.write_all(format!("{}\n", e).as_bytes()).await?;
            Ok(false)
        }
    }
}
