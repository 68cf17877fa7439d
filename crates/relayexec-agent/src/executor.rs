//! Command execution and working-directory state

use std::path::{Component, Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Wall-clock limit for a single shell command
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Executes command lines on behalf of the relay.
///
/// Owns the agent's notion of the current directory. `cd` commands update it
/// in place; every other command runs in a shell started in that directory.
/// The process's own working directory is never touched.
#[derive(Debug, Clone)]
pub struct Executor {
    /// Working-directory state, always absolute and normalised
    current_dir: PathBuf,
    /// Per-command timeout
    timeout: Duration,
}

impl Executor {
    /// Create an executor rooted at `current_dir`
    pub fn new(current_dir: impl Into<PathBuf>) -> Self {
        Self {
            current_dir: normalize_path(&current_dir.into()),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Set the per-command timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Current working-directory state
    pub fn current_dir(&self) -> &Path {
        &self.current_dir
    }

    /// Run one command line and render its outcome as text.
    ///
    /// Never fails: errors, timeouts and non-zero exits all come back as the
    /// result string.
    pub async fn execute(&mut self, command: &str) -> String {
        match parse_cd(command) {
            Some(arg) => self.change_dir(arg),
            None => self.run_shell(command).await,
        }
    }

    /// Handle a directory change request
    pub fn change_dir(&mut self, arg: &str) -> String {
        let target = normalize_path(&self.resolve(arg));

        if target.is_dir() {
            debug!("Working directory {} -> {}", self.current_dir.display(), target.display());
            self.current_dir = target;
            format!("Changed directory to: {}", self.current_dir.display())
        } else {
            format!("Directory not found: {}", target.display())
        }
    }

    /// Resolve a `cd` argument against the working-directory state
    fn resolve(&self, arg: &str) -> PathBuf {
        let arg = strip_quotes(arg);

        if arg.is_empty() {
            return home_dir().unwrap_or_else(|| self.current_dir.clone());
        }

        if arg == "~" {
            if let Some(home) = home_dir() {
                return home;
            }
        } else if let Some(rest) = arg.strip_prefix("~/").or_else(|| arg.strip_prefix("~\\")) {
            if let Some(home) = home_dir() {
                return home.join(rest);
            }
        }

        let path = Path::new(arg);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.current_dir.join(path)
        }
    }

    /// Run a command through the platform shell
    async fn run_shell(&self, command: &str) -> String {
        let mut cmd = shell_command(command);
        cmd.current_dir(&self.current_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn shell for {:?}: {}", command, e);
                return format!("Error executing command: {}", e);
            }
        };

        // Dropping the wait future on timeout drops the child, which kills it
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => render_output(&output),
            Ok(Err(e)) => format!("Error executing command: {}", e),
            Err(_) => {
                warn!("Command timed out after {:?}: {}", self.timeout, command);
                format!("Command timed out ({} seconds)", self.timeout.as_secs_f32())
            }
        }
    }
}

/// Extract the argument of a `cd` command, if `command` is one.
///
/// Matches `cd` alone or `cd` followed by whitespace; `cdrom` is not a
/// directory change.
pub fn parse_cd(command: &str) -> Option<&str> {
    let rest = command.trim().strip_prefix("cd")?;
    if rest.is_empty() {
        Some(rest)
    } else if rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

/// Fold `.` and `..` components without touching the filesystem.
///
/// Symlinks are not resolved and no component has to exist. `..` at the root
/// stays at the root.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            Component::Normal(part) => normalized.push(part),
        }
    }

    normalized
}

fn strip_quotes(arg: &str) -> &str {
    for quote in ['"', '\''] {
        if arg.len() >= 2 && arg.starts_with(quote) && arg.ends_with(quote) {
            return &arg[1..arg.len() - 1];
        }
    }
    arg
}

fn home_dir() -> Option<PathBuf> {
    dirs::home_dir()
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(not(windows))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

/// Render captured output; never returns an empty string
fn render_output(output: &Output) -> String {
    let mut result = String::from_utf8_lossy(&output.stdout).into_owned();

    if !output.stderr.is_empty() {
        result.push_str("\nSTDERR: ");
        result.push_str(&String::from_utf8_lossy(&output.stderr));
    }

    if result.is_empty() {
        result = format!("Command executed (exit code: {})", output.status.code().unwrap_or(-1));
    }

    result
}
