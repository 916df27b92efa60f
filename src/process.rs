use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} timed out after {}s", .after.as_secs())]
    Timeout { program: String, after: Duration },
    #[error("{program} was cancelled")]
    Cancelled { program: String },
}

impl ProcessError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProcessError::Cancelled { .. })
    }
}

/// Captured result of a finished child process.
#[derive(Debug, Clone, Default)]
pub struct Output {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }

    /// stdout when the process wrote any, stderr otherwise.
    pub fn best_message(&self) -> &str {
        if self.stdout.trim().is_empty() {
            self.stderr.trim()
        } else {
            self.stdout.trim()
        }
    }
}

/// A child process description. Every run is bounded by a timeout and a
/// cancellation token; children are killed when the future is dropped.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    envs: Vec<(String, String)>,
    timeout: Duration,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.envs
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Command line for logs, with credentials embedded in URLs masked.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&redact_url_credentials(arg));
        }
        line
    }

    pub async fn output(&self, cancel: &CancellationToken) -> Result<Output, ProcessError> {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }
        for (key, value) in &self.envs {
            command.env(key, value);
        }

        debug!(command = %self.display(), "spawning");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProcessError::Cancelled {
                program: self.program.clone(),
            }),
            result = tokio::time::timeout(self.timeout, command.output()) => match result {
                Err(_) => Err(ProcessError::Timeout {
                    program: self.program.clone(),
                    after: self.timeout,
                }),
                Ok(Err(source)) => Err(ProcessError::Spawn {
                    program: self.program.clone(),
                    source,
                }),
                Ok(Ok(out)) => {
                    let output = Output {
                        success: out.status.success(),
                        code: out.status.code(),
                        stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
                        stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
                    };
                    debug!(command = %self.display(), code = ?output.code, "finished");
                    Ok(output)
                }
            },
        }
    }

    /// Runs without an external cancellation source.
    pub async fn run(&self) -> Result<Output, ProcessError> {
        self.output(&CancellationToken::new()).await
    }
}

/// Whether `name` resolves to an executable on `PATH`.
pub fn command_exists(name: &str) -> bool {
    which::which(name).is_ok()
}

fn redact_url_credentials(arg: &str) -> String {
    if arg.starts_with("Authorization:") {
        return "Authorization: ***".to_string();
    }
    if let Some(scheme_end) = arg.find("://") {
        let rest = &arg[scheme_end + 3..];
        if let Some(at) = rest.find('@') {
            if !rest[..at].contains('/') {
                return format!("{}://***@{}", &arg[..scheme_end], &rest[at + 1..]);
            }
        }
    }
    arg.to_string()
}
