use std::fmt;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level operation an error was raised from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Init,
    Install,
    Config,
    Pull,
    Push,
    Sync,
    Show,
    Import,
    Doctor,
    Clean,
    Update,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Init => "init",
            Op::Install => "install",
            Op::Config => "config",
            Op::Pull => "pull",
            Op::Push => "push",
            Op::Sync => "sync",
            Op::Show => "show",
            Op::Import => "import",
            Op::Doctor => "doctor",
            Op::Clean => "clean",
            Op::Update => "update",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorKind {
    #[default]
    General,
    Platform,
    Validation,
    Configuration,
    Installation,
    Network,
    FileSystem,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::General => "general",
            ErrorKind::Platform => "platform",
            ErrorKind::Validation => "validation",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Installation => "installation",
            ErrorKind::Network => "network",
            ErrorKind::FileSystem => "filesystem",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged error carried across subsystem boundaries.
///
/// Renders as `anvil <op> <command> [<kind>] (<context>): <cause>`, dropping the
/// command and context when empty and the kind when it is `general`.
#[derive(Debug, Error)]
#[error("anvil {op}{}{}{}: {source}", command_part(.command), kind_part(.kind), context_part(.context))]
pub struct AnvilError {
    pub op: Op,
    pub command: String,
    pub kind: ErrorKind,
    pub context: Option<String>,
    #[source]
    pub source: BoxError,
}

fn command_part(command: &str) -> String {
    if command.is_empty() {
        String::new()
    } else {
        format!(" {}", command)
    }
}

fn kind_part(kind: &ErrorKind) -> String {
    match kind {
        ErrorKind::General => String::new(),
        other => format!(" [{}]", other),
    }
}

fn context_part(context: &Option<String>) -> String {
    match context {
        Some(ctx) if !ctx.is_empty() => format!(" ({})", ctx),
        _ => String::new(),
    }
}

impl AnvilError {
    pub fn new(
        op: Op,
        command: impl Into<String>,
        kind: ErrorKind,
        source: impl Into<BoxError>,
    ) -> Self {
        Self {
            op,
            command: command.into(),
            kind,
            context: None,
            source: source.into(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn platform(op: Op, command: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::new(op, command, ErrorKind::Platform, source)
    }

    pub fn validation(op: Op, command: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::new(op, command, ErrorKind::Validation, source)
    }

    pub fn configuration(op: Op, command: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::new(op, command, ErrorKind::Configuration, source)
    }

    pub fn installation(op: Op, command: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::new(op, command, ErrorKind::Installation, source)
    }

    pub fn network(op: Op, command: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::new(op, command, ErrorKind::Network, source)
    }

    pub fn filesystem(op: Op, command: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::new(op, command, ErrorKind::FileSystem, source)
    }
}
