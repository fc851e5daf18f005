use std::path::PathBuf;

/// Where a command's standard input comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StdinSource {
    /// Inherit the shell's stdin (or the pipe, when `pipe_in` is set).
    #[default]
    Inherit,
    /// Read from a file (`< PATH`).
    File(PathBuf),
}

/// Where a command's standard output goes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StdoutSink {
    /// Inherit the shell's stdout (or the pipe, when `pipe_out` is set).
    #[default]
    Inherit,
    /// Create or truncate a file (`> PATH`).
    Truncate(PathBuf),
    /// Create or append to a file (`>> PATH`).
    Append(PathBuf),
}

/// One fully assembled segment of a pipeline: the argument vector plus
/// everything the executor needs to wire its standard streams.
///
/// Invariants upheld by the assembler: `argv` is non-empty, a stream is
/// bound at most once, and a pipe and a file never share a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// The command name followed by its arguments; `argv[0]` is the
    /// executable subject to PATH resolution.
    pub argv: Vec<String>,
    /// Stdin is the read end of a pipe from the previous segment.
    pub pipe_in: bool,
    /// Stdout is the write end of a pipe to the next segment.
    pub pipe_out: bool,
    pub stdin_source: StdinSource,
    pub stdout_sink: StdoutSink,
}

impl CommandSpec {
    /// A bare command with default channels, used by the background queue
    /// when it rewraps the words following `queue`.
    pub fn from_argv(argv: Vec<String>) -> Self {
        CommandSpec {
            argv,
            pipe_in: false,
            pipe_out: false,
            stdin_source: StdinSource::Inherit,
            stdout_sink: StdoutSink::Inherit,
        }
    }

    pub fn name(&self) -> &str {
        &self.argv[0]
    }

    /// True when neither stream has been redirected or piped.
    pub fn has_default_channels(&self) -> bool {
        !self.pipe_in
            && !self.pipe_out
            && self.stdin_source == StdinSource::Inherit
            && self.stdout_sink == StdoutSink::Inherit
    }
}

/// A non-empty left-to-right sequence of commands connected by pipes.
pub type Pipeline = Vec<CommandSpec>;

/// What the runner reports back to the prompt loop after each line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Keep prompting.
    Success,
    /// A diagnostic was printed; keep prompting.
    Error,
    /// The `exit` builtin ran; tear down and terminate.
    ExitShell,
}
