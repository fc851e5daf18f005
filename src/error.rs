use thiserror::Error;

/// Everything that can go wrong between reading a line and reaping its
/// children. Each variant is local to the current command line; only the
/// `exit` builtin terminates the shell, and it does so through
/// [`crate::command::Status::ExitShell`], not through an error.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("Error - malformed command line.")]
    MalformedCmdline,

    #[error("Error - {builtin} takes {expected}")]
    BuiltinArgCount {
        builtin: &'static str,
        expected: &'static str,
    },

    #[error("Error - getenv unknown variable {0}")]
    UnknownVariable(String),

    #[error("Error - cd no home directory")]
    NoHome,

    #[error("Error - could not open input file : {source}")]
    BadInFile {
        #[source]
        source: std::io::Error,
    },

    #[error("Error - could not open output file : {source}")]
    BadOutFile {
        #[source]
        source: std::io::Error,
    },

    #[error("Error - could not execute : {0}")]
    ExecLaunchFailed(nix::errno::Errno),

    #[error("Error - fork failed : {0}")]
    ForkFailed(nix::errno::Errno),

    #[error("Error - pipe failed : {0}")]
    PipeFailed(nix::errno::Errno),

    #[error("Error - dup failed : {0}")]
    DupFailed(nix::errno::Errno),

    #[error("Error - wait failed : {0}")]
    WaitFailed(nix::errno::Errno),

    #[error("Error - queued commands cannot pipe or redirect")]
    QueueReject,

    #[error("Error - no such task {0}")]
    UnknownJob(u32),

    #[error("Error - task {0} is still queued.")]
    OutputStillQueued(u32),

    #[error("Error - task {0} is still running")]
    OutputStillRunning(u32),

    #[error("{0} is already finished, use output {0} to show results")]
    CancelAlreadyDone(u32),
}
