//! Foreground execution of an assembled pipeline.
//!
//! Segments run serialized: each one is forked, wired to its pipe ends and
//! file redirections with `dup2`, launched with `execve` after PATH
//! resolution, and waited for before the next segment is spawned. The
//! shell's own stdin/stdout are saved before the pipeline and restored
//! afterwards, so the prompt always comes back on the real terminal.

use crate::command::{CommandSpec, StdinSource, StdoutSink};
use crate::env::Environment;
use crate::error::ShellError;
use crate::external;
use log::{debug, trace};
use nix::libc::{STDIN_FILENO, STDOUT_FILENO};
use nix::sys::wait::waitpid;
use nix::unistd::{close, dup, dup2, execve, fork, pipe, ForkResult};
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::process;

/// Duplicates of the shell's stdin and stdout, taken before a pipeline
/// touches any descriptor and put back when it is done.
struct SavedStdio {
    stdin: RawFd,
    stdout: RawFd,
}

impl SavedStdio {
    fn save() -> Result<Self, ShellError> {
        Ok(SavedStdio {
            stdin: dup(STDIN_FILENO).map_err(ShellError::DupFailed)?,
            stdout: dup(STDOUT_FILENO).map_err(ShellError::DupFailed)?,
        })
    }

    fn restore(self) -> Result<(), ShellError> {
        let stdin_restored = dup2(self.stdin, STDIN_FILENO);
        let stdout_restored = dup2(self.stdout, STDOUT_FILENO);
        let _ = close(self.stdin);
        let _ = close(self.stdout);
        stdin_restored.map_err(ShellError::DupFailed)?;
        stdout_restored.map_err(ShellError::DupFailed)?;
        Ok(())
    }
}

/// File descriptors opened for a segment's `<`, `>` or `>>` redirections.
/// They are closed on drop: in the parent right after the fork, in the
/// child once duplicated onto the standard streams.
pub(crate) struct RedirFiles {
    input: Option<File>,
    output: Option<File>,
}

pub(crate) fn open_redirections(cmd: &CommandSpec) -> Result<RedirFiles, ShellError> {
    let output = match &cmd.stdout_sink {
        StdoutSink::Inherit => None,
        StdoutSink::Truncate(path) => Some(
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o777)
                .open(path)
                .map_err(|source| ShellError::BadOutFile { source })?,
        ),
        StdoutSink::Append(path) => Some(
            OpenOptions::new()
                .append(true)
                .create(true)
                .mode(0o777)
                .open(path)
                .map_err(|source| ShellError::BadOutFile { source })?,
        ),
    };

    let input = match &cmd.stdin_source {
        StdinSource::Inherit => None,
        StdinSource::File(path) => {
            Some(File::open(path).map_err(|source| ShellError::BadInFile { source })?)
        }
    };

    Ok(RedirFiles { input, output })
}

/// Arrange the child's standard streams: a file redirection wins over a
/// pipe on the same channel (the assembler guarantees they never
/// coexist). The background queue calls this too, with no pipe ends, so
/// queued children are wired by exactly the same code as foreground ones.
pub(crate) fn wire_child_channels(
    redirs: &RedirFiles,
    pipe_in: Option<&OwnedFd>,
    pipe_out: Option<&OwnedFd>,
) -> nix::Result<()> {
    if let Some(out) = &redirs.output {
        dup2(out.as_raw_fd(), STDOUT_FILENO)?;
    } else if let Some(w) = pipe_out {
        dup2(w.as_raw_fd(), STDOUT_FILENO)?;
    }

    if let Some(input) = &redirs.input {
        dup2(input.as_raw_fd(), STDIN_FILENO)?;
    } else if let Some(r) = pipe_in {
        dup2(r.as_raw_fd(), STDIN_FILENO)?;
    }

    Ok(())
}

/// Resolve the program against the store's PATH and replace this process
/// with it. Only ever called in a forked child; on failure the child
/// prints its own diagnostic and exits 127.
pub(crate) fn exec_program(env: &Environment, cmd: &CommandSpec, envp: &[CString]) -> ! {
    let argv: Vec<CString> = cmd
        .argv
        .iter()
        .filter_map(|arg| CString::new(arg.as_str()).ok())
        .collect();

    let program = external::resolve_program(env, cmd.name())
        .and_then(|path| CString::new(path.as_os_str().as_bytes()).ok());

    let errno = match program {
        Some(path) => match execve(&path, &argv, envp) {
            Err(errno) => errno,
            Ok(infallible) => match infallible {},
        },
        None => nix::errno::Errno::ENOENT,
    };

    eprintln!("{}", ShellError::ExecLaunchFailed(errno));
    process::exit(127);
}

/// Run a pipeline in the foreground, one segment at a time, and put the
/// shell's own streams back when done.
pub fn run_pipeline(env: &Environment, pipeline: &[CommandSpec]) -> Result<(), ShellError> {
    let saved = SavedStdio::save()?;
    let result = run_segments(env, pipeline);
    let restored = saved.restore();
    result.and(restored)
}

fn run_segments(env: &Environment, pipeline: &[CommandSpec]) -> Result<(), ShellError> {
    let envp = env.export();
    let mut pipe_in: Option<OwnedFd> = None;

    for cmd in pipeline {
        let redirs = open_redirections(cmd)?;

        let (pipe_read, pipe_write) = if cmd.pipe_out {
            let (r, w) = pipe().map_err(ShellError::PipeFailed)?;
            (Some(r), Some(w))
        } else {
            (None, None)
        };

        debug!("spawning segment {:?}", cmd.argv);
        match unsafe { fork() }.map_err(ShellError::ForkFailed)? {
            ForkResult::Child => {
                // The read end of this segment's own output pipe belongs
                // to the next segment, not to this child.
                drop(pipe_read);
                if let Err(errno) =
                    wire_child_channels(&redirs, pipe_in.as_ref(), pipe_write.as_ref())
                {
                    eprintln!("{}", ShellError::DupFailed(errno));
                    process::exit(1);
                }
                drop(pipe_in.take());
                drop(pipe_write);
                drop(redirs);
                exec_program(env, cmd, &envp)
            }
            ForkResult::Parent { child } => {
                drop(pipe_write);
                drop(redirs);
                pipe_in = pipe_read;
                let status = waitpid(child, None).map_err(ShellError::WaitFailed)?;
                trace!("segment pid {} finished: {:?}", child, status);
            }
        }
    }

    Ok(())
}
