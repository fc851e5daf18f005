//! The background job queue.
//!
//! `queue CMD ARG...` hands a command descriptor here; the descriptor is
//! rewired to read from `/dev/null` and write to a unique capture file
//! under `/tmp`, then waits its turn. One job runs at a time in a forked
//! worker; a SIGCHLD listener thread reaps the worker, marks the job
//! complete, and starts the next one. `status`, `output` and `cancel`
//! operate on the same shared queue.

use crate::builtin;
use crate::command::{CommandSpec, Status, StdinSource, StdoutSink};
use crate::env::Environment;
use crate::error::ShellError;
use crate::executor;
use log::{debug, trace};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{close, fork, mkstemp, ForkResult, Pid};
use signal_hook::consts::signal::SIGCHLD;
use signal_hook::iterator::Signals;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::sync::{Arc, Mutex};
use std::thread;

const CAPTURE_TEMPLATE: &str = "/tmp/background_cmd_XXXXXXXX";

/// One background job: the rewired command, the environment snapshot it
/// will run under, and the path of the capture file that collects its
/// stdout. The worker child opens the capture file through the same
/// redirection path the foreground executor uses.
struct QueueItem {
    job_id: u32,
    pid: Option<Pid>,
    is_complete: bool,
    outfile: PathBuf,
    command: CommandSpec,
    env: Environment,
}

impl QueueItem {
    fn is_running(&self) -> bool {
        self.pid.is_some() && !self.is_complete
    }
}

/// Jobs in enqueue order. Ids are assigned once, start at 0, and only
/// grow; at most one item is running at any moment.
pub(crate) struct JobQueue {
    items: Vec<QueueItem>,
    next_job_id: u32,
}

pub(crate) type QueueHandle = Arc<Mutex<JobQueue>>;

pub(crate) fn new_handle() -> QueueHandle {
    Arc::new(Mutex::new(JobQueue::new()))
}

impl JobQueue {
    pub(crate) fn new() -> Self {
        JobQueue {
            items: Vec::new(),
            next_job_id: 0,
        }
    }

    fn running_job(&self) -> Option<&QueueItem> {
        self.items.iter().find(|item| item.is_running())
    }

    /// Launch the first job that is neither started nor complete. Called
    /// with the queue lock held, from enqueue and from the reaper.
    fn start_next(&mut self) {
        let Some(item) = self
            .items
            .iter_mut()
            .find(|item| item.pid.is_none() && !item.is_complete)
        else {
            return;
        };

        match unsafe { fork() } {
            Ok(ForkResult::Child) => run_job_child(&item.command, &item.env),
            Ok(ForkResult::Parent { child }) => {
                debug!("job {} started as pid {}", item.job_id, child);
                item.pid = Some(child);
            }
            Err(errno) => eprintln!("{}", ShellError::ForkFailed(errno)),
        }
    }

    /// Non-blocking sweep over every started job. Normal exits mark the
    /// job complete; a SIGKILL death is a cancellation and removes the
    /// job together with its capture file. Afterwards the next eligible
    /// job is launched if the running slot is free.
    fn reap(&mut self) {
        let mut index = 0;
        while index < self.items.len() {
            let item = &mut self.items[index];
            let pid = match (item.pid, item.is_complete) {
                (Some(pid), false) => pid,
                _ => {
                    index += 1;
                    continue;
                }
            };

            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => {}
                Ok(WaitStatus::Signaled(_, Signal::SIGKILL, _)) => {
                    let job_id = item.job_id;
                    trace!("job {} killed", job_id);
                    let _ = fs::remove_file(&item.outfile);
                    self.items.remove(index);
                    println!("{} is canceled", job_id);
                    continue;
                }
                Ok(status) => {
                    trace!("job {} finished: {:?}", item.job_id, status);
                    item.is_complete = true;
                }
                Err(_) => {
                    // the child is gone (reaped elsewhere); don't let the
                    // queue stall on it
                    item.is_complete = true;
                }
            }
            index += 1;
        }

        if self.running_job().is_none() {
            self.start_next();
        }
    }
}

/// The worker child. The rewired descriptor already names both channels
/// (`/dev/null` in, the capture file out), so they are opened and wired
/// by the foreground executor's own redirection code; then the command
/// runs builtin-or-external. Never returns.
fn run_job_child(cmd: &CommandSpec, env: &Environment) -> ! {
    let redirs = match executor::open_redirections(cmd) {
        Ok(redirs) => redirs,
        Err(err) => {
            eprintln!("{}", err);
            process::exit(1);
        }
    };
    if let Err(errno) = executor::wire_child_channels(&redirs, None, None) {
        eprintln!("{}", ShellError::DupFailed(errno));
        process::exit(1);
    }
    drop(redirs);

    if builtin::is_builtin_name(cmd.name()) {
        let mut env = env.clone();
        let mut out = io::stdout();
        let status = builtin::run_detached(cmd, &mut env, &mut out);
        let _ = out.flush();
        process::exit(if status == Status::Success { 0 } else { 1 });
    }

    let envp = env.export();
    executor::exec_program(env, cmd, &envp)
}

/// Rewire a validated command for background capture and append it to
/// the queue, starting it immediately when nothing else is running.
/// Returns the assigned job id.
pub(crate) fn enqueue(
    handle: &QueueHandle,
    mut command: CommandSpec,
    env: Environment,
) -> Result<u32, ShellError> {
    command.stdin_source = StdinSource::File(PathBuf::from("/dev/null"));

    let (fd, outfile) = mkstemp(CAPTURE_TEMPLATE)
        .map_err(|errno| ShellError::BadOutFile {
            source: io::Error::from_raw_os_error(errno as i32),
        })?;
    // the file only needs to exist; the worker reopens it by path
    let _ = close(fd);
    command.stdout_sink = StdoutSink::Truncate(outfile.clone());

    let mut queue = handle.lock().unwrap();
    let job_id = queue.next_job_id;
    queue.next_job_id += 1;
    queue.items.push(QueueItem {
        job_id,
        pid: None,
        is_complete: false,
        outfile,
        command,
        env,
    });

    if queue.running_job().is_none() {
        queue.start_next();
    }
    Ok(job_id)
}

/// Spawn the SIGCHLD listener that advances the queue. The listener is a
/// plain thread consuming a signal iterator, so all queue bookkeeping
/// happens under the ordinary mutex rather than in async-signal context.
pub(crate) fn install_sigchld_handler(handle: QueueHandle) -> anyhow::Result<()> {
    let mut signals = Signals::new([SIGCHLD])?;
    thread::spawn(move || {
        for _signal in signals.forever() {
            handle.lock().unwrap().reap();
        }
    });
    Ok(())
}

/// One line per job, in enqueue order.
pub(crate) fn print_status(handle: &QueueHandle, out: &mut dyn Write) -> io::Result<()> {
    let queue = handle.lock().unwrap();
    for item in &queue.items {
        if item.is_complete {
            writeln!(out, "{} is complete", item.job_id)?;
        } else {
            match item.pid {
                Some(pid) => writeln!(out, "{} is running as pid {}", item.job_id, pid)?,
                None => writeln!(out, "{} - is queued", item.job_id)?,
            }
        }
    }
    Ok(())
}

/// Stream a completed job's captured output, then delete the capture
/// file and drop the job from the queue.
pub(crate) fn recall_output(
    handle: &QueueHandle,
    job: u32,
    out: &mut dyn Write,
) -> Result<(), ShellError> {
    let mut queue = handle.lock().unwrap();
    let position = queue
        .items
        .iter()
        .position(|item| item.job_id == job)
        .ok_or(ShellError::UnknownJob(job))?;

    let item = &queue.items[position];
    if !item.is_complete {
        return Err(if item.pid.is_some() {
            ShellError::OutputStillRunning(job)
        } else {
            ShellError::OutputStillQueued(job)
        });
    }

    let mut captured =
        File::open(&item.outfile).map_err(|source| ShellError::BadInFile { source })?;
    io::copy(&mut captured, out).map_err(|source| ShellError::BadInFile { source })?;

    let item = queue.items.remove(position);
    let _ = fs::remove_file(&item.outfile);
    Ok(())
}

/// Cancel a job: a queued one is removed on the spot, a running one gets
/// SIGKILL (the reaper finishes the cleanup), a complete one is refused.
pub(crate) fn cancel(handle: &QueueHandle, job: u32) -> Result<(), ShellError> {
    let mut queue = handle.lock().unwrap();
    let position = queue
        .items
        .iter()
        .position(|item| item.job_id == job)
        .ok_or(ShellError::UnknownJob(job))?;

    let item = &queue.items[position];
    if item.is_complete {
        return Err(ShellError::CancelAlreadyDone(job));
    }

    match item.pid {
        Some(pid) => {
            println!("{} sending kill signal to pid {}", job, pid);
            let _ = kill(pid, Signal::SIGKILL);
        }
        None => {
            let item = queue.items.remove(position);
            let _ = fs::remove_file(&item.outfile);
            println!("{} is canceled", job);
        }
    }
    Ok(())
}

/// Shell-exit cleanup: every remaining capture file is removed.
pub(crate) fn cleanup(handle: &QueueHandle) {
    let mut queue = handle.lock().unwrap();
    for item in queue.items.drain(..) {
        let _ = fs::remove_file(&item.outfile);
    }
}
