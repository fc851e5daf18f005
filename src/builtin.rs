//! Commands that run inside the shell process.
//!
//! Builtins are parsed with [`argh`] (`FromArgs`) and executed directly,
//! never forked (except when one is queued as a background job, in which
//! case the queue's worker child runs it against its own snapshot of the
//! environment). The dispatch table is closed: a fixed registry of
//! factories, scanned by name.

use crate::command::{CommandSpec, Status};
use crate::env::Environment;
use crate::error::ShellError;
use crate::queue::{self, QueueHandle};
use anyhow::{Context, Result};
use argh::{EarlyExit, FromArgs};
use log::debug;
use std::env as stdenv;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// Everything a builtin may touch while it runs: the descriptor it was
/// dispatched from (for channel validation), the mutable environment, the
/// background queue, and the stream its regular output goes to.
pub(crate) struct BuiltinCtx<'a> {
    pub cmd: &'a CommandSpec,
    pub env: &'a mut Environment,
    pub queue: &'a QueueHandle,
    pub out: &'a mut dyn Write,
}

/// A builtin command known to the shell at compile time.
///
/// Diagnostics go to stderr; regular output goes to `ctx.out`. The return
/// value follows the runner contract: `Success`, `Error` after a printed
/// diagnostic, or `ExitShell`.
pub(crate) trait Builtin: Sized + FromArgs {
    /// Canonical name, e.g. "setenv" or "cd".
    fn name() -> &'static str;

    fn run(self, ctx: &mut BuiltinCtx<'_>) -> Result<Status>;
}

/// Object-safe wrapper so heterogeneous builtins can share one registry.
pub(crate) trait BuiltinFactory {
    fn name(&self) -> &'static str;
    fn invoke(&self, ctx: &mut BuiltinCtx<'_>) -> Result<Status>;
}

pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<T: Builtin> BuiltinFactory for Factory<T> {
    fn name(&self) -> &'static str {
        T::name()
    }

    fn invoke(&self, ctx: &mut BuiltinCtx<'_>) -> Result<Status> {
        let args: Vec<&str> = ctx.cmd.argv[1..].iter().map(String::as_str).collect();
        match T::from_args(&[T::name()], &args) {
            Ok(cmd) => cmd.run(ctx),
            Err(EarlyExit { output, status }) => {
                // argh already produced the usage text; a parse failure is
                // a wrong-argument diagnostic, `--help` is regular output.
                if status.is_err() {
                    eprintln!("{}", output.trim_end());
                    Ok(Status::Error)
                } else {
                    writeln!(ctx.out, "{}", output.trim_end())?;
                    Ok(Status::Success)
                }
            }
        }
    }
}

/// The closed builtin table. Order matters only for `--help` listings.
pub(crate) fn registry() -> Vec<Box<dyn BuiltinFactory>> {
    vec![
        Box::new(Factory::<Setenv>::default()),
        Box::new(Factory::<Getenv>::default()),
        Box::new(Factory::<Unsetenv>::default()),
        Box::new(Factory::<Cd>::default()),
        Box::new(Factory::<Pwd>::default()),
        Box::new(Factory::<Exit>::default()),
        Box::new(Factory::<Queue>::default()),
        Box::new(Factory::<QueueStatus>::default()),
        Box::new(Factory::<Output>::default()),
        Box::new(Factory::<Cancel>::default()),
    ]
}

pub(crate) fn is_builtin_name(name: &str) -> bool {
    registry().iter().any(|f| f.name() == name)
}

/// Dispatch a builtin against a detached (empty) queue. Used by the
/// background worker child, where the real queue must not be touched.
pub(crate) fn run_detached(cmd: &CommandSpec, env: &mut Environment, out: &mut dyn Write) -> Status {
    let detached = queue::new_handle();
    let registry = registry();
    let Some(factory) = registry.iter().find(|f| f.name() == cmd.name()) else {
        return Status::Error;
    };
    let mut ctx = BuiltinCtx {
        cmd,
        env,
        queue: &detached,
        out,
    };
    match factory.invoke(&mut ctx) {
        Ok(status) => status,
        Err(err) => {
            eprintln!("{:#}", err);
            Status::Error
        }
    }
}

#[derive(FromArgs)]
/// Set an environment variable.
struct Setenv {
    #[argh(positional)]
    /// variable name
    name: String,

    #[argh(positional)]
    /// value to assign
    value: String,
}

impl Builtin for Setenv {
    fn name() -> &'static str {
        "setenv"
    }

    fn run(self, ctx: &mut BuiltinCtx<'_>) -> Result<Status> {
        ctx.env.set(self.name, self.value);
        Ok(Status::Success)
    }
}

#[derive(FromArgs)]
/// Print one environment variable as NAME=VALUE, or all of them.
struct Getenv {
    #[argh(positional)]
    /// variable to look up; prints every variable when omitted
    name: Option<String>,
}

impl Builtin for Getenv {
    fn name() -> &'static str {
        "getenv"
    }

    fn run(self, ctx: &mut BuiltinCtx<'_>) -> Result<Status> {
        match self.name {
            None => ctx.env.print(ctx.out)?,
            Some(name) => match ctx.env.get(&name) {
                Some(value) => writeln!(ctx.out, "{}={}", name, value)?,
                None => return Err(ShellError::UnknownVariable(name).into()),
            },
        }
        Ok(Status::Success)
    }
}

#[derive(FromArgs)]
/// Remove an environment variable. Removing an absent name is a no-op.
struct Unsetenv {
    #[argh(positional)]
    /// variable name
    name: String,
}

impl Builtin for Unsetenv {
    fn name() -> &'static str {
        "unsetenv"
    }

    fn run(self, ctx: &mut BuiltinCtx<'_>) -> Result<Status> {
        ctx.env.remove(&self.name);
        Ok(Status::Success)
    }
}

#[derive(FromArgs)]
/// Change the working directory; defaults to $HOME when no target is
/// given. PWD is updated to the resolved directory afterwards.
struct Cd {
    #[argh(positional)]
    /// directory to switch to, absolute or relative
    target: Option<String>,
}

impl Builtin for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn run(self, ctx: &mut BuiltinCtx<'_>) -> Result<Status> {
        let target = match &self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => PathBuf::from(ctx.env.get("HOME").ok_or(ShellError::NoHome)?),
        };

        let new_dir = if target.is_absolute() {
            target
        } else {
            ctx.env.current_dir.join(target)
        };

        let canonical = fs::canonicalize(&new_dir)
            .with_context(|| format!("cd: can't canonicalize {}", new_dir.display()))?;
        stdenv::set_current_dir(&canonical)
            .with_context(|| format!("cd: can't chdir to {}", canonical.display()))?;

        ctx.env.set("PWD", canonical.to_string_lossy());
        ctx.env.current_dir = canonical;
        Ok(Status::Success)
    }
}

#[derive(FromArgs)]
/// Print the current working directory.
struct Pwd {}

impl Builtin for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn run(self, ctx: &mut BuiltinCtx<'_>) -> Result<Status> {
        writeln!(ctx.out, "{}", ctx.env.current_dir.to_string_lossy())?;
        Ok(Status::Success)
    }
}

#[derive(FromArgs)]
/// Leave the shell.
struct Exit {}

impl Builtin for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn run(self, _ctx: &mut BuiltinCtx<'_>) -> Result<Status> {
        Ok(Status::ExitShell)
    }
}

#[derive(FromArgs)]
/// Run a command in the background queue, capturing its output for later
/// recall with `output`.
struct Queue {
    #[argh(positional, greedy)]
    /// the command and its arguments
    words: Vec<String>,
}

impl Builtin for Queue {
    fn name() -> &'static str {
        "queue"
    }

    fn run(self, ctx: &mut BuiltinCtx<'_>) -> Result<Status> {
        // The queue owns both channels of a background job; a command that
        // already pipes or redirects cannot be queued.
        if !ctx.cmd.has_default_channels() {
            return Err(ShellError::QueueReject.into());
        }
        if self.words.is_empty() {
            return Err(ShellError::BuiltinArgCount {
                builtin: "queue",
                expected: "a command to run",
            }
            .into());
        }

        let job = queue::enqueue(ctx.queue, CommandSpec::from_argv(self.words), ctx.env.clone())?;
        debug!("queued job {}", job);
        Ok(Status::Success)
    }
}

#[derive(FromArgs)]
/// Show the state of every job in the background queue.
struct QueueStatus {}

impl Builtin for QueueStatus {
    fn name() -> &'static str {
        "status"
    }

    fn run(self, ctx: &mut BuiltinCtx<'_>) -> Result<Status> {
        queue::print_status(ctx.queue, ctx.out)?;
        Ok(Status::Success)
    }
}

/// Job-id arguments parse the way C's `atoi` does: leading digits count
/// and anything else (including out-of-range values) comes out as 0.
fn parse_job_id(arg: &str) -> u32 {
    let digits: String = arg
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().unwrap_or(0)
}

#[derive(FromArgs)]
/// Print the captured output of a completed job and forget the job.
struct Output {
    #[argh(positional)]
    /// job id as shown by status
    job: String,
}

impl Builtin for Output {
    fn name() -> &'static str {
        "output"
    }

    fn run(self, ctx: &mut BuiltinCtx<'_>) -> Result<Status> {
        queue::recall_output(ctx.queue, parse_job_id(&self.job), ctx.out)?;
        Ok(Status::Success)
    }
}

#[derive(FromArgs)]
/// Cancel a queued or running job.
struct Cancel {
    #[argh(positional)]
    /// job id as shown by status
    job: String,
}

impl Builtin for Cancel {
    fn name() -> &'static str {
        "cancel"
    }

    fn run(self, ctx: &mut BuiltinCtx<'_>) -> Result<Status> {
        queue::cancel(ctx.queue, parse_job_id(&self.job))?;
        Ok(Status::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::StdoutSink;
    use crate::testutil::lock_process_state;
    use std::io::Cursor;
    use std::path::Path;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn spec(words: &[&str]) -> CommandSpec {
        CommandSpec::from_argv(words.iter().map(|w| w.to_string()).collect())
    }

    fn run(cmd: &CommandSpec, env: &mut Environment) -> (Status, String) {
        let mut out = Cursor::new(Vec::new());
        let status = run_detached(cmd, env, &mut out);
        (status, String::from_utf8(out.into_inner()).unwrap())
    }

    #[test]
    fn builtin_names_are_recognized() {
        for name in [
            "setenv", "getenv", "unsetenv", "cd", "pwd", "exit", "queue", "status", "output",
            "cancel",
        ] {
            assert!(is_builtin_name(name), "{name} should be a builtin");
        }
        assert!(!is_builtin_name("ls"));
        assert!(!is_builtin_name("echo"));
    }

    #[test]
    fn setenv_then_getenv_round_trips() {
        let mut env = Environment::from_pairs(Vec::<String>::new());

        let (status, _) = run(&spec(&["setenv", "FOO", "bar"]), &mut env);
        assert_eq!(status, Status::Success);

        let (status, out) = run(&spec(&["getenv", "FOO"]), &mut env);
        assert_eq!(status, Status::Success);
        assert_eq!(out, "FOO=bar\n");
    }

    #[test]
    fn getenv_without_args_lists_everything() {
        let mut env = Environment::from_pairs(["A=1", "B=2"]);
        let (status, out) = run(&spec(&["getenv"]), &mut env);
        assert_eq!(status, Status::Success);
        assert_eq!(out, "A=1\nB=2\n");
    }

    #[test]
    fn getenv_unknown_variable_is_an_error() {
        let mut env = Environment::from_pairs(Vec::<String>::new());
        let (status, out) = run(&spec(&["getenv", "NOPE"]), &mut env);
        assert_eq!(status, Status::Error);
        assert!(out.is_empty());
    }

    #[test]
    fn unsetenv_removes_and_tolerates_absent() {
        let mut env = Environment::from_pairs(["GONE=soon"]);
        let (status, _) = run(&spec(&["unsetenv", "GONE"]), &mut env);
        assert_eq!(status, Status::Success);
        assert!(!env.exists("GONE"));

        let (status, _) = run(&spec(&["unsetenv", "GONE"]), &mut env);
        assert_eq!(status, Status::Success);
    }

    #[test]
    fn wrong_argument_counts_are_rejected() {
        let mut env = Environment::from_pairs(Vec::<String>::new());
        for words in [
            &["setenv", "ONLY_NAME"][..],
            &["setenv", "A", "B", "C"][..],
            &["unsetenv"][..],
            &["pwd", "extra"][..],
            &["exit", "now"][..],
            &["output"][..],
            &["cancel", "one", "two"][..],
        ] {
            let (status, _) = run(&spec(words), &mut env);
            assert_eq!(status, Status::Error, "expected error for {:?}", words);
        }
    }

    #[test]
    fn job_id_arguments_parse_like_atoi() {
        assert_eq!(parse_job_id("7"), 7);
        assert_eq!(parse_job_id(" 12"), 12);
        assert_eq!(parse_job_id("3rd"), 3);
        assert_eq!(parse_job_id("abc"), 0);
        assert_eq!(parse_job_id(""), 0);
        assert_eq!(parse_job_id("99999999999999999999"), 0);
    }

    #[test]
    fn non_numeric_job_id_falls_back_to_job_zero() {
        let mut env = Environment::from_pairs(Vec::<String>::new());
        // "abc" parses to job 0; with nothing queued that job is unknown
        let (status, _) = run(&spec(&["output", "abc"]), &mut env);
        assert_eq!(status, Status::Error);
        let (status, _) = run(&spec(&["cancel", "abc"]), &mut env);
        assert_eq!(status, Status::Error);
    }

    #[test]
    fn exit_requests_shell_teardown() {
        let mut env = Environment::from_pairs(Vec::<String>::new());
        let (status, _) = run(&spec(&["exit"]), &mut env);
        assert_eq!(status, Status::ExitShell);
    }

    #[test]
    fn pwd_prints_the_tracked_directory() {
        let mut env = Environment::from_pairs(Vec::<String>::new());
        env.current_dir = PathBuf::from("/somewhere/particular");
        let (status, out) = run(&spec(&["pwd"]), &mut env);
        assert_eq!(status, Status::Success);
        assert_eq!(out, "/somewhere/particular\n");
    }

    fn make_unique_temp_dir() -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let p = stdenv::temp_dir().join(format!("sush_cd_{}_{}", std::process::id(), nanos));
        fs::create_dir_all(&p).unwrap();
        p
    }

    #[test]
    fn cd_to_absolute_path_updates_pwd() {
        let _lock = lock_process_state();
        let temp = make_unique_temp_dir();
        let canonical = fs::canonicalize(&temp).unwrap();
        let orig = stdenv::current_dir().unwrap();

        let mut env = Environment::from_pairs(Vec::<String>::new());
        env.current_dir = orig.clone();

        let (status, _) = run(
            &spec(&["cd", &canonical.to_string_lossy()]),
            &mut env,
        );
        assert_eq!(status, Status::Success);
        assert_eq!(env.current_dir, canonical);
        assert_eq!(env.get("PWD"), Some(&*canonical.to_string_lossy()));

        stdenv::set_current_dir(orig).unwrap();
        let _ = fs::remove_dir_all(temp);
    }

    #[test]
    fn cd_relative_path_stores_absolute_pwd() {
        let _lock = lock_process_state();
        let temp = make_unique_temp_dir();
        fs::create_dir_all(temp.join("nested")).unwrap();
        let orig = stdenv::current_dir().unwrap();
        stdenv::set_current_dir(&temp).unwrap();

        let mut env = Environment::from_pairs(Vec::<String>::new());
        env.current_dir = fs::canonicalize(&temp).unwrap();

        let (status, _) = run(&spec(&["cd", "nested"]), &mut env);
        assert_eq!(status, Status::Success);
        let pwd = env.get("PWD").unwrap();
        assert!(Path::new(pwd).is_absolute());
        assert!(pwd.ends_with("nested"));

        stdenv::set_current_dir(orig).unwrap();
        let _ = fs::remove_dir_all(temp);
    }

    #[test]
    fn cd_without_home_is_an_error() {
        let _lock = lock_process_state();
        let mut env = Environment::from_pairs(Vec::<String>::new());
        let (status, _) = run(&spec(&["cd"]), &mut env);
        assert_eq!(status, Status::Error);
    }

    #[test]
    fn cd_uses_home_when_no_target_given() {
        let _lock = lock_process_state();
        let temp = make_unique_temp_dir();
        let canonical = fs::canonicalize(&temp).unwrap();
        let orig = stdenv::current_dir().unwrap();

        let mut env = Environment::from_pairs([format!("HOME={}", canonical.display())]);
        env.current_dir = orig.clone();

        let (status, _) = run(&spec(&["cd"]), &mut env);
        assert_eq!(status, Status::Success);
        assert_eq!(env.current_dir, canonical);

        stdenv::set_current_dir(orig).unwrap();
        let _ = fs::remove_dir_all(temp);
    }

    #[test]
    fn cd_nonexistent_target_is_an_error() {
        let _lock = lock_process_state();
        let orig = stdenv::current_dir().unwrap();
        let mut env = Environment::from_pairs(Vec::<String>::new());
        env.current_dir = orig.clone();

        let (status, _) = run(&spec(&["cd", "no_such_dir_for_sush_tests"]), &mut env);
        assert_eq!(status, Status::Error);
        assert_eq!(stdenv::current_dir().unwrap(), orig);
    }

    fn run_with_queue(
        cmd: &CommandSpec,
        env: &mut Environment,
        queue: &QueueHandle,
    ) -> (Status, String) {
        let mut out = Cursor::new(Vec::new());
        let registry = registry();
        let factory = registry
            .iter()
            .find(|f| f.name() == cmd.name())
            .expect("builtin");
        let mut ctx = BuiltinCtx {
            cmd,
            env,
            queue,
            out: &mut out,
        };
        let status = match factory.invoke(&mut ctx) {
            Ok(status) => status,
            Err(err) => {
                eprintln!("{:#}", err);
                Status::Error
            }
        };
        (status, String::from_utf8(out.into_inner()).unwrap())
    }

    #[test]
    fn non_numeric_cancel_acts_on_job_zero() {
        let _lock = lock_process_state();
        let handle = queue::new_handle();
        let mut env = Environment::from_pairs(["PATH=/bin:/usr/bin"]);
        queue::enqueue(
            &handle,
            CommandSpec::from_argv(vec!["sleep".into(), "30".into()]),
            env.clone(),
        )
        .unwrap();

        // "abc" resolves to job 0, the running sleep, and cancels it
        let (status, _) = run_with_queue(&spec(&["cancel", "abc"]), &mut env, &handle);
        assert_eq!(status, Status::Success);

        queue::cleanup(&handle);
    }

    #[test]
    fn queued_command_may_not_redirect() {
        let mut env = Environment::from_pairs(Vec::<String>::new());
        let mut cmd = spec(&["queue", "echo", "hi"]);
        cmd.stdout_sink = StdoutSink::Truncate(PathBuf::from("somewhere"));

        let (status, _) = run(&cmd, &mut env);
        assert_eq!(status, Status::Error);
    }

    #[test]
    fn queued_command_may_not_pipe() {
        let mut env = Environment::from_pairs(Vec::<String>::new());
        let mut cmd = spec(&["queue", "echo", "hi"]);
        cmd.pipe_out = true;

        let (status, _) = run(&cmd, &mut env);
        assert_eq!(status, Status::Error);
    }

    #[test]
    fn queue_without_a_command_is_an_error() {
        let mut env = Environment::from_pairs(Vec::<String>::new());
        let (status, _) = run(&spec(&["queue"]), &mut env);
        assert_eq!(status, Status::Error);
    }
}
