//! The shell facade: one `Shell` owns the environment, the background
//! queue and the builtin registry, and turns accepted lines into running
//! commands. The interactive prompt loop and the startup-rc reader live
//! here too.

use crate::builtin::{self, BuiltinCtx, BuiltinFactory};
use crate::command::{CommandSpec, Status};
use crate::env::Environment;
use crate::executor;
use crate::parser;
use crate::queue::{self, QueueHandle};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

pub struct Shell {
    env: Environment,
    queue: QueueHandle,
    builtins: Vec<Box<dyn BuiltinFactory>>,
}

impl Shell {
    /// Capture the inherited environment, start the SIGCHLD listener that
    /// advances the background queue, and set up the builtin table.
    pub fn new() -> anyhow::Result<Self> {
        let queue = queue::new_handle();
        queue::install_sigchld_handler(queue.clone())?;
        Ok(Shell {
            env: Environment::from_process(),
            queue,
            builtins: builtin::registry(),
        })
    }

    /// Execute one accepted command line and report what the prompt loop
    /// should do next. Diagnostics have already been printed when this
    /// returns `Error`.
    pub fn do_command(&mut self, line: &str) -> Status {
        let mut out = io::stdout();
        let status = self.do_command_to(line, &mut out);
        let _ = out.flush();
        status
    }

    /// Same as [`do_command`](Self::do_command) with builtin output routed
    /// to an arbitrary stream.
    pub fn do_command_to(&mut self, line: &str, out: &mut dyn Write) -> Status {
        let pipeline = match parser::parse_pipeline(line) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                eprintln!("{}", err);
                return Status::Error;
            }
        };

        if self.is_builtin(pipeline[0].name()) {
            self.run_builtin(&pipeline[0], out)
        } else {
            match executor::run_pipeline(&self.env, &pipeline) {
                Ok(()) => Status::Success,
                Err(err) => {
                    eprintln!("{}", err);
                    Status::Error
                }
            }
        }
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtins.iter().any(|factory| factory.name() == name)
    }

    fn run_builtin(&mut self, cmd: &CommandSpec, out: &mut dyn Write) -> Status {
        let Some(factory) = self
            .builtins
            .iter()
            .find(|factory| factory.name() == cmd.name())
        else {
            return Status::Error;
        };

        let mut ctx = BuiltinCtx {
            cmd,
            env: &mut self.env,
            queue: &self.queue,
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

    /// The interactive prompt loop. Returns once `exit` runs or input
    /// reaches end-of-file; queued jobs' capture files are cleaned up on
    /// the way out and the history file is saved best-effort.
    pub fn repl(&mut self) -> rustyline::Result<()> {
        let mut rl = DefaultEditor::new()?;
        let history = self
            .env
            .get("HOME")
            .map(|home| Path::new(home).join(".sush_history"));
        if let Some(history) = &history {
            let _ = rl.load_history(history);
        }

        loop {
            match rl.readline(&self.prompt()) {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(line.as_str());
                    if self.do_command(&line) == Status::ExitShell {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(err) => {
                    eprintln!("sush: {}", err);
                    break;
                }
            }
        }

        if let Some(history) = &history {
            let _ = rl.save_history(history);
        }
        queue::cleanup(&self.queue);
        Ok(())
    }

    /// Execute `$SUSHHOME/.sushrc` line by line before the first prompt,
    /// provided the file grants its owner read and execute permission.
    pub fn run_startup_rc(&mut self) {
        let Some(home) = self.env.get("SUSHHOME").map(str::to_string) else {
            return;
        };
        let rc = Path::new(&home).join(".sushrc");

        let Ok(metadata) = fs::metadata(&rc) else {
            return;
        };
        if metadata.permissions().mode() & 0o500 != 0o500 {
            return;
        }
        let Ok(contents) = fs::read_to_string(&rc) else {
            return;
        };

        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if self.do_command(line) == Status::ExitShell {
                break;
            }
        }
    }

    fn prompt(&self) -> String {
        self.env.get("PS1").unwrap_or(">").to_string()
    }
}
