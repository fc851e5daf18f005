//! A small interactive Unix shell.
//!
//! A command line is tokenized by a character-driven state machine,
//! assembled into a validated pipeline of command descriptors, and either
//! handled in-process by a builtin or executed by a fork/exec engine with
//! pipe and file-redirection wiring. The `queue` builtin places a command
//! into a single-worker background queue that captures its output for
//! later recall.
//!
//! The main entry point is [`Shell`], which owns the environment store,
//! the background queue and the builtin table; the public modules
//! [`command`] and [`env`] expose the command-descriptor and environment
//! types.

mod builtin;
pub mod command;
pub mod env;
mod error;
mod executor;
mod external;
mod interpreter;
mod lexer;
mod parser;
mod queue;

pub use command::Status;
pub use error::ShellError;
pub use interpreter::Shell;
