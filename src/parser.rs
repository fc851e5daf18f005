//! Assembly of token lists into validated command descriptors.
//!
//! The lexer hands over a flat token list per segment; this pass re-tags
//! redirection filenames, pulls the redirections out of the argument
//! vector, assigns pipe flags from the segment's position, and enforces
//! the channel rules: each stream bound at most once, and never both a
//! pipe and a file on the same stream.

use crate::command::{CommandSpec, Pipeline, StdinSource, StdoutSink};
use crate::error::ShellError;
use crate::lexer::{self, Token, TokenKind};
use std::path::PathBuf;

/// Parse a full command line into a pipeline of command descriptors.
pub fn parse_pipeline(line: &str) -> Result<Pipeline, ShellError> {
    let segments = lexer::split_segments(line);
    let total = segments.len();

    let mut pipeline = Vec::with_capacity(total);
    for (index, segment) in segments.iter().enumerate() {
        let tokens = lexer::tokenize(segment);
        pipeline.push(assemble(tokens, index, total)?);
    }
    Ok(pipeline)
}

struct Assembler {
    tokens: Vec<Token>,
}

impl Assembler {
    /// Walk the list once, converting the token after each redirection
    /// operator into the matching filename kind and dropping the operator.
    /// An operator with nothing after it is a malformed line.
    fn retag_redirections(&mut self) -> Result<(), ShellError> {
        let mut retagged = Vec::with_capacity(self.tokens.len());
        let mut pending: Option<TokenKind> = None;

        for mut token in self.tokens.drain(..) {
            if let Some(kind) = pending.take() {
                token.kind = kind;
                retagged.push(token);
                continue;
            }
            if token.kind == TokenKind::Redir {
                pending = Some(match token.text.as_str() {
                    "<" => TokenKind::FnameIn,
                    ">" => TokenKind::FnameOutTrunc,
                    _ => TokenKind::FnameOutAppend,
                });
            } else {
                retagged.push(token);
            }
        }

        if pending.is_some() {
            return Err(ShellError::MalformedCmdline);
        }
        self.tokens = retagged;
        Ok(())
    }

    /// Move filename tokens into the descriptor's channels, leaving only
    /// the argument words behind. Binding a channel twice is malformed.
    fn extract_redirections(
        &mut self,
        cmd: &mut CommandSpec,
    ) -> Result<(), ShellError> {
        let mut argv_tokens = Vec::with_capacity(self.tokens.len());

        for token in self.tokens.drain(..) {
            match token.kind {
                TokenKind::Normal => argv_tokens.push(token),
                TokenKind::FnameIn => {
                    if cmd.stdin_source != StdinSource::Inherit || token.text.is_empty() {
                        return Err(ShellError::MalformedCmdline);
                    }
                    cmd.stdin_source = StdinSource::File(PathBuf::from(token.text));
                }
                TokenKind::FnameOutTrunc => {
                    if cmd.stdout_sink != StdoutSink::Inherit || token.text.is_empty() {
                        return Err(ShellError::MalformedCmdline);
                    }
                    cmd.stdout_sink = StdoutSink::Truncate(PathBuf::from(token.text));
                }
                TokenKind::FnameOutAppend => {
                    if cmd.stdout_sink != StdoutSink::Inherit || token.text.is_empty() {
                        return Err(ShellError::MalformedCmdline);
                    }
                    cmd.stdout_sink = StdoutSink::Append(PathBuf::from(token.text));
                }
                TokenKind::Redir => return Err(ShellError::MalformedCmdline),
            }
        }

        self.tokens = argv_tokens;
        Ok(())
    }
}

/// Assemble one segment's tokens into a command descriptor. `index` and
/// `total` place the segment within its pipeline and determine the pipe
/// flags.
fn assemble(tokens: Vec<Token>, index: usize, total: usize) -> Result<CommandSpec, ShellError> {
    let mut assembler = Assembler { tokens };
    assembler.retag_redirections()?;

    let mut cmd = CommandSpec::from_argv(Vec::new());
    assembler.extract_redirections(&mut cmd)?;

    cmd.pipe_in = index > 0;
    cmd.pipe_out = index + 1 < total;

    // A pipe and a file redirection cannot share a channel.
    if cmd.pipe_in && cmd.stdin_source != StdinSource::Inherit {
        return Err(ShellError::MalformedCmdline);
    }
    if cmd.pipe_out && cmd.stdout_sink != StdoutSink::Inherit {
        return Err(ShellError::MalformedCmdline);
    }

    cmd.argv = assembler.tokens.into_iter().map(|t| t.text).collect();
    if cmd.argv.is_empty() {
        return Err(ShellError::MalformedCmdline);
    }

    Ok(cmd)
}
