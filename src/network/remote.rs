//! The two protocols for running a command on a remote host.
//!
//! # Direct execution ([ShellMode::Exec])
//!
//! The command runs as `cd <cwd> && <command>` in a single request. Its exit status decides what
//! happens next: on success its standard output is forwarded, on failure its standard error is
//! forwarded and [Error::RemoteCommandFailed] is returned. This is the default.
//!
//! # Interactive shell ([ShellMode::Interactive])
//!
//! Some commands only work with the state an interactive shell sets up: aliases, or environment
//! variables sourced from `.bashrc`. For those hosts, the channel starts an interactive shell
//! and receives
//!
//! ```text
//! cd <cwd>
//! <command>
//! echo EOF
//! ```
//!
//! on its standard input. Standard output is forwarded as it arrives until the accumulated output
//! ends with the sentinel `EOF\n` (which is stripped) or the stream closes. Whatever standard
//! error is buffered at that point is forwarded afterwards. Exit statuses are not observed in this
//! mode, so a failing command is not reported as a failure.
//!
//! ## Known limitation
//!
//! Completion is detected by scanning for a literal marker. A command whose own output ends with
//! `EOF\n` at the end of a received chunk is mistaken for a completed command, and the rest of its
//! output is never read. Existing command sets may depend on this behavior, so it is kept as is.
//!
//! [ShellMode::Exec]: super::ShellMode::Exec
//! [ShellMode::Interactive]: super::ShellMode::Interactive

use super::{Channel, Recv, Stream, Transport};
use crate::error::{Error, Result};
use crate::terminal::Terminal;
use tracing::error;

/// The marker that signals the end of a command's output in an interactive shell.
pub const SENTINEL: &[u8] = b"EOF\n";

/// Opens a channel on `transport`, runs `f` on it, and closes the channel whatever `f` returns.
///
/// If both `f` and closing fail, the error from `f` wins.
pub fn with_channel<T>(
    transport: &mut dyn Transport,
    f: impl FnOnce(&mut dyn Channel) -> Result<T>,
) -> Result<T> {
    let mut channel = transport.open_channel()?;
    let outcome = f(channel.as_mut());
    let closed = channel.close();
    let value = outcome?;
    closed?;
    Ok(value)
}

/// Runs `command` in `cwd` with direct execution.
pub fn run_direct(
    transport: &mut dyn Transport,
    cwd: &str,
    command: &str,
    terminal: &mut dyn Terminal,
) -> Result<()> {
    with_channel(transport, |channel| {
        let output = channel.exec(&format!("cd {cwd} && {command}"))?;
        if output.status != 0 {
            error!("Command exited with status {}: {command}", output.status);
            terminal.stderr(&output.stderr)?;
            return Err(Error::RemoteCommandFailed {
                command: command.to_string(),
                status: output.status,
            });
        }
        terminal.stdout(&output.stdout)?;
        Ok(())
    })
}

/// Runs `command` in `cwd` through an interactive shell.
pub fn run_in_shell(
    transport: &mut dyn Transport,
    cwd: &str,
    command: &str,
    terminal: &mut dyn Terminal,
) -> Result<()> {
    with_channel(transport, |channel| {
        channel.invoke_shell()?;
        channel.send(format!("cd {cwd}\n{command}\necho EOF\n").as_bytes())?;

        let mut scanner = SentinelScanner::default();
        loop {
            match channel.recv(Stream::Stdout)? {
                Recv::Data(data) => match scanner.push(&data) {
                    Scan::Pending(output) => terminal.stdout(&output)?,
                    Scan::Done(output) => {
                        terminal.stdout(&output)?;
                        break;
                    }
                },
                // Nothing yet. The command is still running.
                Recv::Idle => {}
                Recv::Closed => {
                    terminal.stdout(&scanner.finish())?;
                    break;
                }
            }
        }

        // Forward whatever standard error is buffered, without waiting for more.
        while let Recv::Data(data) = channel.recv(Stream::Stderr)? {
            terminal.stderr(&data)?;
        }
        Ok(())
    })
}

/// The result of feeding a chunk of output to a [SentinelScanner].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Scan {
    /// The sentinel has not been seen yet. The contained bytes are safe to forward.
    Pending(Vec<u8>),

    /// The output ended with the sentinel. The contained bytes are the rest of the output, with
    /// the sentinel stripped.
    Done(Vec<u8>),
}

/// Detects the trailing [SENTINEL] in a stream of output chunks.
///
/// The sentinel may arrive split across chunks, so the scanner holds back any trailing bytes that
/// could be the start of the sentinel until the next chunk shows whether they are. Held-back bytes
/// are never lost: they are released by a later [Self::push] or by [Self::finish].
#[derive(Clone, Debug, Default)]
pub struct SentinelScanner {
    held: Vec<u8>,
}

impl SentinelScanner {
    /// Feeds the next chunk of output.
    pub fn push(&mut self, data: &[u8]) -> Scan {
        let mut buffer = std::mem::take(&mut self.held);
        buffer.extend_from_slice(data);

        if buffer.ends_with(SENTINEL) {
            buffer.truncate(buffer.len() - SENTINEL.len());
            return Scan::Done(buffer);
        }

        // Hold back the longest suffix that is a proper prefix of the sentinel.
        let keep = (1..SENTINEL.len())
            .rev()
            .find(|&n| buffer.ends_with(&SENTINEL[..n]))
            .unwrap_or(0);
        self.held = buffer.split_off(buffer.len() - keep);
        Scan::Pending(buffer)
    }

    /// Releases any held-back bytes once the stream has closed without a sentinel.
    pub fn finish(self) -> Vec<u8> {
        self.held
    }
}

#[cfg(test)]
mod test;
