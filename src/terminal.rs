//! Forwards the output of commands to the user.
//!
//! Log lines (command traces, upload notices, action timing) go through [tracing]. The output of
//! the commands themselves is a different thing: it belongs to the user's terminal, unadorned, so
//! that the output of a remote build looks the same as it would in an SSH session. [Terminal] is
//! the sink for that output.
//!
//! The arrangement mirrors the usual real/fake split: [Console] writes to the real stdout and
//! stderr, taking each lock only for the duration of a single write so that other parts of the
//! program remain free to write between two chunks of command output. Tests use
//! [crate::testing::Transcript] instead.

use std::io::{self, Write};

/// A sink for the standard output and standard error of commands.
pub trait Terminal {
    /// Forwards a chunk of a command's standard output.
    fn stdout(&mut self, data: &[u8]) -> io::Result<()>;

    /// Forwards a chunk of a command's standard error.
    fn stderr(&mut self, data: &[u8]) -> io::Result<()>;
}

/// The production [Terminal]. Uses the real stdout/stderr.
#[derive(Clone, Copy, Debug, Default)]
pub struct Console;

impl Terminal for Console {
    fn stdout(&mut self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut stdout = io::stdout().lock();
        stdout.write_all(data)?;
        stdout.flush()
    }

    fn stderr(&mut self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut stderr = io::stderr().lock();
        stderr.write_all(data)?;
        stderr.flush()
    }
}

/// Writes a line of text to a [Terminal]'s standard output.
pub fn println(terminal: &mut dyn Terminal, line: impl AsRef<str>) -> io::Result<()> {
    let mut buffer = line.as_ref().as_bytes().to_vec();
    buffer.push(b'\n');
    terminal.stdout(&buffer)
}
