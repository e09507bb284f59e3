//! Remote hosts: connections, command execution, and file transfer.
//!
//! # Layers
//!
//! The SSH library only appears behind three small traits:
//!
//! * [Connect] opens a [Transport] to a remote host. This is where authentication and host-key
//!   checking happen.
//! * [Transport] is one live, authenticated session. It opens [Channel]s and offers the few
//!   file-system queries and the copy operation that [transfer] needs.
//! * [Channel] is a short-lived, per-command execution context.
//!
//! Everything else in this module (the connection pool in [connections], the two execution
//! protocols in [remote], and idempotent uploads in [transfer]) is written against those traits.
//! The production implementation lives in [mod@openssh]; the test doubles in
//! [crate::testing].
//!
//! # One command at a time
//!
//! Rollout is single-threaded. A [Transport] is shared by every action that targets the same
//! [ConnectionKey], but only one command ever runs on it at a time, and no command relies on state
//! left behind by another: the working directory is passed to every call.

use crate::error::Result;
use std::fmt;
use std::path::Path;

pub mod connections;
pub mod remote;
pub mod transfer;

#[cfg(feature = "openssh")]
pub mod openssh;

#[doc(inline)]
pub use connections::{ConnectionManager, RemoteHost};

/// How commands are executed on a remote host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ShellMode {
    /// Execute `cd <cwd> && <command>` directly and check its exit status.
    #[default]
    Exec,

    /// Feed the command to an interactive shell, so that aliases and the environment set up by
    /// the user's shell startup files are available. See [remote] for the caveats.
    Interactive,
}

/// Identifies one remote session. At most one [Transport] exists per key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    /// The host name or address to connect to.
    pub host: String,

    /// The SSH port.
    pub port: u16,

    /// The login user. If [None], SSH picks the user (usually from `~/.ssh/config`).
    pub user: Option<String>,

    /// How commands are run over this session.
    pub mode: ShellMode,
}

impl ConnectionKey {
    /// The `[user@]host` form, as understood by `ssh` and `scp`.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.destination(), self.port)
    }
}

/// Opens authenticated sessions to remote hosts.
pub trait Connect {
    /// Connects to the host described by `key`.
    ///
    /// Blocks until the session is established, which may include prompting the user for a key
    /// passphrase.
    ///
    /// # Errors
    ///
    /// Returns [crate::Error::Authentication] or [crate::Error::Connection]. Neither is retried.
    fn connect(&mut self, key: &ConnectionKey) -> Result<Box<dyn Transport>>;
}

/// The kind of a file on a remote host, as reported by [Transport::stat].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Directory,
    File,
}

/// A live, authenticated session to a remote host.
pub trait Transport {
    /// Opens a new [Channel] for running one command.
    ///
    /// Callers must call [Channel::close] when they're done with it, whatever the outcome;
    /// [remote::with_channel] takes care of that.
    fn open_channel(&mut self) -> Result<Box<dyn Channel + '_>>;

    /// Returns the kind of the file at `path`, or [None] if nothing exists there.
    ///
    /// `path` is used verbatim: it must not start with `~`.
    fn stat(&mut self, path: &str) -> Result<Option<FileKind>>;

    /// Returns the login user's home directory on the remote host.
    fn home(&mut self) -> Result<String>;

    /// Copies the local file at `local` to `remote`, overwriting whatever is there.
    fn copy(&mut self, local: &Path, remote: &str) -> Result<()>;

    /// Closes the session.
    fn close(self: Box<Self>) -> Result<()>;
}

/// The result of a command run with [Channel::exec].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// The exit status. A command killed by a signal is reported with a non-zero status.
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Which of a [Channel]'s output streams to read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// The outcome of one [Channel::recv].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recv {
    /// Some bytes arrived.
    Data(Vec<u8>),

    /// Nothing arrived within the read timeout. More data may come later.
    Idle,

    /// The stream is closed. No more data will ever arrive.
    Closed,
}

/// A per-command execution context opened from a [Transport].
///
/// A channel is used either for exactly one [Self::exec] or for one interactive shell
/// ([Self::invoke_shell], [Self::send], [Self::recv]).
pub trait Channel {
    /// Runs `command` to completion and returns its exit status and output.
    fn exec(&mut self, command: &str) -> Result<ExecOutput>;

    /// Starts an interactive shell on this channel.
    fn invoke_shell(&mut self) -> Result<()>;

    /// Sends `data` to the shell's standard input.
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Reads whatever is available on `stream`, waiting at most for a short timeout.
    fn recv(&mut self, stream: Stream) -> Result<Recv>;

    /// Closes the channel. Must be safe to call after a failure.
    fn close(&mut self) -> Result<()>;
}
