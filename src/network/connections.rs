//! The pool of live remote sessions.

use super::{remote, transfer, Connect, ConnectionKey, ShellMode, Transport};
use crate::error::{Error, Result};
use crate::terminal::Terminal;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Owns every live [Transport], keyed by [ConnectionKey].
///
/// Sessions are opened lazily: the first [Self::acquire] for a key connects (and authenticates),
/// and every later call for the same key reuses that session. [Self::close_all] closes every
/// session exactly once. It runs when the manager is dropped, too, so sessions are closed even if
/// the run ends with an error.
///
/// Entities never hold a session themselves; they [Self::acquire] a [RemoteHost] for the duration
/// of one call.
pub struct ConnectionManager {
    /// Opens new sessions.
    connector: Box<dyn Connect>,

    /// Whether remote access is forbidden for this run.
    offline: bool,

    /// Live sessions.
    sessions: HashMap<ConnectionKey, Box<dyn Transport>>,
}

impl ConnectionManager {
    /// Creates an empty pool that opens sessions with `connector`.
    ///
    /// If `offline` is set, every [Self::acquire] fails with [Error::OfflineModeViolation] before
    /// touching the network.
    pub fn new(connector: Box<dyn Connect>, offline: bool) -> Self {
        ConnectionManager {
            connector,
            offline,
            sessions: HashMap::new(),
        }
    }

    /// Whether remote access is forbidden for this run.
    pub fn offline(&self) -> bool {
        self.offline
    }

    /// Returns a handle to the session for `key`, connecting first if needed.
    ///
    /// # Errors
    ///
    /// Returns [Error::OfflineModeViolation] in offline mode, or whatever [Connect::connect]
    /// returns if the connection attempt fails. Failed attempts are not cached, but they are not
    /// retried either.
    pub fn acquire(&mut self, key: &ConnectionKey) -> Result<RemoteHost<'_>> {
        if self.offline {
            return Err(Error::OfflineModeViolation {
                destination: key.to_string(),
            });
        }

        let transport = match self.sessions.entry(key.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                info!("Connect {key}");
                entry.insert(self.connector.connect(key)?)
            }
        };
        Ok(RemoteHost {
            key: key.clone(),
            transport: transport.as_mut(),
        })
    }

    /// Returns the number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if there are no live sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Closes every live session and empties the pool.
    ///
    /// Idempotent and infallible: a session that fails to close cleanly is logged and forgotten.
    pub fn close_all(&mut self) {
        for (key, transport) in self.sessions.drain() {
            if let Err(error) = transport.close() {
                warn!("Error while closing the connection to {key}: {error}");
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// A borrowed handle to one live session, valid for the duration of a call.
pub struct RemoteHost<'p> {
    key: ConnectionKey,
    transport: &'p mut dyn Transport,
}

impl<'p> RemoteHost<'p> {
    /// The key of the underlying session.
    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    /// Runs `command` in `cwd` using the session's [ShellMode]. See [remote].
    ///
    /// Unless `quiet` is set, the command is traced before it runs.
    pub fn run(
        &mut self,
        command: &str,
        cwd: &str,
        quiet: bool,
        terminal: &mut dyn Terminal,
    ) -> Result<()> {
        if !quiet {
            info!("{} {cwd} $ {command}", self.key.destination());
        }
        match self.key.mode {
            ShellMode::Exec => remote::run_direct(self.transport, cwd, command, terminal),
            ShellMode::Interactive => remote::run_in_shell(self.transport, cwd, command, terminal),
        }
    }

    /// Uploads `local` to `target` unless it is already there. See [transfer::put].
    pub fn put(&mut self, local: &Path, target: &str) -> Result<transfer::Transfer> {
        transfer::put(self.transport, &self.key.destination(), local, target)
    }
}
