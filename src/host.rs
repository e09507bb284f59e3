//! Where commands run: the control host or a remote host, behind one interface.

use crate::error::{Error, Result};
use crate::local::{expand_home, LocalCommand, LocalExecutor};
use crate::network::transfer::Transfer;
use crate::network::RemoteHost;
use crate::terminal::Terminal;
use regex::Regex;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

/// The server name that designates the control host.
pub const LOCALHOST: &str = "localhost";

/// Where an entity lives: `[user@]server:path`, or `localhost:path`.
///
/// A relative path is relative to the login user's home directory; it is stored with a leading
/// `~/` so that it can be resolved on whichever host it ends up on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    /// The login user. Always [None] for [LOCALHOST].
    pub user: Option<String>,

    /// Either [LOCALHOST] or the name of a `server` entity.
    pub server: String,

    pub path: String,
}

impl Location {
    /// Returns `true` if this location is on the control host.
    pub fn is_local(&self) -> bool {
        self.server == LOCALHOST
    }
}

impl FromStr for Location {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(r"^(?:(?P<user>[^@:/\s]+)@)?(?P<server>[^@:/\s]+):(?P<path>\S.*)$")
                .expect("the location pattern is valid")
        });

        let captures = pattern.captures(s).ok_or_else(|| {
            Error::config(format!(
                "malformed location \"{s}\", expected \"[user@]server:path\""
            ))
        })?;
        let user = captures.name("user").map(|m| m.as_str().to_string());
        let server = captures["server"].to_string();
        let mut path = captures["path"].to_string();

        if server == LOCALHOST && user.is_some() {
            return Err(Error::config(format!(
                "location \"{s}\" names a user on localhost"
            )));
        }
        if !path.starts_with('/') && !path.starts_with('~') {
            path = format!("~/{path}");
        }

        Ok(Location { user, server, path })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        write!(f, "{}:{}", self.server, self.path)
    }
}

/// The machine an action's commands run on.
pub enum Target<'c> {
    Local(&'c mut dyn LocalExecutor),
    Remote(RemoteHost<'c>),
}

/// A [Target] plus the [Terminal] that its commands' output goes to.
///
/// Obtained from [crate::core::Context::host] for the duration of one step.
pub struct Host<'c> {
    pub target: Target<'c>,
    pub terminal: &'c mut dyn Terminal,
}

impl<'c> Host<'c> {
    /// Runs the command line `command` in `cwd`.
    ///
    /// On the control host, the command's captured output is forwarded once it has finished, and
    /// `quiet` has no effect. On a remote host, see [RemoteHost::run].
    pub fn run(&mut self, command: &str, cwd: &str, quiet: bool) -> Result<()> {
        match &mut self.target {
            Target::Local(local) => {
                let cwd = expand_home(cwd);
                let output = local.run(&LocalCommand::line(command), Path::new(&cwd))?;
                self.terminal.stdout(output.as_bytes())?;
                Ok(())
            }
            Target::Remote(remote) => remote.run(command, cwd, quiet, &mut *self.terminal),
        }
    }

    /// Uploads `local` to `target`. Only remote hosts accept uploads.
    pub fn put(&mut self, local: &Path, target: &str) -> Result<Transfer> {
        match &mut self.target {
            Target::Local(_) => Err(Error::Transfer {
                local: local.display().to_string(),
                remote: format!("{LOCALHOST}:{target}"),
                reason: "uploads to the control host are not supported".to_string(),
            }),
            Target::Remote(remote) => remote.put(local, target),
        }
    }
}
