//! The entities Rollout manages and the actions they offer.
//!
//! # Entities
//!
//! Every section of the configuration is an entity of some [Kind]. Entities refer to each other
//! by name: a source names the mirror it is cloned from, a Python environment names the sources
//! it installs and the server it lives on, and an instance names the Python environment it runs
//! in.
//!
//! # Actions
//!
//! Each kind has a closed set of actions (see [action]). Which of them are available can depend
//! on the entity's state: a Python environment on the control host has nothing to upload, for
//! example. Some actions are sequences of other actions of the same entity, like `deploy`, which
//! is `build`, `upload`, `install`, and `restart`; see [action::run_steps].
//!
//! Actions share nothing but the [Context] they are given: the configuration, the settings of
//! the run, and the means to run commands.

use crate::config::{Config, RunOptions};
use crate::error::{Error, Result};
use crate::host::{Host, Location, Target};
use crate::local::LocalExecutor;
use crate::network::{Connect, ConnectionKey, ConnectionManager, ShellMode};
use crate::terminal::{self, Terminal};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub mod action;
pub mod instance;
pub mod pyenv;
pub mod source;

#[doc(inline)]
pub use action::{ActionKind, Entity, Resolution};

/// The kinds of entities in a configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Kind {
    /// The configuration itself. Not allowed in configuration files.
    Config,
    Instance,
    Mirror,
    PyEnv,
    Server,
    Source,
}

impl Kind {
    /// Every kind, in name order.
    pub const ALL: &'static [Kind] = &[
        Kind::Config,
        Kind::Instance,
        Kind::Mirror,
        Kind::PyEnv,
        Kind::Server,
        Kind::Source,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Kind::Config => "config",
            Kind::Instance => "instance",
            Kind::Mirror => "mirror",
            Kind::PyEnv => "pyenv",
            Kind::Server => "server",
            Kind::Source => "source",
        }
    }

    /// A one-line description for the command line. Kinds without a title only hold data and
    /// offer no actions.
    pub fn title(self) -> Option<&'static str> {
        match self {
            Kind::Config => Some("Manage configuration"),
            Kind::Instance => Some("Manage application instances"),
            Kind::PyEnv => Some("Manage Python environments"),
            Kind::Source => Some("Manage Python packages"),
            Kind::Mirror | Kind::Server => None,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Kind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Kind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| Error::UnknownKind(s.to_string()))
    }
}

/// Everything an action needs.
pub struct Context {
    pub config: Config,
    pub options: RunOptions,

    /// Runs commands on the control host.
    pub local: Box<dyn LocalExecutor>,

    /// The sessions to remote hosts. Closed by [Self::close] or when the context is dropped.
    pub connections: ConnectionManager,

    /// Where the output of commands goes.
    pub terminal: Box<dyn Terminal>,
}

impl Context {
    /// Creates a context. Remote hosts are reached through `connector`, unless
    /// [RunOptions::offline] is set.
    pub fn new(
        config: Config,
        options: RunOptions,
        local: Box<dyn LocalExecutor>,
        connector: Box<dyn Connect>,
        terminal: Box<dyn Terminal>,
    ) -> Self {
        let connections = ConnectionManager::new(connector, options.offline);
        Context {
            config,
            options,
            local,
            connections,
            terminal,
        }
    }

    /// Returns the host that `location` is on, connecting to it if needed.
    ///
    /// # Errors
    ///
    /// Fails if the location names an unknown server, in offline mode if the location is remote,
    /// or if the connection fails.
    pub fn host(&mut self, location: &Location) -> Result<Host<'_>> {
        let Context {
            config,
            local,
            connections,
            terminal,
            ..
        } = self;

        let target = if location.is_local() {
            Target::Local(local.as_mut())
        } else {
            let server = config.server(&location.server)?;
            let key = ConnectionKey {
                host: server.host.clone(),
                port: server.port,
                user: location.user.clone(),
                mode: if server.shell {
                    ShellMode::Interactive
                } else {
                    ShellMode::Exec
                },
            };
            Target::Remote(connections.acquire(&key)?)
        };

        Ok(Host {
            target,
            terminal: terminal.as_mut(),
        })
    }

    /// Prints a line of text for the user.
    pub fn println(&mut self, line: impl AsRef<str>) -> Result<()> {
        terminal::println(self.terminal.as_mut(), line)?;
        Ok(())
    }

    /// Closes every remote session. See [ConnectionManager::close_all].
    pub fn close(&mut self) {
        self.connections.close_all();
    }
}

/// Something that turns source code into an installable package.
pub trait Buildable {
    /// Returns the package's name, including its version (e.g. `app-1.0`).
    fn package_name(&self, ctx: &mut Context) -> Result<String>;

    /// Builds the package and returns the path to its archive on the control host.
    fn produce_package(&self, ctx: &mut Context) -> Result<PathBuf>;
}

/// Something that built packages can be shipped to and installed in.
pub trait Deployable {
    /// Copies the packages to the target host. Packages that are already there are skipped.
    fn upload(&self, ctx: &mut Context) -> Result<()>;

    /// Installs the packages.
    fn install(&self, ctx: &mut Context) -> Result<()>;
}

/// Something that runs as a service.
pub trait Startable {
    /// Starts the service, optionally in read-only mode.
    fn start(&self, ctx: &mut Context, read_only: bool) -> Result<()>;

    fn stop(&self, ctx: &mut Context) -> Result<()>;
}

/// Returns the names of the entities of `kind`, in name order.
pub fn items(config: &Config, kind: Kind) -> Vec<String> {
    config
        .entities_of_type(kind)
        .into_iter()
        .map(|section| section.name.clone())
        .collect()
}

/// Returns the names and titles of the actions currently available on the entity `kind name`.
///
/// For [Kind::Config], `name` is ignored.
pub fn actions(ctx: &Context, kind: Kind, name: &str) -> Result<Vec<(&'static str, &'static str)>> {
    fn describe<E: Entity>(entity: &E, ctx: &Context) -> Vec<(&'static str, &'static str)> {
        action::available(entity, ctx)
            .into_iter()
            .map(|action| (action.name(), action.title()))
            .collect()
    }

    Ok(match kind {
        Kind::Config => describe(&ctx.config, ctx),
        Kind::Instance => describe(ctx.config.instance(name)?, ctx),
        Kind::PyEnv => describe(ctx.config.pyenv(name)?, ctx),
        Kind::Source => describe(ctx.config.source(name)?, ctx),
        Kind::Mirror | Kind::Server => {
            entity_exists(&ctx.config, kind, name)?;
            vec![]
        }
    })
}

/// Runs the action named `action` on the entity `kind name`.
///
/// For [Kind::Config], `name` is ignored.
///
/// # Errors
///
/// Returns [Error::UnknownEntity] if there is no such entity, [Error::UnexpectedAction] if the
/// entity does not offer the action in its current state, or whatever the action fails with.
pub fn dispatch(ctx: &mut Context, kind: Kind, name: &str, action: &str) -> Result<()> {
    match kind {
        Kind::Config => {
            let config = ctx.config.clone();
            action::run_named(&config, action, ctx)
        }
        Kind::Instance => {
            let instance = ctx.config.instance(name)?.clone();
            action::run_named(&instance, action, ctx)
        }
        Kind::PyEnv => {
            let pyenv = ctx.config.pyenv(name)?.clone();
            action::run_named(&pyenv, action, ctx)
        }
        Kind::Source => {
            let source = ctx.config.source(name)?.clone();
            action::run_named(&source, action, ctx)
        }
        Kind::Mirror | Kind::Server => {
            entity_exists(&ctx.config, kind, name)?;
            Err(Error::UnexpectedAction {
                kind: kind.to_string(),
                action: action.to_string(),
            })
        }
    }
}

fn entity_exists(config: &Config, kind: Kind, name: &str) -> Result<()> {
    match config.entity(kind, name) {
        Some(_) => Ok(()),
        None => Err(Error::UnknownEntity {
            kind: kind.to_string(),
            name: name.to_string(),
        }),
    }
}

#[cfg(test)]
pub mod fixtures {
    use super::*;
    use crate::testing::{FakeNetwork, Transcript};

    /// A configuration with one mirror, two servers, two sources, a local and a remote Python
    /// environment, and three instances.
    pub const CONFIG: &str = r#"
mirror origin:
  url: https://git.example.com/

server prod:
  host: prod.example.com:2222

server legacy:
  host: legacy.example.com
  shell: true

source app:
  mirror: origin

source lib/core:
  mirror: origin
  python: python3.11

pyenv prod:
  location: deploy@prod:envs/prod
  packages: app:release lib/core:master

pyenv dev:
  location: localhost:/opt/dev
  packages: app:master

pyenv old:
  location: legacy:/srv/old
  packages: app:stable

instance www:
  pyenv: prod
  path: sites/www
  uri: http://www.example.com

instance blog:
  pyenv: prod
  path: sites/blog
  uri: http://blog.example.com

instance sandbox:
  pyenv: dev
  path: sites/sandbox
"#;

    /// Returns a context over [CONFIG] backed by fakes, and the fakes' handles. The cache
    /// directory lives inside the returned [tempfile::TempDir].
    pub fn context(options: RunOptions) -> (Context, FakeNetwork, Transcript, tempfile::TempDir) {
        context_with(CONFIG, options)
    }

    /// Like [context], over another configuration.
    pub fn context_with(
        yaml: &str,
        options: RunOptions,
    ) -> (Context, FakeNetwork, Transcript, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_yaml(dir.path(), yaml)
            .unwrap()
            .with_cache_dir(dir.path().join("cache"));
        let network = FakeNetwork::new();
        network.respond_local("--version", "running egg_info\n1.0\n");
        let transcript = Transcript::default();
        let ctx = Context::new(
            config,
            options,
            Box::new(network.local()),
            network.connector(),
            Box::new(transcript.clone()),
        );
        (ctx, network, transcript, dir)
    }
}
