//! Python environments: where packages are installed and instances run.

use super::action::{self, ActionKind, Entity};
use super::source::Source;
use super::{Buildable, Context, Deployable, Kind, Startable};
use crate::config::Section;
use crate::error::{Error, Result};
use crate::host::Location;
use crate::local::{expand_home, LocalCommand};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Where uploaded archives land and get unpacked on remote hosts.
const STAGING_DIR: &str = "/tmp";

/// How long `test` waits for an instance to answer.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A package a Python environment requires, and the branch to build it from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Package {
    /// The name of a [Source].
    pub source: String,
    pub branch: String,
}

impl std::str::FromStr for Package {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((source, branch)) if !source.is_empty() && !branch.is_empty() => Ok(Package {
                source: source.to_string(),
                branch: branch.to_string(),
            }),
            _ => Err(Error::config(format!(
                "malformed package \"{s}\", expected \"<source>:<branch>\""
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PyEnv {
    pub name: String,

    /// Where the environment lives. Its path is the environment's root, with `bin/python` in it.
    pub location: Location,

    /// The packages to build and install, in order.
    pub packages: Vec<Package>,
}

impl TryFrom<&Section> for PyEnv {
    type Error = Error;

    fn try_from(section: &Section) -> Result<Self> {
        let context = |e: Error| Error::config(format!("{section}: {e}"));
        let location = section.get("location")?.parse::<Location>().map_err(context)?;
        let packages = section
            .get("packages")?
            .split_whitespace()
            .map(str::parse::<Package>)
            .collect::<Result<Vec<_>>>()
            .map_err(context)?;
        Ok(PyEnv {
            name: section.name.clone(),
            location,
            packages,
        })
    }
}

impl PyEnv {
    /// The environment's interpreter.
    fn python(&self) -> String {
        format!("{}/bin/python", self.location.path)
    }

    /// Returns each package's source along with the branch it is built from.
    fn sources(&self, ctx: &Context) -> Result<Vec<(Source, String)>> {
        self.packages
            .iter()
            .map(|package| {
                let source = ctx.config.source(&package.source)?.clone();
                Ok((source, package.branch.clone()))
            })
            .collect()
    }

    /// Returns the name of each package, as built.
    fn package_names(&self, ctx: &mut Context) -> Result<Vec<(Source, String)>> {
        let mut names = vec![];
        for (source, _) in self.sources(ctx)? {
            let name = source.package_name(ctx)?;
            names.push((source, name));
        }
        Ok(names)
    }

    /// Returns the instances that run in this environment, in name order.
    fn instances(&self, ctx: &Context) -> Vec<super::instance::Instance> {
        ctx.config
            .instances_of(&self.name)
            .into_iter()
            .cloned()
            .collect()
    }

    fn build(&self, ctx: &mut Context) -> Result<()> {
        fs::create_dir_all(ctx.config.cache_dir())?;
        for (source, branch) in self.sources(ctx)? {
            ctx.options.branch = branch;
            source.produce_package(ctx)?;
        }
        Ok(())
    }

    fn install_local(&self, ctx: &mut Context) -> Result<()> {
        let python = expand_home(&self.python());
        for (source, _) in self.sources(ctx)? {
            let cwd = source.checkout_dir(&ctx.config);
            ctx.local.run(
                &LocalCommand::argv([python.as_str(), "setup.py", "install", "--force"]),
                &cwd,
            )?;
        }
        Ok(())
    }

    fn install_remote(&self, ctx: &mut Context) -> Result<()> {
        let names = self.package_names(ctx)?;
        let python = self.python();
        let mut host = ctx.host(&self.location)?;
        for (_, name) in names {
            let unpacked = format!("{STAGING_DIR}/{name}");
            host.run(&format!("tar xzf {name}.tar.gz"), STAGING_DIR, false)?;
            host.run(
                &format!("{python} setup.py --quiet install --force"),
                &unpacked,
                false,
            )?;
            host.run(&format!("rm -rf {unpacked}"), STAGING_DIR, false)?;
        }
        Ok(())
    }

    fn restart(&self, ctx: &mut Context) -> Result<()> {
        for instance in self.instances(ctx) {
            instance.stop(ctx)?;
            instance.start(ctx, false)?;
        }
        Ok(())
    }

    /// Checks that every instance with a URI answers on its control page.
    fn test(&self, ctx: &mut Context) -> Result<()> {
        let agent = ureq::AgentBuilder::new().timeout(PROBE_TIMEOUT).build();
        for instance in self.instances(ctx) {
            let Some(uri) = &instance.uri else {
                warn!("Instance \"{}\" has no uri, not testing it", instance.name);
                continue;
            };
            let url = format!("{}/;_ctrl", uri.trim_end_matches('/'));
            match agent.get(&url).call() {
                Ok(_) => ctx.println(format!("[OK] {uri}"))?,
                Err(error) => {
                    debug!("GET {url}: {error}");
                    ctx.println(format!("[ERROR] {uri}"))?;
                }
            }
        }
        Ok(())
    }

    fn vhosts(&self, ctx: &mut Context) -> Result<()> {
        for instance in self.instances(ctx) {
            instance.vhosts(ctx)?;
        }
        Ok(())
    }
}

impl Deployable for PyEnv {
    fn upload(&self, ctx: &mut Context) -> Result<()> {
        let archives: Vec<PathBuf> = self
            .package_names(ctx)?
            .into_iter()
            .map(|(source, name)| source.archive(&ctx.config, &name))
            .collect();
        let mut host = ctx.host(&self.location)?;
        for archive in archives {
            host.put(&archive, STAGING_DIR)?;
        }
        Ok(())
    }

    fn install(&self, ctx: &mut Context) -> Result<()> {
        if self.location.is_local() {
            self.install_local(ctx)
        } else {
            self.install_remote(ctx)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PyEnvAction {
    Build,
    Upload,
    Install,
    Restart,
    Deploy,
    Test,
    Vhosts,
}

impl ActionKind for PyEnvAction {
    const ALL: &'static [Self] = &[
        PyEnvAction::Build,
        PyEnvAction::Upload,
        PyEnvAction::Install,
        PyEnvAction::Restart,
        PyEnvAction::Deploy,
        PyEnvAction::Test,
        PyEnvAction::Vhosts,
    ];

    fn name(self) -> &'static str {
        match self {
            PyEnvAction::Build => "build",
            PyEnvAction::Upload => "upload",
            PyEnvAction::Install => "install",
            PyEnvAction::Restart => "restart",
            PyEnvAction::Deploy => "deploy",
            PyEnvAction::Test => "test",
            PyEnvAction::Vhosts => "vhosts",
        }
    }

    fn title(self) -> &'static str {
        match self {
            PyEnvAction::Build => "Build the source code this Python environment requires",
            PyEnvAction::Upload => "Upload the source code to the remote server",
            PyEnvAction::Install => "Install the source code into the Python environment",
            PyEnvAction::Restart => "Restart the instances that use this environment",
            PyEnvAction::Deploy => "All of the above",
            PyEnvAction::Test => "Test if the instances of this Python environment are alive",
            PyEnvAction::Vhosts => "List vhosts of all instances of this Python environment",
        }
    }
}

impl Entity for PyEnv {
    type Action = PyEnvAction;

    const KIND: Kind = Kind::PyEnv;

    fn name(&self) -> &str {
        &self.name
    }

    fn applies(&self, action: PyEnvAction, _ctx: &Context) -> bool {
        use PyEnvAction::*;
        !self.location.is_local() || matches!(action, Build | Install | Restart | Deploy)
    }

    fn execute(&self, action: PyEnvAction, ctx: &mut Context) -> Result<()> {
        use PyEnvAction::*;
        match action {
            Build => self.build(ctx),
            Upload => self.upload(ctx),
            Install => self.install(ctx),
            Restart => self.restart(ctx),
            Deploy => action::run_steps(self, &[Build, Upload, Install, Restart], ctx),
            Test => self.test(ctx),
            Vhosts => self.vhosts(ctx),
        }
    }
}

#[cfg(test)]
mod test;
