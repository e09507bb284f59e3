//! Python packages built from git sources.
//!
//! A source is checked out into the cache directory on the control host, at the branch selected
//! for the run, and turned into a source distribution with `setup.py sdist`. Sources are built on
//! behalf of Python environments (see [super::pyenv]), but their actions can be run directly, too.

use super::action::{self, ActionKind, Entity};
use super::{Buildable, Context, Kind};
use crate::config::{Config, Section};
use crate::error::{Error, Result};
use crate::local::LocalCommand;
use std::fs;
use std::path::{Path, PathBuf};

/// The interpreter used when a source does not name one.
pub const DEFAULT_PYTHON: &str = "python3";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Source {
    /// The repository's path on its mirror, e.g. `app` or `lib/core`.
    pub name: String,

    /// The name of the mirror to clone from.
    pub mirror: String,

    /// The Python interpreter that runs `setup.py`.
    pub python: String,
}

impl TryFrom<&Section> for Source {
    type Error = Error;

    fn try_from(section: &Section) -> Result<Self> {
        Ok(Source {
            name: section.name.clone(),
            mirror: section.get("mirror")?.to_string(),
            python: section.get_opt("python").unwrap_or(DEFAULT_PYTHON).to_string(),
        })
    }
}

impl Source {
    /// Where the source is checked out on the control host.
    pub fn checkout_dir(&self, config: &Config) -> PathBuf {
        config.cache_dir().join(self.name.replace('/', "-"))
    }

    /// The URL the source is cloned from.
    pub fn url(&self, config: &Config) -> Result<String> {
        let mirror = config.mirror(&self.mirror)?;
        Ok(format!("{}{}.git", mirror.url, self.name))
    }

    /// Where `setup.py sdist` puts the archive of the package `package_name`.
    pub fn archive(&self, config: &Config, package_name: &str) -> PathBuf {
        self.checkout_dir(config)
            .join("dist")
            .join(format!("{package_name}.tar.gz"))
    }

    fn git(ctx: &mut Context, args: &[&str], cwd: &Path) -> Result<String> {
        let mut argv = vec!["git"];
        argv.extend_from_slice(args);
        ctx.local.run(&LocalCommand::argv(argv), cwd)
    }

    fn sync(&self, ctx: &mut Context) -> Result<()> {
        let folder = self.checkout_dir(&ctx.config);
        if folder.exists() {
            Self::git(ctx, &["fetch", "origin"], &folder)?;
            return Ok(());
        }

        let cache = ctx.config.cache_dir().to_owned();
        fs::create_dir_all(&cache)?;
        let url = self.url(&ctx.config)?;
        let folder = folder.to_string_lossy().into_owned();
        Self::git(ctx, &["clone", &url, &folder], &cache)?;
        Ok(())
    }

    fn checkout(&self, ctx: &mut Context) -> Result<()> {
        let folder = self.checkout_dir(&ctx.config);
        let branch = ctx.options.branch.clone();
        let upstream = format!("origin/{branch}");

        match Self::git(ctx, &["checkout", &branch], &folder) {
            Ok(_) => {
                Self::git(ctx, &["reset", "--hard", &upstream], &folder)?;
            }
            // The branch has never been checked out here.
            Err(Error::LocalCommandFailed { .. }) => {
                Self::git(ctx, &["checkout", "-b", &branch, &upstream], &folder)?;
            }
            Err(error) => return Err(error),
        }
        ctx.local.run(&LocalCommand::line("git clean -fxdq"), &folder)?;
        Ok(())
    }

    fn build(&self, ctx: &mut Context) -> Result<()> {
        let folder = self.checkout_dir(&ctx.config);
        if folder.join("setup.conf").exists() {
            ctx.local
                .run(&LocalCommand::argv(["ipkg-build.py"]), &folder)?;
        }
        ctx.local.run(
            &LocalCommand::argv([self.python.as_str(), "setup.py", "--quiet", "sdist"]),
            &folder,
        )?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceAction {
    Sync,
    Checkout,
    Build,
    Dist,
}

impl ActionKind for SourceAction {
    const ALL: &'static [Self] = &[
        SourceAction::Sync,
        SourceAction::Checkout,
        SourceAction::Build,
        SourceAction::Dist,
    ];

    fn name(self) -> &'static str {
        match self {
            SourceAction::Sync => "sync",
            SourceAction::Checkout => "checkout",
            SourceAction::Build => "build",
            SourceAction::Dist => "dist",
        }
    }

    fn title(self) -> &'static str {
        match self {
            SourceAction::Sync => "[private] Synchronize the source from the mirror",
            SourceAction::Checkout => "[private] Checkout the given branch (default: master)",
            SourceAction::Build => "[private] Build",
            SourceAction::Dist => "All of the above",
        }
    }
}

impl Entity for Source {
    type Action = SourceAction;

    const KIND: Kind = Kind::Source;

    fn name(&self) -> &str {
        &self.name
    }

    fn applies(&self, action: SourceAction, ctx: &Context) -> bool {
        // Offline, the mirror is out of reach; whatever is in the cache gets built.
        !(action == SourceAction::Sync && ctx.options.offline)
    }

    fn execute(&self, action: SourceAction, ctx: &mut Context) -> Result<()> {
        match action {
            SourceAction::Sync => self.sync(ctx),
            SourceAction::Checkout => self.checkout(ctx),
            SourceAction::Build => self.build(ctx),
            SourceAction::Dist => action::run_steps(
                self,
                &[
                    SourceAction::Sync,
                    SourceAction::Checkout,
                    SourceAction::Build,
                ],
                ctx,
            ),
        }
    }
}

impl Buildable for Source {
    fn package_name(&self, ctx: &mut Context) -> Result<String> {
        let folder = self.checkout_dir(&ctx.config);
        let output = ctx.local.run(
            &LocalCommand::argv([self.python.as_str(), "setup.py", "--version"]),
            &folder,
        )?;
        // setup.py may print other things first; the version is the last line.
        let version = output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .ok_or_else(|| {
                Error::config(format!("could not determine the version of \"{}\"", self.name))
            })?;
        let base = self.name.split('/').next().unwrap_or(&self.name);
        Ok(format!("{base}-{version}"))
    }

    fn produce_package(&self, ctx: &mut Context) -> Result<PathBuf> {
        action::run(self, SourceAction::Dist, ctx)?;
        let package_name = self.package_name(ctx)?;
        Ok(self.archive(&ctx.config, &package_name))
    }
}
