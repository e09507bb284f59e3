//! Loads and validates Rollout's configuration.
//!
//! # Files
//!
//! The configuration lives in a directory (see [config_dir]). Every `*.yaml` file in it is read,
//! in name order. Each file maps section keys of the form `"<kind> <name>"` to flat mappings of
//! options:
//!
//! ```yaml
//! server prod:
//!   host: prod.example.com:2222
//!
//! pyenv prod:
//!   location: deploy@prod:envs/prod
//!   packages: app:release
//! ```
//!
//! Option values are scalars (strings, numbers, or booleans) and are stored as strings. A section
//! that appears in several files is merged, with later files winning.
//!
//! # Validation
//!
//! Every entity is parsed into its typed form when the configuration is loaded, and every
//! reference between entities is checked then, too. A run never starts with a configuration that
//! would fail halfway through.

use crate::core::instance::Instance;
use crate::core::pyenv::PyEnv;
use crate::core::source::Source;
use crate::core::{ActionKind, Context, Entity, Kind};
use crate::error::{Error, Result};
use crate::local::{LocalCommand, LocalExecutor};
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Returns a [PathBuf] to the directory where Rollout's configuration should live.
///
/// When compiled for testing, this returns `CARGO_MANIFEST_DIR` plus `resources/config`.
/// Otherwise, it returns `~/.rollout`.
pub fn config_dir() -> PathBuf {
    #[cfg(test)]
    {
        let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        path.push("resources");
        path.push("config");
        path
    }

    #[cfg(not(test))]
    {
        let mut path = home::home_dir().unwrap_or_default();
        path.push(".rollout");
        path
    }
}

/// Settings that apply to one run rather than to the configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOptions {
    /// Forbid remote access and skip fetching sources from their mirrors.
    pub offline: bool,

    /// The branch sources are checked out at. Python environments overwrite this for each package
    /// they build.
    pub branch: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            offline: false,
            branch: "master".to_string(),
        }
    }
}

/// One section of a configuration file, before validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Section {
    pub kind: Kind,
    pub name: String,

    /// The section's options, in file order.
    pub options: IndexMap<String, String>,
}

impl Section {
    /// Returns the value of a required option.
    pub fn get(&self, option: &str) -> Result<&str> {
        self.options
            .get(option)
            .map(String::as_str)
            .ok_or_else(|| Error::config(format!("{self} is missing the \"{option}\" option")))
    }

    /// Returns the value of an optional option.
    pub fn get_opt(&self, option: &str) -> Option<&str> {
        self.options.get(option).map(String::as_str)
    }

    /// Returns the value of an optional boolean option.
    pub fn get_bool(&self, option: &str, default: bool) -> Result<bool> {
        let Some(value) = self.get_opt(option) else {
            return Ok(default);
        };
        match value.to_ascii_lowercase().as_str() {
            "1" | "yes" | "true" | "on" => Ok(true),
            "0" | "no" | "false" | "off" => Ok(false),
            _ => Err(Error::config(format!(
                "{self}: \"{option}\" must be a boolean, not \"{value}\""
            ))),
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{} {}\"", self.kind, self.name)
    }
}

/// A git mirror that sources are cloned from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mirror {
    pub name: String,

    /// Prefix of the clone URLs. A source's URL is this plus `<source name>.git`.
    pub url: String,
}

impl TryFrom<&Section> for Mirror {
    type Error = Error;

    fn try_from(section: &Section) -> Result<Self> {
        Ok(Mirror {
            name: section.name.clone(),
            url: section.get("url")?.to_string(),
        })
    }
}

/// A remote machine that Python environments live on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Server {
    pub name: String,

    /// The host name or address to connect to.
    pub host: String,

    pub port: u16,

    /// Run commands through an interactive shell. See [crate::network::remote].
    pub shell: bool,
}

impl TryFrom<&Section> for Server {
    type Error = Error;

    fn try_from(section: &Section) -> Result<Self> {
        let address = section.get("host")?;
        let (host, port) = match address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse().map_err(|_| {
                    Error::config(format!("{section}: invalid port in \"{address}\""))
                })?;
                (host, port)
            }
            None => (address, 22),
        };
        if host.is_empty() {
            return Err(Error::config(format!("{section}: empty host name")));
        }
        Ok(Server {
            name: section.name.clone(),
            host: host.to_string(),
            port,
            shell: section.get_bool("shell", false)?,
        })
    }
}

/// An option value as it may appear in a YAML file.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Flag(bool),
    Number(serde_yaml::Number),
    Empty(()),
}

impl From<Scalar> for String {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Text(s) => s,
            Scalar::Flag(b) => b.to_string(),
            Scalar::Number(n) => n.to_string(),
            Scalar::Empty(()) => String::new(),
        }
    }
}

type Document = IndexMap<String, IndexMap<String, Scalar>>;

/// The raw sections read so far, keyed by kind and name.
type Sections = BTreeMap<(Kind, String), Section>;

/// Parses one YAML document into `sections`, merging with what is already there.
fn parse_document(text: &str, sections: &mut Sections) -> Result<()> {
    // An empty file is a null document.
    let document: Option<Document> =
        serde_yaml::from_str(text).map_err(|error| Error::config(error.to_string()))?;

    for (key, options) in document.unwrap_or_default() {
        let mut words = key.split_whitespace();
        let (Some(kind), Some(name), None) = (words.next(), words.next(), words.next()) else {
            return Err(Error::config(format!(
                "malformed section \"{key}\", expected \"<kind> <name>\""
            )));
        };
        let kind: Kind = kind
            .parse()
            .map_err(|_| Error::config(format!("unknown kind in section \"{key}\"")))?;

        let section = sections
            .entry((kind, name.to_string()))
            .or_insert_with(|| Section {
                kind,
                name: name.to_string(),
                options: IndexMap::new(),
            });
        for (option, value) in options {
            section.options.insert(option, value.into());
        }
    }
    Ok(())
}

/// The validated configuration.
///
/// This is the registry every action reads entities from. It is built once, before anything runs,
/// and never changes afterwards. Run-scoped settings live in [RunOptions] instead.
#[derive(Clone, Debug)]
pub struct Config {
    dir: PathBuf,
    cache_dir: PathBuf,
    sections: Sections,
    mirrors: BTreeMap<String, Mirror>,
    servers: BTreeMap<String, Server>,
    sources: BTreeMap<String, Source>,
    pyenvs: BTreeMap<String, PyEnv>,
    instances: BTreeMap<String, Instance>,
}

impl Config {
    /// Loads every `*.yaml` file in `dir`.
    ///
    /// # Errors
    ///
    /// Fails if `dir` is a file, if it contains no YAML files, or if any file is malformed. If
    /// `dir` does not exist, it is created, and loading fails asking the user to fill it.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if dir.is_file() {
            return Err(Error::config(format!(
                "{} is a file, remove it first",
                dir.display()
            )));
        }
        if !dir.exists() {
            info!("Making the configuration folder: {}", dir.display());
            fs::create_dir_all(dir)?;
            return Err(Error::config(format!(
                "now add the YAML files within {}",
                dir.display()
            )));
        }

        let mut files = vec![];
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "yaml") {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(Error::config(format!(
                "zero YAML files found in {}",
                dir.display()
            )));
        }
        files.sort();

        let mut sections = Sections::new();
        for file in &files {
            let text = fs::read_to_string(file)?;
            parse_document(&text, &mut sections)
                .map_err(|error| Error::config(format!("{}: {error}", file.display())))?;
        }
        Self::from_sections(dir, sections)
    }

    /// Builds a configuration from a single YAML document, as if it were the only file in `dir`.
    pub fn from_yaml(dir: impl AsRef<Path>, text: &str) -> Result<Self> {
        let mut sections = Sections::new();
        parse_document(text, &mut sections)?;
        Self::from_sections(dir.as_ref(), sections)
    }

    fn from_sections(dir: &Path, sections: Sections) -> Result<Self> {
        let mut config = Config {
            dir: dir.to_owned(),
            cache_dir: dir.join("cache"),
            sections: BTreeMap::new(),
            mirrors: BTreeMap::new(),
            servers: BTreeMap::new(),
            sources: BTreeMap::new(),
            pyenvs: BTreeMap::new(),
            instances: BTreeMap::new(),
        };

        for ((kind, name), section) in &sections {
            let name = name.clone();
            match kind {
                Kind::Mirror => {
                    config.mirrors.insert(name, section.try_into()?);
                }
                Kind::Server => {
                    config.servers.insert(name, section.try_into()?);
                }
                Kind::Source => {
                    config.sources.insert(name, section.try_into()?);
                }
                Kind::PyEnv => {
                    config.pyenvs.insert(name, section.try_into()?);
                }
                Kind::Instance => {
                    config.instances.insert(name, section.try_into()?);
                }
                Kind::Config => {
                    return Err(Error::config(format!(
                        "{section}: \"config\" sections are not allowed"
                    )));
                }
            }
        }
        config.sections = sections;
        config.check_references()?;
        Ok(config)
    }

    /// Checks that every entity refers to entities that exist.
    fn check_references(&self) -> Result<()> {
        for source in self.sources.values() {
            self.mirror(&source.mirror)
                .map_err(|e| Error::config(format!("source \"{}\": {e}", source.name)))?;
        }
        for pyenv in self.pyenvs.values() {
            let context = |e: Error| Error::config(format!("pyenv \"{}\": {e}", pyenv.name));
            if !pyenv.location.is_local() {
                self.server(&pyenv.location.server).map_err(context)?;
            }
            for package in &pyenv.packages {
                self.source(&package.source).map_err(context)?;
            }
        }
        for instance in self.instances.values() {
            self.pyenv(&instance.pyenv)
                .map_err(|e| Error::config(format!("instance \"{}\": {e}", instance.name)))?;
        }
        Ok(())
    }

    /// The directory the configuration was loaded from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The directory that holds source checkouts. Defaults to `cache` inside [Self::dir].
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Moves the cache directory elsewhere.
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    /// Returns the raw sections of one kind, ordered by name.
    pub fn entities_of_type(&self, kind: Kind) -> Vec<&Section> {
        self.sections
            .values()
            .filter(|section| section.kind == kind)
            .collect()
    }

    /// Returns one raw section.
    pub fn entity(&self, kind: Kind, name: &str) -> Option<&Section> {
        self.sections.get(&(kind, name.to_string()))
    }

    pub fn mirror(&self, name: &str) -> Result<&Mirror> {
        lookup(&self.mirrors, Kind::Mirror, name)
    }

    pub fn server(&self, name: &str) -> Result<&Server> {
        lookup(&self.servers, Kind::Server, name)
    }

    pub fn source(&self, name: &str) -> Result<&Source> {
        lookup(&self.sources, Kind::Source, name)
    }

    pub fn pyenv(&self, name: &str) -> Result<&PyEnv> {
        lookup(&self.pyenvs, Kind::PyEnv, name)
    }

    pub fn instance(&self, name: &str) -> Result<&Instance> {
        lookup(&self.instances, Kind::Instance, name)
    }

    /// Returns the instances that run in the Python environment `pyenv`, ordered by name.
    pub fn instances_of(&self, pyenv: &str) -> Vec<&Instance> {
        self.instances
            .values()
            .filter(|instance| instance.pyenv == pyenv)
            .collect()
    }

    /// Updates every part of the configuration directory that is a git checkout to the tip of its
    /// `origin/master` branch. Local changes are discarded.
    pub fn update(&self, local: &mut dyn LocalExecutor) -> Result<()> {
        let mut folders = vec![];
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.join(".git").exists() {
                folders.push(path);
            }
        }
        folders.sort();

        for folder in folders {
            local.run(&LocalCommand::argv(["git", "fetch", "origin"]), &folder)?;
            local.run(
                &LocalCommand::argv(["git", "reset", "--hard", "origin/master"]),
                &folder,
            )?;
        }
        Ok(())
    }
}

/// The actions on the configuration itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigAction {
    Update,
}

impl ActionKind for ConfigAction {
    const ALL: &'static [Self] = &[ConfigAction::Update];

    fn name(self) -> &'static str {
        match self {
            ConfigAction::Update => "update",
        }
    }

    fn title(self) -> &'static str {
        match self {
            ConfigAction::Update => "Update rollout configuration",
        }
    }
}

impl Entity for Config {
    type Action = ConfigAction;

    const KIND: Kind = Kind::Config;

    fn name(&self) -> &str {
        "config"
    }

    fn execute(&self, action: ConfigAction, ctx: &mut Context) -> Result<()> {
        match action {
            ConfigAction::Update => self.update(ctx.local.as_mut()),
        }
    }
}

fn lookup<'c, T>(entities: &'c BTreeMap<String, T>, kind: Kind, name: &str) -> Result<&'c T> {
    entities.get(name).ok_or_else(|| Error::UnknownEntity {
        kind: kind.to_string(),
        name: name.to_string(),
    })
}
