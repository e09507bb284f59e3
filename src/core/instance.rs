//! Application instances running in a Python environment.
//!
//! An instance runs on its environment's host, and every command is run from the environment's
//! root, where the control scripts live in `bin/`.

use super::action::{self, ActionKind, Entity};
use super::{Context, Kind, Startable};
use crate::config::Section;
use crate::error::{Error, Result};

/// Lists the virtual hosts in an instance's catalog. `{path}` is replaced with the instance path.
const VHOSTS_SCRIPT: &str = "
from itools.database import Catalog, get_register_fields
catalog = Catalog('./{path}/catalog', get_register_fields(), read_only=True)
vhosts = sorted(catalog.get_unique_values('vhosts'))
for vhost in vhosts:
    print(vhost)
";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instance {
    pub name: String,

    /// The name of the Python environment the instance runs in.
    pub pyenv: String,

    /// The instance's data directory, relative to the environment's root.
    pub path: String,

    /// The public address of the instance, used by `pyenv test`.
    pub uri: Option<String>,
}

impl TryFrom<&Section> for Instance {
    type Error = Error;

    fn try_from(section: &Section) -> Result<Self> {
        Ok(Instance {
            name: section.name.clone(),
            pyenv: section.get("pyenv")?.to_string(),
            path: section.get("path")?.to_string(),
            uri: section.get_opt("uri").map(str::to_string),
        })
    }
}

impl Instance {
    /// Runs `command` from the root of the instance's environment.
    fn run(&self, ctx: &mut Context, command: &str, quiet: bool) -> Result<()> {
        let location = ctx.config.pyenv(&self.pyenv)?.location.clone();
        ctx.host(&location)?.run(command, &location.path, quiet)
    }

    fn update_catalog(&self, ctx: &mut Context) -> Result<()> {
        self.run(
            ctx,
            &format!("./bin/icms-update-catalog.py -y {}", self.path),
            false,
        )
    }

    /// Prints the virtual hosts the instance serves.
    pub fn vhosts(&self, ctx: &mut Context) -> Result<()> {
        let script = VHOSTS_SCRIPT.replace("{path}", &self.path);
        self.run(ctx, &format!("./bin/python -c \"{script}\""), true)
    }
}

impl Startable for Instance {
    fn start(&self, ctx: &mut Context, read_only: bool) -> Result<()> {
        let command = if read_only {
            format!("./bin/icms-start.py -r -d {}", self.path)
        } else {
            format!("./bin/icms-start.py -d {}", self.path)
        };
        self.run(ctx, &command, false)
    }

    fn stop(&self, ctx: &mut Context) -> Result<()> {
        self.run(ctx, &format!("./bin/icms-stop.py {}", self.path), false)?;
        self.run(
            ctx,
            &format!("./bin/icms-stop.py --force {}", self.path),
            false,
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceAction {
    Start,
    Stop,
    Restart,
    Reindex,
    Vhosts,
}

impl ActionKind for InstanceAction {
    const ALL: &'static [Self] = &[
        InstanceAction::Start,
        InstanceAction::Stop,
        InstanceAction::Restart,
        InstanceAction::Reindex,
        InstanceAction::Vhosts,
    ];

    fn name(self) -> &'static str {
        match self {
            InstanceAction::Start => "start",
            InstanceAction::Stop => "stop",
            InstanceAction::Restart => "restart",
            InstanceAction::Reindex => "reindex",
            InstanceAction::Vhosts => "vhosts",
        }
    }

    fn title(self) -> &'static str {
        match self {
            InstanceAction::Start => "Start an instance",
            InstanceAction::Stop => "Stop an instance",
            InstanceAction::Restart => "(Re)Start an instance",
            InstanceAction::Reindex => "Update the catalog of an instance",
            InstanceAction::Vhosts => "List the vhosts of an instance",
        }
    }
}

impl Entity for Instance {
    type Action = InstanceAction;

    const KIND: Kind = Kind::Instance;

    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, action: InstanceAction, ctx: &mut Context) -> Result<()> {
        match action {
            InstanceAction::Start => self.start(ctx, false),
            InstanceAction::Stop => self.stop(ctx),
            InstanceAction::Restart => {
                action::run_steps(self, &[InstanceAction::Stop, InstanceAction::Start], ctx)
            }
            InstanceAction::Reindex => {
                self.stop(ctx)?;
                self.start(ctx, true)?;
                self.update_catalog(ctx)?;
                self.stop(ctx)?;
                self.start(ctx, false)
            }
            InstanceAction::Vhosts => self.vhosts(ctx),
        }
    }
}
