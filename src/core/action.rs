//! Resolving and running actions.
//!
//! Every entity kind declares its actions as a plain enum implementing [ActionKind], and
//! implements [Entity] to say which of them apply in the entity's current state and what each
//! one does. Looking an action up by name yields a [Resolution]: either an action ready to run,
//! or [Resolution::NotApplicable]. The latter is not an error. Composite actions skip steps that
//! do not apply ([run_steps]); only an action requested by the user that does not apply is one
//! ([run_named]).

use super::{Context, Kind};
use crate::error::{Error, Result};
use std::fmt::Debug;
use std::time::Instant;
use tracing::{debug, info};

/// The closed set of actions of one entity kind.
pub trait ActionKind: Copy + Eq + Debug + 'static {
    /// Every action, in the order they are listed to the user.
    const ALL: &'static [Self];

    /// The name the user invokes the action by.
    fn name(self) -> &'static str;

    /// A one-line description for the command line.
    fn title(self) -> &'static str;

    /// Looks an action up by name.
    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|action| action.name() == name)
    }
}

/// Something actions can run on.
pub trait Entity {
    type Action: ActionKind;

    const KIND: Kind;

    fn name(&self) -> &str;

    /// Returns `true` if `action` makes sense for the entity in its current state.
    fn applies(&self, _action: Self::Action, _ctx: &Context) -> bool {
        true
    }

    /// Runs `action`. Callers should use [run], which adds logging.
    fn execute(&self, action: Self::Action, ctx: &mut Context) -> Result<()>;
}

/// The outcome of looking an action up on an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution<A> {
    Ready(A),

    /// The entity has no such action, or the action does not apply in its current state.
    NotApplicable,
}

/// Returns the actions that currently apply to `entity`, in listing order.
pub fn available<E: Entity>(entity: &E, ctx: &Context) -> Vec<E::Action> {
    E::Action::ALL
        .iter()
        .copied()
        .filter(|&action| entity.applies(action, ctx))
        .collect()
}

/// Looks up the action called `name` on `entity`.
pub fn resolve<E: Entity>(entity: &E, name: &str, ctx: &Context) -> Resolution<E::Action> {
    match E::Action::from_name(name) {
        Some(action) if entity.applies(action, ctx) => Resolution::Ready(action),
        _ => Resolution::NotApplicable,
    }
}

/// Runs `action` on `entity`, logging when it starts and how long it took.
pub fn run<E: Entity>(entity: &E, action: E::Action, ctx: &mut Context) -> Result<()> {
    let name = action.name();
    let started = Instant::now();
    info!("Start {name} ({})", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"));
    entity.execute(action, ctx)?;
    info!("End {name} (duration: {:.3?})", started.elapsed());
    Ok(())
}

/// Runs the actions in `steps` on `entity`, in order.
///
/// Each step is resolved again by name just before it runs, so a step that does not apply to
/// the entity's state at that point is skipped. The first step that fails aborts the sequence;
/// the steps that already ran are not undone.
pub fn run_steps<E: Entity>(entity: &E, steps: &[E::Action], ctx: &mut Context) -> Result<()> {
    for step in steps {
        match resolve(entity, step.name(), ctx) {
            Resolution::Ready(action) => run(entity, action, ctx)?,
            Resolution::NotApplicable => {
                debug!("Skip {} for {} \"{}\"", step.name(), E::KIND, entity.name());
            }
        }
    }
    Ok(())
}

/// Runs the action called `name` on `entity`.
///
/// # Errors
///
/// Returns [Error::UnexpectedAction] if the action does not resolve, or whatever it fails with.
pub fn run_named<E: Entity>(entity: &E, name: &str, ctx: &mut Context) -> Result<()> {
    match resolve(entity, name, ctx) {
        Resolution::Ready(action) => run(entity, action, ctx),
        Resolution::NotApplicable => Err(Error::UnexpectedAction {
            kind: E::KIND.to_string(),
            action: name.to_string(),
        }),
    }
}
