//! The `rollout` command.
//!
//! ```text
//! rollout                              # list the kinds of entities
//! rollout pyenv                        # list the Python environments
//! rollout pyenv prod                   # list the actions available on "pyenv prod"
//! rollout pyenv prod build deploy      # run actions, in order
//! rollout config update                # update the configuration from git
//! ```

use anyhow::Context as _;
use clap::Parser;
use rollout::config::{config_dir, Config, RunOptions};
use rollout::core::{Context, Kind};
use rollout::local::LocalHost;
use rollout::network::openssh::OpenSsh;
use rollout::terminal::Console;
use rollout::Error;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "rollout")]
#[command(about = "Build, ship, and restart Python applications", long_about = None)]
struct Cli {
    /// Don't synchronize sources from their mirrors, and disable every remote action
    #[arg(long)]
    offline: bool,

    /// The branch to check sources out at. Only applies to some actions
    #[arg(short, long, default_value = "master")]
    branch: String,

    /// Read the configuration from this directory instead of ~/.rollout
    #[arg(long, value_name = "DIR")]
    config: Option<PathBuf>,

    /// The kind of entity to act on
    kind: Option<String>,

    /// The entity to act on
    name: Option<String>,

    /// The actions to run, in order
    actions: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rollout=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let dir = cli.config.clone().unwrap_or_else(config_dir);
    let config = Config::load(&dir)
        .with_context(|| format!("cannot load the configuration from {}", dir.display()))?;

    // Case 0: nothing, list the kinds.
    let Some(kind) = cli.kind.as_deref() else {
        println!("Usage: rollout [OPTIONS] <KIND> <NAME> <ACTION>...");
        println!();
        println!("Kinds:");
        println!();
        for kind in Kind::ALL {
            if let Some(title) = kind.title() {
                println!("  {kind}: {title}");
            }
        }
        return Ok(());
    };

    let kind: Kind = kind.parse()?;
    if kind.title().is_none() {
        return Err(Error::UnknownKind(kind.to_string()).into());
    }

    let options = RunOptions {
        offline: cli.offline,
        branch: cli.branch.clone(),
    };
    let mut ctx = Context::new(
        config,
        options,
        Box::new(LocalHost),
        Box::new(OpenSsh),
        Box::new(Console),
    );

    // The configuration has no items; its actions come right after the kind.
    let (name, actions) = if kind == Kind::Config {
        (String::new(), cli.name.iter().chain(&cli.actions).cloned().collect())
    } else {
        // Case 1: just the kind, list the items.
        let Some(name) = cli.name.clone() else {
            println!("Usage: rollout [OPTIONS] {kind} <NAME> <ACTION>...");
            println!();
            println!("Items:");
            println!();
            for item in rollout::core::items(&ctx.config, kind) {
                println!("  {item}");
            }
            return Ok(());
        };
        (name, cli.actions.clone())
    };

    // Case 2: the kind and the item, list the actions.
    if actions.is_empty() {
        let available = rollout::core::actions(&ctx, kind, &name)?;
        let subject = match kind {
            Kind::Config => kind.to_string(),
            _ => format!("{kind} {name}"),
        };
        println!("Usage: rollout [OPTIONS] {subject} <ACTION>...");
        println!();
        println!("Actions:");
        println!();
        for (action, title) in available {
            println!("  {action:<9}: {title}");
        }
        return Ok(());
    }

    // Case 3: run the actions.
    let outcome = run(&mut ctx, kind, &name, &actions);
    ctx.close();
    outcome?;
    Ok(())
}

fn run(ctx: &mut Context, kind: Kind, name: &str, actions: &[String]) -> rollout::Result<()> {
    for action in actions {
        rollout::dispatch(ctx, kind, name, action)?;
    }
    Ok(())
}
