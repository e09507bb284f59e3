//! Runs commands on the control host.
//!
//! Building packages, talking to git, and installing into a local environment all happen here.
//! Unlike remote commands, local commands have their standard output captured and returned to
//! the caller, who is free to parse it (e.g. to learn a package's version) or forward it.

use crate::error::{Error, Result};
use shlex::Quoter;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::info;

/// A command to run on the control host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocalCommand {
    /// A program and its arguments, passed through untouched.
    Argv(Vec<String>),

    /// A command line. A leading `~` in any word is expanded to the user's home directory, and
    /// the line is split into words with shell quoting rules. No shell is involved.
    Line(String),
}

impl LocalCommand {
    /// Builds a [LocalCommand::Argv] from anything that yields strings.
    pub fn argv<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        LocalCommand::Argv(words.into_iter().map(Into::into).collect())
    }

    /// Builds a [LocalCommand::Line].
    pub fn line(line: impl Into<String>) -> Self {
        LocalCommand::Line(line.into())
    }

    /// Returns the words that make up the command.
    ///
    /// # Errors
    ///
    /// Returns an error if a [LocalCommand::Line] has unbalanced quotes or is blank.
    pub fn words(&self) -> Result<Vec<String>> {
        let words = match self {
            LocalCommand::Argv(words) => words.clone(),
            LocalCommand::Line(line) => shlex::split(line)
                .ok_or_else(|| Error::config(format!("malformed command line: {line}")))?
                .iter()
                .map(|word| expand_home(word))
                .collect(),
        };
        if words.is_empty() {
            return Err(Error::config("tried to run a blank command"));
        }
        Ok(words)
    }
}

impl std::fmt::Display for LocalCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocalCommand::Argv(words) => f.write_str(&quote(words)),
            LocalCommand::Line(line) => f.write_str(line),
        }
    }
}

/// Runs [LocalCommand]s on the control host.
///
/// [LocalHost] is the production implementation. Tests substitute a recorder.
pub trait LocalExecutor {
    /// Runs `command` in `cwd` and returns its captured standard output.
    ///
    /// Standard error is inherited from this process.
    ///
    /// # Errors
    ///
    /// Returns [Error::LocalCommandFailed] if the command exits with a non-zero status, or
    /// [Error::Io] if it cannot be started.
    fn run(&mut self, command: &LocalCommand, cwd: &Path) -> Result<String>;
}

/// The production [LocalExecutor].
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalHost;

impl LocalExecutor for LocalHost {
    fn run(&mut self, command: &LocalCommand, cwd: &Path) -> Result<String> {
        let words = command.words()?;
        info!("{} $ {}", cwd.display(), command);

        // `words` is never empty; LocalCommand::words guarantees it.
        let (program, args) = words.split_first().ok_or_else(|| {
            Error::config(format!("tried to run a blank command in {}", cwd.display()))
        })?;

        let output = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::inherit())
            .stderr(Stdio::inherit())
            .output()?;

        if !output.status.success() {
            return Err(Error::LocalCommandFailed {
                argv: quote(&words),
                status: output.status.code(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Expands a leading `~` or `~/` to the current user's home directory.
///
/// Paths that do not start with `~`, or that name another user's home (`~alice`), are returned
/// unchanged. If the home directory cannot be determined, the path is returned unchanged, too.
pub fn expand_home(path: &str) -> String {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => return path.to_string(),
    };
    match home::home_dir() {
        Some(home) => format!("{}{rest}", home.display()),
        None => path.to_string(),
    }
}

/// [expand_home] for [Path]s.
pub fn expand_home_path(path: impl AsRef<Path>) -> PathBuf {
    match path.as_ref().to_str() {
        Some(s) => PathBuf::from(expand_home(s)),
        None => path.as_ref().to_owned(),
    }
}

/// Joins words into a user-friendly command line.
///
/// Tries to use shlex to quote the words properly. If that fails (e.g. because of a nul byte),
/// naively joins them with spaces. This is for display only.
pub fn quote<S: AsRef<OsStr>>(words: &[S]) -> String {
    let words: Vec<String> = words
        .iter()
        .map(|w| w.as_ref().to_string_lossy().to_string())
        .collect();
    match Quoter::new().join(words.iter().map(|s| &s[..])) {
        Ok(s) => s,
        Err(_) => words.join(" "),
    }
}

#[cfg(test)]
mod test;
