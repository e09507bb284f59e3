//! The production network backend, based on the [openssh] crate.
//!
//! # Sessions
//!
//! Every [ConnectionKey] gets one [openssh::Session] over OpenSSH's native multiplexer. The system
//! `ssh` program does the actual work, so `~/.ssh/config`, agents, and keys all behave the way the
//! user expects. Unknown host keys are accepted and recorded on first use
//! (`StrictHostKeyChecking=accept-new`).
//!
//! The control master is started here rather than by [openssh::SessionBuilder], which always runs
//! it in batch mode with no terminal. Ours inherits the terminal, so when a key is encrypted and
//! not in an agent, `ssh` asks for its passphrase. It goes to the background once the user is
//! authenticated, and the session then talks to it through its control socket.
//!
//! [openssh] is async, but Rollout is not: each [OpenSshTransport] owns a current-thread Tokio
//! runtime and blocks on every call. There is never more than one command in flight, so nothing is
//! lost by doing so.
//!
//! # Channels
//!
//! A [Channel] is one remote process. For direct execution, that process is the command itself.
//! For an interactive shell, it is the user's shell started with `-i` and fed through its
//! standard input. Reads from an interactive shell wait at most [READ_TIMEOUT], which is how
//! "no output right now" is told apart from "no output ever again".
//!
//! # Uploads
//!
//! Files are copied by running `scp` on the control host, pointed at the session's control socket
//! so that the copy rides on the existing, already-authenticated connection.

use super::{Channel, Connect, ConnectionKey, ExecOutput, FileKind, Recv, Stream, Transport};
use crate::error::{Error, Result};
use crate::local::quote;
use openssh::{Child, Session, Stdio};
use shlex::Quoter;
use std::error::Error as _;
use std::fs;
use std::path::Path;
use std::process::{self, Command};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::runtime::Runtime;

/// How long a read from an interactive shell waits before reporting [Recv::Idle].
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// File names of the control socket and the master's log inside a session directory.
const CONTROL_SOCKET: &str = "master";
const MASTER_LOG: &str = "log";

/// The remote command that starts an interactive shell.
const INTERACTIVE_SHELL: &str = r#"exec "${SHELL:-/bin/sh}" -i"#;

/// Opens [OpenSshTransport]s. The production [Connect] implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenSsh;

impl Connect for OpenSsh {
    fn connect(&mut self, key: &ConnectionKey) -> Result<Box<dyn Transport>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let dir = tempfile::Builder::new().prefix(".rollout-ssh").tempdir()?;
        start_master(Command::new("ssh"), key, dir.path())?;

        // The session removes the directory when it is closed.
        let session = Session::new_native_mux(dir);

        Ok(Box::new(OpenSshTransport {
            key: key.clone(),
            runtime,
            session,
        }))
    }
}

/// A live SSH session and the runtime that drives it.
pub struct OpenSshTransport {
    key: ConnectionKey,
    runtime: Runtime,
    session: Session,
}

impl OpenSshTransport {
    /// Runs `command` to completion and returns its standard output. Fails unless the command
    /// succeeds.
    fn checked_output(&self, command: &str) -> Result<String> {
        let output = output(&self.runtime, &self.session, &self.key, command)?;
        if output.status != 0 {
            return Err(Error::RemoteCommandFailed {
                command: command.to_string(),
                status: output.status,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Transport for OpenSshTransport {
    fn open_channel(&mut self) -> Result<Box<dyn Channel + '_>> {
        Ok(Box::new(OpenSshChannel {
            key: &self.key,
            runtime: &self.runtime,
            session: &self.session,
            shell: None,
        }))
    }

    fn stat(&mut self, path: &str) -> Result<Option<FileKind>> {
        let stdout = self.checked_output(&stat_command(path)?)?;
        Ok(parse_stat(&stdout))
    }

    fn home(&mut self) -> Result<String> {
        // A non-interactive SSH command starts in the login user's home directory.
        Ok(self.checked_output("pwd")?.trim_end().to_string())
    }

    fn copy(&mut self, local: &Path, remote: &str) -> Result<()> {
        let mut command = Command::new("scp");
        command
            .arg("-q")
            .arg("-o")
            .arg(format!("ControlPath={}", self.session.control_socket().display()))
            .arg("-P")
            .arg(self.key.port.to_string())
            .arg(local)
            .arg(format!("{}:{remote}", self.key.destination()));

        let output = command.output()?;
        if !output.status.success() {
            let args: Vec<_> = command.get_args().collect();
            return Err(Error::LocalCommandFailed {
                argv: format!("scp {}", quote(&args)),
                status: output.status.code(),
            });
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        let OpenSshTransport {
            key,
            runtime,
            session,
        } = *self;
        runtime
            .block_on(session.close())
            .map_err(|error| ssh_error(&key, &error))
    }
}

/// One remote process on an [OpenSshTransport].
struct OpenSshChannel<'s> {
    key: &'s ConnectionKey,
    runtime: &'s Runtime,
    session: &'s Session,

    /// The interactive shell, once [Channel::invoke_shell] has started it.
    shell: Option<Child<&'s Session>>,
}

impl<'s> OpenSshChannel<'s> {
    fn shell(&mut self) -> Result<&mut Child<&'s Session>> {
        self.shell.as_mut().ok_or_else(|| Error::Connection {
            destination: self.key.to_string(),
            reason: "no interactive shell is running on this channel".to_string(),
        })
    }
}

impl<'s> Channel for OpenSshChannel<'s> {
    fn exec(&mut self, command: &str) -> Result<ExecOutput> {
        output(self.runtime, self.session, self.key, command)
    }

    fn invoke_shell(&mut self) -> Result<()> {
        let child = self
            .runtime
            .block_on(
                self.session
                    .raw_command(INTERACTIVE_SHELL)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn(),
            )
            .map_err(|error| ssh_error(self.key, &error))?;
        self.shell = Some(child);
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        let runtime = self.runtime;
        let key = self.key;
        let stdin = self.shell()?.stdin().as_mut().ok_or_else(|| Error::Connection {
            destination: key.to_string(),
            reason: "the shell's standard input is closed".to_string(),
        })?;
        runtime.block_on(async {
            stdin.write_all(data).await?;
            stdin.flush().await
        })?;
        Ok(())
    }

    fn recv(&mut self, stream: Stream) -> Result<Recv> {
        let runtime = self.runtime;
        let shell = self.shell()?;
        match stream {
            Stream::Stdout => match shell.stdout().as_mut() {
                Some(stdout) => read_with_timeout(runtime, stdout),
                None => Ok(Recv::Closed),
            },
            Stream::Stderr => match shell.stderr().as_mut() {
                Some(stderr) => read_with_timeout(runtime, stderr),
                None => Ok(Recv::Closed),
            },
        }
    }

    fn close(&mut self) -> Result<()> {
        let Some(mut shell) = self.shell.take() else {
            return Ok(());
        };
        // Closing standard input lets the shell exit on its own; disconnecting makes sure we stop
        // waiting for it even if a daemon it started keeps its output streams open.
        drop(shell.stdin().take());
        self.runtime.block_on(shell.disconnect())?;
        Ok(())
    }
}

/// Starts an SSH control master for `key` with `ssh`, and waits until it has gone to the
/// background. Its control socket and log live in `dir`.
///
/// The master keeps our standard input and error, so `ssh` can prompt for a passphrase.
fn start_master(mut ssh: Command, key: &ConnectionKey, dir: &Path) -> Result<()> {
    let log = dir.join(MASTER_LOG);
    ssh.arg("-E")
        .arg(&log)
        .arg("-S")
        .arg(dir.join(CONTROL_SOCKET))
        .args(["-M", "-f", "-N"])
        .args(["-o", "ControlPersist=yes"])
        .args(["-o", "StrictHostKeyChecking=accept-new"])
        .arg("-p")
        .arg(key.port.to_string());
    if let Some(user) = &key.user {
        ssh.arg("-l").arg(user);
    }
    ssh.arg("--").arg(&key.host).stdout(process::Stdio::null());

    let status = ssh.status()?;
    if status.success() {
        return Ok(());
    }
    let reason = fs::read_to_string(&log).unwrap_or_default().trim().to_string();
    if reason.is_empty() {
        return Err(classify(key, format!("ssh {status}")));
    }
    Err(classify(key, reason))
}

/// Runs `command` on `session` to completion, collecting its exit status and output.
fn output(
    runtime: &Runtime,
    session: &Session,
    key: &ConnectionKey,
    command: &str,
) -> Result<ExecOutput> {
    let output = runtime
        .block_on(session.raw_command(command).output())
        .map_err(|error| ssh_error(key, &error))?;
    Ok(ExecOutput {
        status: output.status.code().unwrap_or(-1),
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

/// Reads one chunk from `reader`, waiting at most [READ_TIMEOUT].
fn read_with_timeout<R: AsyncRead + Unpin>(runtime: &Runtime, reader: &mut R) -> Result<Recv> {
    let mut buffer = vec![0; 4096];
    let read = runtime.block_on(async {
        tokio::time::timeout(READ_TIMEOUT, reader.read(&mut buffer)).await
    });
    match read {
        Err(_elapsed) => Ok(Recv::Idle),
        Ok(Ok(0)) => Ok(Recv::Closed),
        Ok(Ok(n)) => {
            buffer.truncate(n);
            Ok(Recv::Data(buffer))
        }
        Ok(Err(error)) => Err(error.into()),
    }
}

/// Builds the remote command behind [Transport::stat].
///
/// The command prints `directory`, `file`, or nothing, and always succeeds.
fn stat_command(path: &str) -> Result<String> {
    let path = Quoter::new()
        .quote(path)
        .map_err(|error| Error::config(format!("cannot quote remote path {path:?}: {error}")))?;
    Ok(format!(
        "if [ -d {path} ]; then echo directory; elif [ -e {path} ]; then echo file; fi"
    ))
}

/// Parses the output of [stat_command].
fn parse_stat(stdout: &str) -> Option<FileKind> {
    match stdout.trim() {
        "directory" => Some(FileKind::Directory),
        "file" => Some(FileKind::File),
        _ => None,
    }
}

/// Renders an error and all of its sources on one line.
fn describe(error: &openssh::Error) -> String {
    let mut description = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        description.push_str(": ");
        description.push_str(&cause.to_string());
        source = cause.source();
    }
    description
}

/// Classifies a failure reported by [openssh].
fn ssh_error(key: &ConnectionKey, error: &openssh::Error) -> Error {
    classify(key, describe(error))
}

fn classify(key: &ConnectionKey, reason: String) -> Error {
    let destination = key.to_string();
    if reason.contains("Permission denied") || reason.contains("Too many authentication failures")
    {
        Error::Authentication {
            destination,
            reason,
        }
    } else {
        Error::Connection {
            destination,
            reason,
        }
    }
}
