//! Test doubles for the seams of Rollout: the network, the local executor, and the terminal.
//!
//! These are public so that integration tests can drive whole runs without an SSH server, but
//! they are not part of the supported API and are hidden from the documentation.
//!
//! [FakeNetwork] simulates any number of remote hosts that share one tiny file system (a set of
//! paths keyed by host) and records everything that happens, in order, as [Event]s. A [FakeLocal]
//! obtained from [FakeNetwork::local] records into the same log, so tests can assert the relative
//! order of local and remote steps.

use crate::error::{Error, Result};
use crate::local::{LocalCommand, LocalExecutor};
use crate::network::{
    Channel, Connect, ConnectionKey, ExecOutput, FileKind, Recv, Stream, Transport,
};
use crate::terminal::Terminal;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Something that happened on a fake host or on the fake control host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A session was opened. Sessions are numbered from 0 in order of creation.
    Connect { session: usize, key: ConnectionKey },

    /// A command ran through [Channel::exec].
    Exec { session: usize, command: String },

    /// Input was sent to an interactive shell.
    Shell { session: usize, input: String },

    /// A file was copied to a remote host.
    Copy {
        session: usize,
        local: PathBuf,
        remote: String,
    },

    /// A channel was closed.
    ChannelClosed { session: usize },

    /// A session was closed.
    Close { session: usize },

    /// A command ran on the control host.
    Local { cwd: PathBuf, command: String },
}

#[derive(Debug)]
struct State {
    events: Vec<Event>,
    sessions: usize,
    files: HashMap<(String, String), FileKind>,
    home: String,
    remote_responses: Vec<(String, ExecOutput)>,
    local_responses: Vec<(String, std::result::Result<String, Option<i32>>)>,
    shell_stdout: Vec<Recv>,
    shell_stderr: Vec<Vec<u8>>,
    refusal: Option<String>,
    copy_refusal: Option<String>,
}

/// A simulated network of remote hosts. Cheap to clone; clones share state.
#[derive(Clone, Debug)]
pub struct FakeNetwork(Arc<Mutex<State>>);

impl Default for FakeNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeNetwork {
    /// Creates a network where every command succeeds silently, interactive shells print nothing
    /// but the sentinel, and every remote home directory is `/home/deploy`.
    pub fn new() -> Self {
        FakeNetwork(Arc::new(Mutex::new(State {
            events: vec![],
            sessions: 0,
            files: HashMap::new(),
            home: "/home/deploy".to_string(),
            remote_responses: vec![],
            local_responses: vec![],
            shell_stdout: vec![Recv::Data(b"EOF\n".to_vec())],
            shell_stderr: vec![],
            refusal: None,
            copy_refusal: None,
        })))
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.0.lock().unwrap()
    }

    /// Returns a [Connect] implementation that opens sessions on this network.
    pub fn connector(&self) -> Box<dyn Connect> {
        Box::new(self.clone())
    }

    /// Returns a [LocalExecutor] that records into this network's event log.
    pub fn local(&self) -> FakeLocal {
        FakeLocal(self.clone())
    }

    /// Returns every recorded event, in order.
    pub fn events(&self) -> Vec<Event> {
        self.state().events.clone()
    }

    /// Returns the commands run on remote hosts (exec'd or sent to a shell) and on the control
    /// host, in order. Local commands are prefixed with `local: `.
    pub fn commands(&self) -> Vec<String> {
        self.state()
            .events
            .iter()
            .filter_map(|event| match event {
                Event::Exec { command, .. } => Some(command.clone()),
                Event::Shell { input, .. } => Some(input.clone()),
                Event::Local { command, .. } => Some(format!("local: {command}")),
                _ => None,
            })
            .collect()
    }

    /// Returns the number of sessions opened so far.
    pub fn connects(&self) -> usize {
        self.state().sessions
    }

    /// Returns the remote paths files were copied to, in order.
    pub fn copies(&self) -> Vec<String> {
        self.state()
            .events
            .iter()
            .filter_map(|event| match event {
                Event::Copy { remote, .. } => Some(remote.clone()),
                _ => None,
            })
            .collect()
    }

    /// Creates a file or directory at `path` on `host`.
    pub fn add_file(&self, host: &str, path: &str, kind: FileKind) {
        self.state()
            .files
            .insert((host.to_string(), path.to_string()), kind);
    }

    /// Makes remote commands containing `pattern` produce `output`. The first matching pattern
    /// wins; commands that match nothing succeed silently.
    pub fn respond(&self, pattern: &str, output: ExecOutput) {
        self.state()
            .remote_responses
            .push((pattern.to_string(), output));
    }

    /// Makes remote commands containing `pattern` exit with `status` and print `stderr`.
    pub fn fail(&self, pattern: &str, status: i32, stderr: &str) {
        self.respond(
            pattern,
            ExecOutput {
                status,
                stdout: vec![],
                stderr: stderr.as_bytes().to_vec(),
            },
        );
    }

    /// Makes local commands containing `pattern` print `stdout`.
    pub fn respond_local(&self, pattern: &str, stdout: &str) {
        self.state()
            .local_responses
            .push((pattern.to_string(), Ok(stdout.to_string())));
    }

    /// Makes local commands containing `pattern` exit with `status`.
    pub fn fail_local(&self, pattern: &str, status: i32) {
        self.state()
            .local_responses
            .push((pattern.to_string(), Err(Some(status))));
    }

    /// Sets what every interactive shell prints: a sequence of reads on standard output, then the
    /// chunks buffered on standard error. Reads past the end of `stdout` report [Recv::Closed].
    pub fn script_shell(&self, stdout: Vec<Recv>, stderr: &[&str]) {
        let mut state = self.state();
        state.shell_stdout = stdout;
        state.shell_stderr = stderr.iter().map(|chunk| chunk.as_bytes().to_vec()).collect();
    }

    /// Makes every future connection attempt fail with `reason`.
    pub fn refuse_connections(&self, reason: &str) {
        self.state().refusal = Some(reason.to_string());
    }

    /// Makes every future file copy fail with `reason`.
    pub fn refuse_uploads(&self, reason: &str) {
        self.state().copy_refusal = Some(reason.to_string());
    }
}

impl Connect for FakeNetwork {
    fn connect(&mut self, key: &ConnectionKey) -> Result<Box<dyn Transport>> {
        let mut state = self.state();
        if let Some(reason) = &state.refusal {
            return Err(Error::Connection {
                destination: key.to_string(),
                reason: reason.clone(),
            });
        }
        let session = state.sessions;
        state.sessions += 1;
        state.events.push(Event::Connect {
            session,
            key: key.clone(),
        });
        Ok(Box::new(FakeTransport {
            network: self.clone(),
            session,
            host: key.host.clone(),
        }))
    }
}

/// A session on a [FakeNetwork].
#[derive(Debug)]
pub struct FakeTransport {
    network: FakeNetwork,
    session: usize,
    host: String,
}

impl Transport for FakeTransport {
    fn open_channel(&mut self) -> Result<Box<dyn Channel + '_>> {
        Ok(Box::new(FakeChannel {
            network: self.network.clone(),
            session: self.session,
            stdout: VecDeque::new(),
            stderr: VecDeque::new(),
        }))
    }

    fn stat(&mut self, path: &str) -> Result<Option<FileKind>> {
        Ok(self
            .network
            .state()
            .files
            .get(&(self.host.clone(), path.to_string()))
            .copied())
    }

    fn home(&mut self) -> Result<String> {
        Ok(self.network.state().home.clone())
    }

    fn copy(&mut self, local: &Path, remote: &str) -> Result<()> {
        let mut state = self.network.state();
        if let Some(reason) = &state.copy_refusal {
            return Err(Error::Io(io::Error::other(reason.clone())));
        }
        state.events.push(Event::Copy {
            session: self.session,
            local: local.to_owned(),
            remote: remote.to_string(),
        });
        state
            .files
            .insert((self.host.clone(), remote.to_string()), FileKind::File);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.network.state().events.push(Event::Close {
            session: self.session,
        });
        Ok(())
    }
}

/// A channel on a [FakeTransport].
#[derive(Debug)]
pub struct FakeChannel {
    network: FakeNetwork,
    session: usize,
    stdout: VecDeque<Recv>,
    stderr: VecDeque<Vec<u8>>,
}

impl Channel for FakeChannel {
    fn exec(&mut self, command: &str) -> Result<ExecOutput> {
        let mut state = self.network.state();
        state.events.push(Event::Exec {
            session: self.session,
            command: command.to_string(),
        });
        Ok(state
            .remote_responses
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }

    fn invoke_shell(&mut self) -> Result<()> {
        let state = self.network.state();
        self.stdout = state.shell_stdout.iter().cloned().collect();
        self.stderr = state.shell_stderr.iter().cloned().collect();
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.network.state().events.push(Event::Shell {
            session: self.session,
            input: String::from_utf8_lossy(data).into_owned(),
        });
        Ok(())
    }

    fn recv(&mut self, stream: Stream) -> Result<Recv> {
        Ok(match stream {
            Stream::Stdout => self.stdout.pop_front().unwrap_or(Recv::Closed),
            Stream::Stderr => self.stderr.pop_front().map_or(Recv::Idle, Recv::Data),
        })
    }

    fn close(&mut self) -> Result<()> {
        self.network.state().events.push(Event::ChannelClosed {
            session: self.session,
        });
        Ok(())
    }
}

/// A [LocalExecutor] that records commands instead of running them.
#[derive(Clone, Debug)]
pub struct FakeLocal(FakeNetwork);

impl LocalExecutor for FakeLocal {
    fn run(&mut self, command: &LocalCommand, cwd: &Path) -> Result<String> {
        let display = command.to_string();
        let argv = crate::local::quote(&command.words()?);
        let mut state = self.0.state();
        state.events.push(Event::Local {
            cwd: cwd.to_owned(),
            command: display.clone(),
        });
        let response = state
            .local_responses
            .iter()
            .find(|(pattern, _)| display.contains(pattern.as_str()))
            .map(|(_, response)| response.clone());
        match response {
            Some(Ok(stdout)) => Ok(stdout),
            Some(Err(status)) => Err(Error::LocalCommandFailed { argv, status }),
            None => Ok(String::new()),
        }
    }
}

/// A [Terminal] that keeps everything written to it. Cheap to clone; clones share state, so a
/// test can hand one clone to a [crate::core::Context] and read the other.
#[derive(Clone, Debug, Default)]
pub struct Transcript(Arc<Mutex<(Vec<u8>, Vec<u8>)>>);

impl Transcript {
    /// Everything written to standard output, lossily decoded.
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap().0).into_owned()
    }

    /// Everything written to standard error, lossily decoded.
    pub fn errors(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap().1).into_owned()
    }
}

impl Terminal for Transcript {
    fn stdout(&mut self, data: &[u8]) -> io::Result<()> {
        self.0.lock().unwrap().0.extend_from_slice(data);
        Ok(())
    }

    fn stderr(&mut self, data: &[u8]) -> io::Result<()> {
        self.0.lock().unwrap().1.extend_from_slice(data);
        Ok(())
    }
}

/// Captures everything logged through [tracing] while `f` runs on this thread.
///
/// Returns the value of `f` and the captured log text (without ANSI colors).
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let buffer = Buffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(move || writer.clone())
        .finish();
    let value = tracing::subscriber::with_default(subscriber, f);
    let logs = String::from_utf8_lossy(&buffer.0.lock().unwrap()).into_owned();
    (value, logs)
}
