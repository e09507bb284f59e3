use super::*;
use crate::config::RunOptions;
use crate::core::fixtures::{context, context_with};
use crate::network::FileKind;
use crate::testing::{capture_logs, Event, FakeNetwork};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::thread;

fn pyenv(ctx: &Context, name: &str) -> PyEnv {
    ctx.config.pyenv(name).unwrap().clone()
}

/// Commands run on remote hosts, in order.
fn remote_commands(network: &FakeNetwork) -> Vec<String> {
    network
        .commands()
        .into_iter()
        .filter(|command| !command.starts_with("local: "))
        .collect()
}

fn position(events: &[Event], matches: impl Fn(&Event) -> bool) -> usize {
    events.iter().position(matches).unwrap()
}

fn last_position(events: &[Event], matches: impl Fn(&Event) -> bool) -> usize {
    events.iter().rposition(matches).unwrap()
}

mod package {
    use super::*;

    #[test]
    fn works() -> anyhow::Result<()> {
        let package: Package = "lib/core:release".parse()?;
        assert_eq!("lib/core", package.source);
        assert_eq!("release", package.branch);
        Ok(())
    }

    #[test]
    fn needs_a_branch() {
        for bad in ["app", "app:", ":master"] {
            assert!(bad.parse::<Package>().is_err(), "{bad:?} was accepted");
        }
    }
}

mod deploy {
    use super::*;

    #[test]
    fn builds_uploads_installs_and_restarts() -> anyhow::Result<()> {
        let (mut ctx, network, _, _dir) = context(RunOptions::default());
        network.add_file("prod.example.com", "/tmp", FileKind::Directory);
        let prod = pyenv(&ctx, "prod");

        action::run(&prod, PyEnvAction::Deploy, &mut ctx)?;

        assert_eq!(
            vec!["/tmp/app-1.0.tar.gz", "/tmp/lib-1.0.tar.gz"],
            network.copies()
        );
        assert_eq!(
            vec![
                "cd /tmp && tar xzf app-1.0.tar.gz",
                "cd /tmp/app-1.0 && ~/envs/prod/bin/python setup.py --quiet install --force",
                "cd /tmp && rm -rf /tmp/app-1.0",
                "cd /tmp && tar xzf lib-1.0.tar.gz",
                "cd /tmp/lib-1.0 && ~/envs/prod/bin/python setup.py --quiet install --force",
                "cd /tmp && rm -rf /tmp/lib-1.0",
                "cd ~/envs/prod && ./bin/icms-stop.py sites/blog",
                "cd ~/envs/prod && ./bin/icms-stop.py --force sites/blog",
                "cd ~/envs/prod && ./bin/icms-start.py -d sites/blog",
                "cd ~/envs/prod && ./bin/icms-stop.py sites/www",
                "cd ~/envs/prod && ./bin/icms-stop.py --force sites/www",
                "cd ~/envs/prod && ./bin/icms-start.py -d sites/www",
            ],
            remote_commands(&network)
        );

        let events = network.events();
        let last_build = last_position(&events, |event| {
            matches!(event, Event::Local { command, .. } if command.ends_with("sdist"))
        });
        let first_copy = position(&events, |event| matches!(event, Event::Copy { .. }));
        let last_copy = last_position(&events, |event| matches!(event, Event::Copy { .. }));
        let first_exec = position(&events, |event| matches!(event, Event::Exec { .. }));
        assert!(last_build < first_copy);
        assert!(last_copy < first_exec);
        assert_eq!(1, network.connects());
        Ok(())
    }

    #[test]
    fn builds_each_package_at_its_branch() -> anyhow::Result<()> {
        let (mut ctx, network, _, _dir) = context(RunOptions::default());
        let prod = pyenv(&ctx, "prod");

        action::run(&prod, PyEnvAction::Build, &mut ctx)?;

        let checkouts: Vec<String> = network
            .commands()
            .into_iter()
            .filter(|command| command.starts_with("local: git checkout"))
            .collect();
        assert_eq!(
            vec!["local: git checkout release", "local: git checkout master"],
            checkouts
        );
        assert_eq!(0, network.connects());
        Ok(())
    }

    #[test]
    fn local_environments_skip_upload() -> anyhow::Result<()> {
        let (mut ctx, network, _, dir) = context(RunOptions::default());
        let dev = pyenv(&ctx, "dev");

        let (result, logs) = capture_logs(|| action::run(&dev, PyEnvAction::Deploy, &mut ctx));
        result?;

        assert!(logs.contains("Skip upload for pyenv \"dev\""), "got {logs}");
        assert_eq!(0, network.connects());
        let events = network.events();
        let install = position(&events, |event| {
            matches!(event, Event::Local { command, .. } if command.contains("install"))
        });
        assert_eq!(
            Event::Local {
                cwd: dir.path().join("cache/app"),
                command: "/opt/dev/bin/python setup.py install --force".to_string(),
            },
            events[install]
        );
        assert_eq!(
            vec![
                "local: ./bin/icms-stop.py sites/sandbox",
                "local: ./bin/icms-stop.py --force sites/sandbox",
                "local: ./bin/icms-start.py -d sites/sandbox",
            ],
            network.commands()[network.commands().len() - 3..]
        );
        Ok(())
    }

    #[test]
    fn offline_stops_at_upload() {
        let (mut ctx, network, _, _dir) = context(RunOptions {
            offline: true,
            ..RunOptions::default()
        });
        let prod = pyenv(&ctx, "prod");

        let error = action::run(&prod, PyEnvAction::Deploy, &mut ctx).unwrap_err();

        assert!(
            matches!(error, Error::OfflineModeViolation { .. }),
            "got {error:?}"
        );
        assert_eq!(0, network.connects());
        assert!(network
            .commands()
            .iter()
            .all(|command| !command.contains("git clone") && !command.contains("icms")));
    }

    #[test]
    fn failed_install_skips_restart() {
        let (mut ctx, network, _, _dir) = context(RunOptions::default());
        network.add_file("prod.example.com", "/tmp", FileKind::Directory);
        network.fail("setup.py --quiet install", 1, "error: no space left on device\n");
        let prod = pyenv(&ctx, "prod");

        let error = action::run(&prod, PyEnvAction::Deploy, &mut ctx).unwrap_err();

        assert!(
            matches!(error, Error::RemoteCommandFailed { status: 1, .. }),
            "got {error:?}"
        );
        let remote = remote_commands(&network);
        assert_eq!(2, remote.len(), "got {remote:?}");
        assert!(remote.iter().all(|command| !command.contains("icms")));
    }
}

mod upload {
    use super::*;

    #[test]
    fn is_idempotent() -> anyhow::Result<()> {
        let (mut ctx, network, ..) = context(RunOptions::default());
        network.add_file("prod.example.com", "/tmp", FileKind::Directory);
        let prod = pyenv(&ctx, "prod");

        action::run(&prod, PyEnvAction::Upload, &mut ctx)?;
        action::run(&prod, PyEnvAction::Upload, &mut ctx)?;

        assert_eq!(2, network.copies().len());
        Ok(())
    }
}

mod install {
    use super::*;

    #[test]
    fn interactive_shells() -> anyhow::Result<()> {
        let (mut ctx, network, ..) = context(RunOptions::default());
        let old = pyenv(&ctx, "old");

        action::run(&old, PyEnvAction::Install, &mut ctx)?;

        assert_eq!(
            vec![
                "cd /tmp\ntar xzf app-1.0.tar.gz\necho EOF\n",
                "cd /tmp/app-1.0\n/srv/old/bin/python setup.py --quiet install --force\necho EOF\n",
                "cd /tmp\nrm -rf /tmp/app-1.0\necho EOF\n",
            ],
            remote_commands(&network)
        );
        Ok(())
    }
}

mod vhosts {
    use super::*;

    #[test]
    fn lists_every_instance() -> anyhow::Result<()> {
        let (mut ctx, network, ..) = context(RunOptions::default());
        let prod = pyenv(&ctx, "prod");

        let (result, logs) = capture_logs(|| action::run(&prod, PyEnvAction::Vhosts, &mut ctx));
        result?;

        let commands = remote_commands(&network);
        assert_eq!(2, commands.len());
        assert!(commands[0].contains("./sites/blog/catalog"));
        assert!(commands[1].contains("./sites/www/catalog"));
        assert!(!logs.contains("get_unique_values"), "got {logs}");
        Ok(())
    }
}

mod test {
    use super::*;

    const CONFIG: &str = r#"
server prod:
  host: prod.example.com

pyenv prod:
  location: deploy@prod:envs/prod
  packages: ""

instance a:
  pyenv: prod
  path: sites/a
  uri: http://127.0.0.1:{port}/

instance b:
  pyenv: prod
  path: sites/b
  uri: http://127.0.0.1:1

instance c:
  pyenv: prod
  path: sites/c
"#;

    /// Answers one HTTP request with 200 and returns the request line.
    fn serve_once(listener: TcpListener) -> thread::JoinHandle<String> {
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line.trim().is_empty() {
                    break;
                }
            }
            let mut stream = reader.into_inner();
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                .unwrap();
            request_line
        })
    }

    #[test]
    fn probes_each_instance() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        let server = serve_once(listener);
        let yaml = CONFIG.replace("{port}", &port.to_string());
        let (mut ctx, network, transcript, _) = context_with(&yaml, RunOptions::default());
        let prod = pyenv(&ctx, "prod");

        let (result, logs) = capture_logs(|| action::run(&prod, PyEnvAction::Test, &mut ctx));
        result?;

        assert_eq!("GET /;_ctrl HTTP/1.1", server.join().unwrap().trim());
        assert_eq!(
            format!("[OK] http://127.0.0.1:{port}/\n[ERROR] http://127.0.0.1:1\n"),
            transcript.output()
        );
        assert!(logs.contains("Instance \"c\" has no uri"), "got {logs}");
        assert_eq!(0, network.connects());
        Ok(())
    }
}
