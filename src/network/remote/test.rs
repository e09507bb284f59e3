use super::*;
use crate::network::{Connect, ConnectionKey, ExecOutput, ShellMode};
use crate::testing::{Event, FakeNetwork, Transcript};

fn transport(network: &FakeNetwork) -> Box<dyn Transport> {
    let key = ConnectionKey {
        host: "example.com".to_string(),
        port: 22,
        user: None,
        mode: ShellMode::Exec,
    };
    network.clone().connect(&key).unwrap()
}

fn channel_closes(network: &FakeNetwork) -> usize {
    network
        .events()
        .iter()
        .filter(|event| matches!(event, Event::ChannelClosed { .. }))
        .count()
}

mod run_direct {
    use super::*;

    #[test]
    fn forwards_stdout() -> anyhow::Result<()> {
        let network = FakeNetwork::new();
        network.respond(
            "whoami",
            ExecOutput {
                status: 0,
                stdout: b"deploy\n".to_vec(),
                stderr: b"ignored".to_vec(),
            },
        );
        let mut transport = transport(&network);
        let mut terminal = Transcript::default();

        run_direct(transport.as_mut(), "/srv", "whoami", &mut terminal)?;

        assert_eq!(vec!["cd /srv && whoami"], network.commands());
        assert_eq!("deploy\n", terminal.output());
        assert_eq!("", terminal.errors());
        assert_eq!(1, channel_closes(&network));
        Ok(())
    }

    #[test]
    fn failure_forwards_stderr() {
        let network = FakeNetwork::new();
        network.fail("make", 2, "make: *** No targets.\n");
        let mut transport = transport(&network);
        let mut terminal = Transcript::default();

        let error = run_direct(transport.as_mut(), "/srv", "make", &mut terminal).unwrap_err();

        match error {
            Error::RemoteCommandFailed { command, status } => {
                assert_eq!("make", command);
                assert_eq!(2, status);
            }
            other => panic!("expected RemoteCommandFailed, got {other:?}"),
        }
        assert_eq!("make: *** No targets.\n", terminal.errors());
        assert_eq!("", terminal.output());
        assert_eq!(1, channel_closes(&network));
    }
}

mod run_in_shell {
    use super::*;

    #[test]
    fn sends_command_and_sentinel() -> anyhow::Result<()> {
        let network = FakeNetwork::new();
        let mut transport = transport(&network);
        let mut terminal = Transcript::default();

        run_in_shell(transport.as_mut(), "~/app", "./restart.sh", &mut terminal)?;

        assert_eq!(vec!["cd ~/app\n./restart.sh\necho EOF\n"], network.commands());
        assert_eq!(1, channel_closes(&network));
        Ok(())
    }

    #[test]
    fn strips_sentinel() -> anyhow::Result<()> {
        let network = FakeNetwork::new();
        network.script_shell(
            vec![
                Recv::Idle,
                Recv::Data(b"starting\n".to_vec()),
                Recv::Idle,
                Recv::Data(b"done\nEO".to_vec()),
                Recv::Data(b"F\n".to_vec()),
                Recv::Data(b"never read".to_vec()),
            ],
            &["warning: slow\n"],
        );
        let mut transport = transport(&network);
        let mut terminal = Transcript::default();

        run_in_shell(transport.as_mut(), "/srv", "./start.sh", &mut terminal)?;

        assert_eq!("starting\ndone\n", terminal.output());
        assert_eq!("warning: slow\n", terminal.errors());
        Ok(())
    }

    #[test]
    fn stops_when_stream_closes() -> anyhow::Result<()> {
        let network = FakeNetwork::new();
        network.script_shell(vec![Recv::Data(b"exit\nEO".to_vec())], &[]);
        let mut transport = transport(&network);
        let mut terminal = Transcript::default();

        run_in_shell(transport.as_mut(), "/srv", "exit", &mut terminal)?;

        assert_eq!("exit\nEO", terminal.output());
        Ok(())
    }

    #[test]
    fn ignores_exit_status() -> anyhow::Result<()> {
        let network = FakeNetwork::new();
        network.fail("false", 1, "");
        let mut transport = transport(&network);
        let mut terminal = Transcript::default();

        run_in_shell(transport.as_mut(), "/srv", "false", &mut terminal)?;
        Ok(())
    }
}

mod with_channel {
    use super::*;

    #[test]
    fn closes_channel_on_error() {
        let network = FakeNetwork::new();
        let mut transport = transport(&network);

        let result: Result<()> = with_channel(transport.as_mut(), |_| {
            Err(Error::config("something broke"))
        });

        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(1, channel_closes(&network));
    }
}

mod sentinel_scanner {
    use super::*;

    #[test]
    fn whole_sentinel() {
        let mut scanner = SentinelScanner::default();
        assert_eq!(Scan::Done(b"out\n".to_vec()), scanner.push(b"out\nEOF\n"));
    }

    #[test]
    fn holds_back_possible_prefix() {
        let mut scanner = SentinelScanner::default();
        assert_eq!(Scan::Pending(b"out\n".to_vec()), scanner.push(b"out\nE"));
        assert_eq!(Scan::Pending(vec![]), scanner.push(b"O"));
        assert_eq!(Scan::Done(vec![]), scanner.push(b"F\n"));
    }

    #[test]
    fn releases_false_prefix() {
        let mut scanner = SentinelScanner::default();
        assert_eq!(Scan::Pending(b"".to_vec()), scanner.push(b"EO"));
        assert_eq!(Scan::Pending(b"EOS\n".to_vec()), scanner.push(b"S\n"));
    }

    #[test]
    fn sentinel_in_the_middle_is_output() {
        let mut scanner = SentinelScanner::default();
        assert_eq!(
            Scan::Pending(b"EOF\nmore\n".to_vec()),
            scanner.push(b"EOF\nmore\n")
        );
    }

    #[test]
    fn finish_releases_held_bytes() {
        let mut scanner = SentinelScanner::default();
        assert_eq!(Scan::Pending(b"a".to_vec()), scanner.push(b"aEOF"));
        assert_eq!(b"EOF".to_vec(), scanner.finish());
    }
}
