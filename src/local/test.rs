use super::*;
use std::fs;

mod run {
    use super::*;

    #[test]
    fn captures_stdout() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let output = LocalHost.run(&LocalCommand::argv(["echo", "hello"]), dir.path())?;
        assert_eq!("hello\n", output);
        Ok(())
    }

    #[test]
    fn runs_in_cwd() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("marker"), "")?;
        let output = LocalHost.run(&LocalCommand::line("ls"), dir.path())?;
        assert_eq!("marker\n", output);
        Ok(())
    }

    #[test]
    fn exit_failure() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let error = LocalHost
            .run(&LocalCommand::argv(["bash", "-c", "exit 3"]), dir.path())
            .unwrap_err();
        match error {
            Error::LocalCommandFailed { argv, status } => {
                assert_eq!("bash -c 'exit 3'", argv);
                assert_eq!(Some(3), status);
            }
            other => panic!("expected LocalCommandFailed, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn failure_to_start() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let error = LocalHost
            .run(&LocalCommand::line("surely-not-a-real-program-name"), dir.path())
            .unwrap_err();
        assert!(matches!(error, Error::Io(_)), "got {error:?}");
        Ok(())
    }
}

mod words {
    use super::*;

    #[test]
    fn line_is_split_with_quotes() {
        let words = LocalCommand::line("git commit -m 'two words'").words().unwrap();
        assert_eq!(vec!["git", "commit", "-m", "two words"], words);
    }

    #[test]
    fn argv_is_untouched() {
        let words = LocalCommand::argv(["~/bin/python", "setup.py"]).words().unwrap();
        assert_eq!(vec!["~/bin/python", "setup.py"], words);
    }

    #[test]
    fn blank_commands_are_rejected() {
        assert!(LocalCommand::line("   ").words().is_err());
        assert!(LocalCommand::Argv(vec![]).words().is_err());
    }

    #[test]
    fn unbalanced_quotes_are_rejected() {
        assert!(LocalCommand::line("echo 'oops").words().is_err());
    }
}

mod expand_home {
    use super::*;

    #[test]
    fn expands_leading_tilde() {
        let home = home::home_dir().unwrap();
        assert_eq!(format!("{}/src", home.display()), expand_home("~/src"));
        assert_eq!(home.display().to_string(), expand_home("~"));
    }

    #[test]
    fn leaves_other_paths_alone() {
        assert_eq!("/tmp/~", expand_home("/tmp/~"));
        assert_eq!("~alice/src", expand_home("~alice/src"));
        assert_eq!("relative", expand_home("relative"));
    }
}

mod quote {
    use super::*;

    #[test]
    fn quotes_words_with_spaces() {
        assert_eq!("bash -c 'echo -n && false'", quote(&["bash", "-c", "echo -n && false"]));
        assert_eq!("git fetch origin", quote(&["git", "fetch", "origin"]));
    }
}
