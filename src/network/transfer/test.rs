use super::*;
use crate::network::{Connect, ConnectionKey, ShellMode};
use crate::testing::{capture_logs, FakeNetwork};

const HOST: &str = "example.com";

fn transport(network: &FakeNetwork) -> Box<dyn Transport> {
    let key = ConnectionKey {
        host: HOST.to_string(),
        port: 22,
        user: None,
        mode: ShellMode::Exec,
    };
    network.clone().connect(&key).unwrap()
}

#[test]
fn uploads_missing_file() -> anyhow::Result<()> {
    let network = FakeNetwork::new();
    let mut transport = transport(&network);

    let transfer = put(
        transport.as_mut(),
        HOST,
        Path::new("/tmp/dist/app-1.0.tar.gz"),
        "/srv/app-1.0.tar.gz",
    )?;

    assert_eq!(Transfer::Uploaded("/srv/app-1.0.tar.gz".to_string()), transfer);
    assert_eq!(vec!["/srv/app-1.0.tar.gz"], network.copies());
    Ok(())
}

#[test]
fn second_put_is_skipped() -> anyhow::Result<()> {
    let network = FakeNetwork::new();
    let mut transport = transport(&network);
    let local = Path::new("/tmp/dist/app-1.0.tar.gz");

    put(transport.as_mut(), HOST, local, "/srv/app-1.0.tar.gz")?;
    let transfer = put(transport.as_mut(), HOST, local, "/srv/app-1.0.tar.gz")?;

    assert_eq!(Transfer::Skipped("/srv/app-1.0.tar.gz".to_string()), transfer);
    assert_eq!(1, network.copies().len());
    Ok(())
}

#[test]
fn existing_file_is_left_alone() -> anyhow::Result<()> {
    let network = FakeNetwork::new();
    network.add_file(HOST, "/srv/app-1.0.tar.gz", FileKind::File);
    let mut transport = transport(&network);

    let (transfer, logs) = capture_logs(|| {
        put(
            transport.as_mut(),
            HOST,
            Path::new("/tmp/app-1.0.tar.gz"),
            "/srv/app-1.0.tar.gz",
        )
    });

    assert!(matches!(transfer?, Transfer::Skipped(_)));
    assert!(network.copies().is_empty());
    assert!(
        logs.contains("[INFO] app-1.0.tar.gz already uploaded, skipping."),
        "got {logs}"
    );
    assert!(!logs.contains("PUT "), "got {logs}");
    Ok(())
}

#[test]
fn resolves_home() -> anyhow::Result<()> {
    let network = FakeNetwork::new();
    let mut transport = transport(&network);

    let transfer = put(
        transport.as_mut(),
        HOST,
        Path::new("/tmp/app.tar.gz"),
        "~/releases/app.tar.gz",
    )?;

    assert_eq!(
        Transfer::Uploaded("/home/deploy/releases/app.tar.gz".to_string()),
        transfer
    );
    Ok(())
}

#[test]
fn other_users_homes_are_not_expanded() -> anyhow::Result<()> {
    let network = FakeNetwork::new();
    let mut transport = transport(&network);

    let transfer = put(
        transport.as_mut(),
        HOST,
        Path::new("/tmp/app.tar.gz"),
        "~alice/app.tar.gz",
    )?;

    assert_eq!(Transfer::Uploaded("~alice/app.tar.gz".to_string()), transfer);
    assert_eq!(vec!["~alice/app.tar.gz"], network.copies());
    Ok(())
}

#[test]
fn directory_target_keeps_file_name() -> anyhow::Result<()> {
    let network = FakeNetwork::new();
    network.add_file(HOST, "/home/deploy", FileKind::Directory);
    let mut transport = transport(&network);

    let transfer = put(
        transport.as_mut(),
        HOST,
        Path::new("/tmp/dist/app-1.0.tar.gz"),
        "~",
    )?;

    assert_eq!(
        Transfer::Uploaded("/home/deploy/app-1.0.tar.gz".to_string()),
        transfer
    );
    Ok(())
}

#[test]
fn local_path_without_file_name() {
    let network = FakeNetwork::new();
    let mut transport = transport(&network);

    let error = put(transport.as_mut(), HOST, Path::new("/"), "/srv").unwrap_err();

    match error {
        Error::Transfer { remote, .. } => assert_eq!("example.com:/srv", remote),
        other => panic!("expected a transfer error, got {other:?}"),
    }
}
