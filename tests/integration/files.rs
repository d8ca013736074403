//! File transfer and request validation through the adapter

use std::collections::HashMap;
use std::path::Path;

use nsrun::connection::{Connection, ConnectionConfig, ExecRequest};
use nsrun::escalate::BecomeConfig;
use nsrun::Error;
use tempfile::TempDir;

use crate::helpers::FixedInspector;

fn connection(root: &Path, config: ConnectionConfig) -> Connection {
    let inspector = FixedInspector {
        root: root.to_path_buf(),
        leader: std::process::id(),
        environment: HashMap::new(),
    };
    Connection::with_inspector("testbox", config, Box::new(inspector))
        .expect("failed to build connection")
}

#[test]
fn put_file_copies_into_container_root() {
    let root = TempDir::new().unwrap();
    let local = TempDir::new().unwrap();
    let src = local.path().join("payload.txt");
    std::fs::write(&src, "payload\n").unwrap();

    let conn = connection(root.path(), ConnectionConfig::default());
    conn.put_file(&src, "/payload.txt").unwrap();

    let copied = std::fs::read_to_string(root.path().join("payload.txt")).unwrap();
    assert_eq!(copied, "payload\n");
}

#[test]
fn put_file_missing_source_is_file_not_found() {
    let root = TempDir::new().unwrap();
    let conn = connection(root.path(), ConnectionConfig::default());

    let err = conn
        .put_file(Path::new("/definitely/not/here"), "/x")
        .unwrap_err();
    assert!(matches!(err, Error::FileNotFound(_)));
    assert!(!root.path().join("x").exists(), "no copy may be attempted");
}

#[test]
fn fetch_file_requires_existing_local_destination() {
    let root = TempDir::new().unwrap();
    std::fs::write(root.path().join("hostname"), "buildbox\n").unwrap();

    let conn = connection(root.path(), ConnectionConfig::default());
    let err = conn
        .fetch_file("/hostname", Path::new("/definitely/not/here"))
        .unwrap_err();
    assert!(matches!(err, Error::FileNotFound(_)));
}

#[test]
fn fetch_file_overwrites_local_destination() {
    let root = TempDir::new().unwrap();
    std::fs::write(root.path().join("hostname"), "buildbox\n").unwrap();
    let local = TempDir::new().unwrap();
    let dest = local.path().join("hostname");
    std::fs::write(&dest, "old contents\n").unwrap();

    let conn = connection(root.path(), ConnectionConfig::default());
    conn.fetch_file("/hostname", &dest).unwrap();
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "buildbox\n");
}

#[test]
fn copy_failure_wraps_underlying_error() {
    let root = TempDir::new().unwrap();
    let local = TempDir::new().unwrap();
    let src = local.path().join("payload.txt");
    std::fs::write(&src, "payload\n").unwrap();

    let conn = connection(root.path(), ConnectionConfig::default());
    // Destination parent directory does not exist inside the root.
    let err = conn.put_file(&src, "/no/such/dir/payload.txt").unwrap_err();
    assert!(matches!(err, Error::Copy { .. }));
}

#[test]
fn nonempty_in_data_is_rejected_before_spawning() {
    let root = TempDir::new().unwrap();
    let conn = connection(root.path(), ConnectionConfig::default());

    let mut request = ExecRequest::new("echo never-runs");
    request.in_data = Some(b"piped module".to_vec());
    let err = conn.execute_command(&request).unwrap_err();
    assert!(matches!(err, Error::UnsupportedFeature(_)));
}

#[test]
fn empty_in_data_passes_validation() {
    let root = TempDir::new().unwrap();
    let conn = connection(root.path(), ConnectionConfig::default());

    // Empty input is treated as absent; validation must not trip. The
    // execution itself would need nsenter, so only the validation step
    // is exercised here.
    let mut request = ExecRequest::new("echo ok");
    request.in_data = Some(Vec::new());
    request.sudoable = true;
    let _ = conn.execute_command(&request);
}

#[test]
fn unsupported_become_method_is_rejected() {
    let root = TempDir::new().unwrap();
    let config = ConnectionConfig {
        become_config: Some(BecomeConfig {
            method: "su".to_string(),
            ..BecomeConfig::default()
        }),
        ..ConnectionConfig::default()
    };
    let conn = connection(root.path(), config);

    let mut request = ExecRequest::new("whoami");
    request.sudoable = true;
    let err = conn.execute_command(&request).unwrap_err();
    match err {
        Error::UnsupportedEscalationMethod(method) => assert_eq!(method, "su"),
        other => panic!("expected UnsupportedEscalationMethod, got {other:?}"),
    }
}

#[test]
fn non_sudoable_request_ignores_become_method() {
    let root = TempDir::new().unwrap();
    let config = ConnectionConfig {
        become_config: Some(BecomeConfig {
            method: "su".to_string(),
            ..BecomeConfig::default()
        }),
        ..ConnectionConfig::default()
    };
    let conn = connection(root.path(), config);

    // Not sudoable: the unsupported method must not matter. Validation
    // passes; the actual spawn may fail without nsenter and that is fine.
    let request = ExecRequest::new("echo ok");
    match conn.execute_command(&request) {
        Err(Error::UnsupportedEscalationMethod(_)) => {
            panic!("method check must be skipped for non-sudoable requests")
        }
        _ => {}
    }
}
