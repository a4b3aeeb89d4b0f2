// Multi-process smoke test: concurrent flushes into one partition are serialized
// and queries running alongside them never see a half-written partition.
use std::process::{Command, Stdio};

use bitsel::api::{Config, Session};

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_bitsel");
    Command::new(exe)
}

#[test]
fn concurrent_builtin_runs_append_whole_fixtures() {
    let temp = tempfile::tempdir().expect("tempdir");

    let workers = 8;
    let mut children = Vec::new();
    for _ in 0..workers {
        let child = cmd()
            .current_dir(temp.path())
            .env("HOME", temp.path())
            .env_remove("BITSELRC")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn");
        children.push(child);
    }

    for child in children {
        let output = child.wait_with_output().expect("wait");
        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(
            !stdout.contains("failed to process query"),
            "query failed during concurrent flushes:\n{stdout}"
        );
        assert!(
            !stdout.contains("remove the directory"),
            "partial fixture observed:\n{stdout}"
        );
        assert!(stdout.contains("Build-in tests finished"), "{stdout}");
    }

    let dir = temp.path().join("tmp");
    let session = Session::with_config(Config::empty()).expect("session");
    assert_eq!(session.rows_in_partition(&dir).expect("rows"), 100 * workers);
    assert_eq!(session.columns_in_partition(&dir).expect("columns"), 3);
    let query = session
        .build_query(None, &dir, Some("a < 5"))
        .expect("query");
    assert_eq!(query.result_rows(), 5 * workers);
}
