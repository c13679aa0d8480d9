//! Exit-code contract of the binary's flag handling.

use std::process::Command;

fn remex() -> Command {
    Command::new(env!("CARGO_BIN_EXE_remex"))
}

#[test]
fn test_invalid_flags_exit_with_agent_sentinel_code() {
    // Required flags missing entirely.
    let status = remex().status().unwrap();
    assert_eq!(status.code(), Some(254));

    let status = remex().arg("--no-such-flag").status().unwrap();
    assert_eq!(status.code(), Some(254));

    // A malformed duration value fails flag validation the same way.
    let status = remex()
        .args([
            "--output-log-group",
            "jobs",
            "--signal-bucket",
            "ops",
            "--signal-key",
            "s.json",
            "--upload-interval",
            "soon",
        ])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(254));
}

#[test]
fn test_help_exits_zero() {
    let status = remex().arg("--help").status().unwrap();
    assert_eq!(status.code(), Some(0));
}
