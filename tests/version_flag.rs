use std::process::{Command, Output};

fn mesh_tui(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_mesh-tui"))
        .args(args)
        .output()
        .expect("run mesh-tui")
}

#[test]
fn prints_version() {
    let output = mesh_tui(&["-V"]);
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("stdout utf8");
    assert_eq!(stdout.trim(), format!("mesh-tui {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn help_lists_transport_choices() {
    let output = mesh_tui(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("stdout utf8");
    assert!(stdout.starts_with("mesh-tui - Chat over a packet-radio mesh"));
    assert!(stdout.contains("--host <addr>"));
    assert!(stdout.contains("localhost:4403"));
    assert!(stdout.contains("simulated mesh"));
    assert!(stdout.contains("--settings"));
}

#[test]
fn rejects_host_without_value() {
    let output = mesh_tui(&["--host"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8(output.stderr).expect("stderr utf8");
    assert!(stderr.contains("192.168.1.20:4403"), "stderr was: {stderr}");
}

#[test]
fn rejects_unknown_flag_before_connecting() {
    let output = mesh_tui(&["--demo", "--channel", "2"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8(output.stderr).expect("stderr utf8");
    assert!(stderr.contains("--channel"), "stderr was: {stderr}");
    assert!(stderr.contains("--help"));
}

#[test]
fn demo_and_host_are_exclusive() {
    let output = mesh_tui(&["--demo", "--host", "10.0.0.5:4403"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8(output.stderr).expect("stderr utf8");
    assert!(stderr.contains("cannot be combined"));
}
