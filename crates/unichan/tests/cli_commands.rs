#![cfg(feature = "cli")]

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn unichan() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_unichan"));
    cmd.arg("--log-level").arg("error");
    cmd
}

/// Start `serve` on an ephemeral port and return the bound address.
fn spawn_server(transport: &str, exit_after: usize) -> (Child, String) {
    let mut child = unichan()
        .arg("--format")
        .arg("json")
        .arg("serve")
        .arg("127.0.0.1:0")
        .arg("--transport")
        .arg(transport)
        .arg("--exit-after")
        .arg(exit_after.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve should start");

    let stdout = child.stdout.take().expect("stdout should be piped");
    let mut lines = BufReader::new(stdout).lines();
    let first = lines
        .next()
        .expect("serve should print a line")
        .expect("line should be readable");
    let event: serde_json::Value =
        serde_json::from_str(&first).expect("listening line should be JSON");
    assert_eq!(event["event"], "listening");
    assert_eq!(event["transport"], transport);
    let addr = event["addr"]
        .as_str()
        .expect("addr should be a string")
        .to_string();

    // Keep draining so release reports never block on a full pipe.
    thread::spawn(move || for _ in lines {});
    (child, addr)
}

fn wait_for_exit(child: &mut Child, timeout: Duration) -> std::process::ExitStatus {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().expect("child status should be readable") {
            return status;
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            panic!("server did not exit within {timeout:?}");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

#[test]
fn tcp_send_receives_echo_and_server_exits() {
    let (mut server, addr) = spawn_server("tcp", 1);

    let output = unichan()
        .arg("--format")
        .arg("json")
        .arg("send")
        .arg(&addr)
        .arg("--data")
        .arg("hello")
        .arg("--wait")
        .output()
        .expect("send should run");

    assert!(
        output.status.success(),
        "send failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"event\":\"message\""));
    assert!(stdout.contains("hello"));

    let status = wait_for_exit(&mut server, Duration::from_secs(5));
    assert!(status.success());
}

#[test]
fn kcp_send_registers_and_receives_echo() {
    let (mut server, addr) = spawn_server("kcp", 1);

    let output = unichan()
        .arg("--format")
        .arg("json")
        .arg("send")
        .arg(&addr)
        .arg("--transport")
        .arg("kcp")
        .arg("--data")
        .arg("ping-me")
        .arg("--count")
        .arg("2")
        .arg("--wait")
        .output()
        .expect("send should run");

    assert!(
        output.status.success(),
        "send failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.matches("ping-me").count(), 2);

    let _ = server.kill();
    let _ = server.wait();
}

#[test]
fn empty_payload_is_usage_error() {
    let output = unichan()
        .arg("send")
        .arg("127.0.0.1:9")
        .arg("--data")
        .arg("")
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn invalid_duration_is_usage_error() {
    let output = unichan()
        .arg("send")
        .arg("127.0.0.1:9")
        .arg("--data")
        .arg("x")
        .arg("--wait-timeout")
        .arg("soon")
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_prints_package_version() {
    let output = unichan()
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("unichan {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn extended_version_lists_transports() {
    let output = unichan()
        .arg("version")
        .arg("--extended")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("transports: tcp, udp, ws, kcp"));
}
