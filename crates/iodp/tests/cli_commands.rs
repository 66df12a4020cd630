#![cfg(feature = "cli")]

use std::net::UdpSocket;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

fn iodp() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_iodp"));
    cmd.arg("--log-level").arg("error");
    cmd
}

/// Reserve a free loopback UDP port.
fn free_port() -> u16 {
    UdpSocket::bind("127.0.0.1:0")
        .expect("ephemeral bind should succeed")
        .local_addr()
        .expect("bound socket should have an address")
        .port()
}

struct Server(Child);

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn spawn_server(serve_port: u16, client_port: u16, extra: &[&str]) -> Server {
    let child = iodp()
        .arg("serve")
        .arg("--bind")
        .arg(format!("127.0.0.1:{serve_port}"))
        .arg("--peer")
        .arg(format!("127.0.0.1:{client_port}"))
        .arg("--duration")
        .arg("20s")
        .args(extra)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve should start");
    // Give the server time to bind before the first request.
    thread::sleep(Duration::from_millis(300));
    Server(child)
}

fn client(sub: &str, serve_port: u16, client_port: u16) -> Command {
    let mut cmd = iodp();
    cmd.arg("--format")
        .arg("json")
        .arg(sub)
        .arg("--bind")
        .arg(format!("127.0.0.1:{client_port}"))
        .arg("--peer")
        .arg(format!("127.0.0.1:{serve_port}"));
    cmd
}

#[test]
fn version_prints_package_version() {
    let output = iodp().arg("version").output().expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("iodp {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn extended_version_reports_wire_constants() {
    let output = iodp()
        .args(["--format", "json", "version", "--extended"])
        .output()
        .expect("version should run");
    assert!(output.status.success());
    let info: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("extended version should be JSON");
    assert_eq!(info["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(info["sync"], "eb90");
    assert_eq!(info["max_frame_size"], 1024);
}

#[test]
fn functions_lists_demo_table() {
    let output = iodp()
        .arg("--format")
        .arg("json")
        .arg("functions")
        .output()
        .expect("functions should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"code\":1"));
    assert!(stdout.contains("\"code\":1638"));
    assert!(stdout.contains("\"name\":\"sum\""));
}

#[test]
fn loopback_memory_pair_passes() {
    let output = iodp()
        .args(["--format", "json", "loopback", "--count", "50", "--seed", "42"])
        .output()
        .expect("loopback should run");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"transport\":\"memory\""));
    assert!(stdout.contains("\"calls\":50"));
    assert!(stdout.contains("\"mismatches\":0"));
}

#[test]
fn loopback_cooperative_udp_passes() {
    let output = iodp()
        .args([
            "--format",
            "json",
            "loopback",
            "--count",
            "20",
            "--udp",
            "--cooperative",
        ])
        .output()
        .expect("loopback should run");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("\"transport\":\"udp\""));
}

#[test]
fn write_read_call_against_server() {
    let serve_port = free_port();
    let client_port = free_port();
    let _server = spawn_server(serve_port, client_port, &[]);

    let status = client("write", serve_port, client_port)
        .args(["--addr", "0x20", "--data", "hello"])
        .status()
        .expect("write should run");
    assert!(status.success());

    let output = client("read", serve_port, client_port)
        .args(["--addr", "0x20", "--len", "5", "--timeout", "2s"])
        .output()
        .expect("read should run");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"data\":\"hello\""));

    let output = client("call", serve_port, client_port)
        .args(["--code", "0x666", "--hex", "010203"])
        .output()
        .expect("call should run");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("\"ret_hex\":\"00000006\""));
}

#[test]
fn read_out_of_range_fails_with_remote_error() {
    let serve_port = free_port();
    let client_port = free_port();
    let _server = spawn_server(serve_port, client_port, &["--cooperative"]);

    let output = client("read", serve_port, client_port)
        .args(["--addr", "512", "--len", "4"])
        .output()
        .expect("read should run");
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("error code 0x01"));
}

#[test]
fn call_without_server_times_out() {
    let output = client("call", free_port(), free_port())
        .args(["--code", "1", "--timeout", "300ms"])
        .output()
        .expect("call should run");
    assert_eq!(output.status.code(), Some(124));
}
