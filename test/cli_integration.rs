//! CLI Integration Tests for unit-bridge
//!
//! Runs the `unit-bridge` binary end to end: configuration output, start
//! failures, and the demo router served by the fallback server.

use std::fs;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

/// Path to the unit-bridge binary built for this test run
fn bridge_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_unit-bridge"))
}

/// Command running in an empty directory with no inherited overrides
fn bridge_command(cwd: &Path) -> Command {
    let mut cmd = Command::new(bridge_binary());
    cmd.current_dir(cwd)
        .env_remove("UNIT_BRIDGE_LIBRARY")
        .env("RUST_LOG", "warn");
    cmd
}

/// Kills the server when the test ends
struct ServerProcess(Child);

impl Drop for ServerProcess {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn free_addr() -> String {
    let reserved = TcpListener::bind("127.0.0.1:0").unwrap();
    reserved.local_addr().unwrap().to_string()
}

fn http_request(addr: &str, method: &str, path: &str, body: &str) -> String {
    let mut stream = None;
    for _ in 0..250 {
        match TcpStream::connect(addr) {
            Ok(s) => {
                stream = Some(s);
                break;
            }
            Err(_) => thread::sleep(Duration::from_millis(20)),
        }
    }
    let mut stream = stream.expect("server never came up");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    write!(
        stream,
        "{} {} HTTP/1.1\r\nHost: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        method,
        path,
        addr,
        body.len(),
        body
    )
    .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    response
}

// ============================================================================
// Config Command
// ============================================================================

#[test]
fn test_config_prints_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let output = bridge_command(dir.path())
        .arg("config")
        .output()
        .expect("Failed to run unit-bridge");

    assert!(
        output.status.success(),
        "config failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[native]"));
    assert!(stdout.contains("run_symbol = \"nxt_rust_run\""));
    assert!(stdout.contains("tag = \"[rust] \""));
    assert!(stdout.contains("enabled = true"));
}

#[test]
fn test_config_reads_file_and_env_override() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bridge.toml");
    fs::write(
        &path,
        "[native]\nlibrary = \"libfromfile.so\"\n\n[fallback]\nenabled = false\n",
    )
    .unwrap();

    let output = bridge_command(dir.path())
        .args(["config", "--config", path.to_str().unwrap()])
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("library = \"libfromfile.so\""), "{}", stdout);
    assert!(stdout.contains("enabled = false"));

    let output = bridge_command(dir.path())
        .args(["config", "--config", path.to_str().unwrap()])
        .env("UNIT_BRIDGE_LIBRARY", "libfromenv.so")
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("library = \"libfromenv.so\""), "{}", stdout);
}

#[test]
fn test_config_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = bridge_command(dir.path())
        .args(["config", "--config", "does-not-exist.toml"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Config file not found"), "{}", stderr);
}

// ============================================================================
// Serve Command
// ============================================================================

#[test]
fn test_serve_without_runtime_or_fallback_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = bridge_command(dir.path())
        .args(["serve", "--addr", "127.0.0.1:0", "--no-fallback"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("native runtime failed to start"), "{}", stderr);
}

#[test]
fn test_serve_unloadable_library_fails_without_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let output = bridge_command(dir.path())
        .args([
            "serve",
            "--addr",
            "127.0.0.1:0",
            "--library",
            "/nonexistent/libunit-rust.so",
            "--no-fallback",
        ])
        .output()
        .unwrap();

    assert!(!output.status.success());
}

#[test]
fn test_serve_demo_router_over_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let addr = free_addr();
    let child = bridge_command(dir.path())
        .args(["serve", "--addr", &addr])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to start unit-bridge");
    let _server = ServerProcess(child);

    let response = http_request(&addr, "POST", "/echo", "cli echo");
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
    assert!(response.ends_with("cli echo"), "{}", response);

    let response = http_request(&addr, "GET", "/", "");
    assert!(response.contains("Hello from unit-bridge"), "{}", response);

    let response = http_request(&addr, "GET", "/nope", "");
    assert!(response.starts_with("HTTP/1.1 404"), "{}", response);
}
