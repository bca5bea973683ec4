mod common;

use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use common::TestEnv;

#[test]
fn daemon_start_fails_when_background_daemon_fails_to_boot() {
    let output = Command::new(env!("CARGO_BIN_EXE_neurocare"))
        .args(["daemon", "start"])
        .env("XDG_RUNTIME_DIR", "/dev/null")
        .output()
        .expect("failed to execute neurocare");

    assert!(
        !output.status.success(),
        "daemon start unexpectedly succeeded\nstdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Kills the foreground daemon if the test bails out early
struct DaemonGuard(Child);

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn wait_until_running(env: &TestEnv) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        let output = env.run(&["daemon", "status"]);
        if String::from_utf8_lossy(&output.stdout).contains("Daemon is running") {
            return;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    panic!("daemon did not come up");
}

#[test]
fn daemon_hosts_a_booking_driven_by_subcommands() {
    let env = TestEnv::new();
    env.login("p-7", "patient");

    let child = env
        .command(&["daemon", "start", "--foreground"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn foreground daemon");
    let _guard = DaemonGuard(child);
    wait_until_running(&env);

    assert!(env.run(&["booking", "open"]).status.success());
    for (field, value) in [
        ("date", "2025-03-01"),
        ("time", "10:00"),
        ("doctor", "dr-chen"),
        ("reason", "Memory check"),
    ] {
        let output = env.run(&["booking", "set", field, value]);
        assert!(
            output.status.success(),
            "booking set {} failed\nstderr:\n{}",
            field,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let unknown = env.run(&["booking", "set", "doctor", "dr-nobody"]);
    assert!(!unknown.status.success());

    assert!(env.run(&["booking", "next"]).status.success());

    let show = env.run(&["booking", "show", "--json"]);
    assert!(show.status.success());
    let snapshot: serde_json::Value =
        serde_json::from_slice(&show.stdout).expect("booking show --json prints JSON");
    assert_eq!(snapshot["step"], "voice");
    assert_eq!(snapshot["user_id"], "p-7");
    assert_eq!(snapshot["request"]["doctor_id"], "dr-chen");

    // Nothing recorded yet
    let analyze = env.run(&["booking", "analyze"]);
    assert!(!analyze.status.success());

    assert!(env.run(&["booking", "cancel"]).status.success());

    let stop = env.run(&["daemon", "stop"]);
    assert!(stop.status.success());
    assert!(String::from_utf8_lossy(&stop.stdout).contains("Daemon stopped"));
}
