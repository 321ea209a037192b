#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::process::{Child, Command as StdCommand, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use assert_cmd::Command;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use predicates::prelude::*;

fn djs() -> Command {
    let mut cmd = Command::cargo_bin("djs").unwrap();
    cmd.env_remove("DJS_CHANNEL").env_remove("RUST_LOG");
    cmd
}

fn spawn_daemon(repo: &Path, channel: &Path) -> Child {
    StdCommand::new(env!("CARGO_BIN_EXE_djs"))
        .arg("start")
        .arg("--repo")
        .arg(repo)
        .arg("--channel")
        .arg(channel)
        .env_remove("DJS_CHANNEL")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap()
}

fn wait_for(deadline: Duration, mut ready: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if ready() {
            return true;
        }
        sleep(Duration::from_millis(20));
    }
    false
}

#[test]
fn start_with_missing_repo_exits_1() {
    djs()
        .args(["start", "--repo", "/definitely/not/a/journal/repo"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("repo path not found"));
}

#[test]
fn start_rejects_unknown_push_policy() {
    let repo = tempfile::tempdir().unwrap();
    djs()
        .arg("start")
        .arg("--repo")
        .arg(repo.path())
        .args(["--push-policy", "sometimes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown push policy"));
}

#[test]
fn add_without_daemon_exits_2() {
    let dir = tempfile::tempdir().unwrap();
    djs()
        .args(["add", "nobody home", "--channel"])
        .arg(dir.path().join("queue"))
        .assert()
        .code(2)
        .stdout(predicate::str::contains("Added.").not());
}

#[test]
fn add_to_regular_file_exits_1() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue");
    fs::write(&path, "").unwrap();
    djs()
        .args(["add", "wrong pipe", "--channel"])
        .arg(&path)
        .assert()
        .code(1);
}

#[test]
fn start_add_and_interrupt() {
    let repo = tempfile::tempdir().unwrap();
    let channel = repo.path().join("queue");
    let mut daemon = spawn_daemon(repo.path(), &channel);

    let added = wait_for(Duration::from_secs(10), || {
        djs()
            .args(["add", "wrote first note", "--channel"])
            .arg(&channel)
            .output()
            .map(|out| out.status.success() && String::from_utf8_lossy(&out.stdout).contains("Added."))
            .unwrap_or(false)
    });
    assert!(added, "daemon never accepted a note");

    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    let day_file = repo.path().join("entries").join(format!("{}.md", today));
    let landed = wait_for(Duration::from_secs(5), || {
        fs::read_to_string(&day_file)
            .map(|contents| contents.contains(" wrote first note\n"))
            .unwrap_or(false)
    });
    assert!(landed, "note never reached {}", day_file.display());
    assert!(fs::read_to_string(&day_file)
        .unwrap()
        .starts_with(&format!("# {}\n", today)));
    assert!(repo.path().join("logs").join("app.log").exists());

    kill(Pid::from_raw(daemon.id() as i32), Signal::SIGINT).unwrap();
    let exited = wait_for(Duration::from_secs(5), || {
        matches!(daemon.try_wait(), Ok(Some(_)))
    });
    if !exited {
        let _ = daemon.kill();
    }
    assert!(exited, "daemon ignored SIGINT");
}
