//! Hand-off of a grown day file to the external push script.
//!
//! The script runs detached: the daemon never waits for it and never sees
//! its exit status, so a slow or failing push cannot hold up journal writes.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{error, info};

use crate::config::PushPolicy;

/// Decides whether an append should trigger a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushRule {
    pub threshold: u64,
    pub policy: PushPolicy,
}

impl PushRule {
    /// `already_pushed` is whether this file was handed off earlier in the
    /// current run; the header counts towards `size_after`.
    pub fn fires(&self, already_pushed: bool, size_after: u64) -> bool {
        if size_after < self.threshold {
            return false;
        }
        match self.policy {
            PushPolicy::EveryAppend => true,
            PushPolicy::OnCrossing => !already_pushed,
        }
    }
}

/// Receives day files that crossed the push threshold.
pub trait Publisher: Send + Sync {
    fn trigger(&self, file: &Path);
}

/// Runs `/bin/bash <script> <repo_root> <file>` as a detached child.
#[derive(Debug, Clone)]
pub struct PushHook {
    repo_root: PathBuf,
    script: PathBuf,
}

impl PushHook {
    pub fn new(repo_root: impl Into<PathBuf>, script: impl AsRef<Path>) -> Self {
        let repo_root = repo_root.into();
        let script = repo_root.join(script);
        Self { repo_root, script }
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Start the script for `file`. `Ok(None)` when the script is missing.
    ///
    /// Must be called from within the tokio runtime, which reaps the child
    /// once it exits.
    pub fn spawn(&self, file: &Path) -> io::Result<Option<u32>> {
        if !self.script.is_file() {
            return Ok(None);
        }
        let child = Command::new("/bin/bash")
            .arg(&self.script)
            .arg(&self.repo_root)
            .arg(file)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()?;
        Ok(child.id())
    }
}

impl Publisher for PushHook {
    fn trigger(&self, file: &Path) {
        match self.spawn(file) {
            Ok(Some(pid)) => info!(pid, file = %file.display(), "push script started"),
            Ok(None) => error!(script = %self.script.display(), "push script not found"),
            Err(err) => error!(
                script = %self.script.display(),
                "failed to start push script: {}",
                err
            ),
        }
    }
}
