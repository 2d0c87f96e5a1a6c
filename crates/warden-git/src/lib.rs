//! Read-only git state capture for snapshots.
//!
//! Every git call is bounded: a hard 5-second wall clock per subcommand and
//! a fixed cap on captured output. A repo-less directory, a missing git
//! binary, or a hung command all degrade to empty fields; snapshot
//! generation never fails because of git.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Wall-clock bound per git subcommand.
pub const GIT_TIMEOUT: Duration = Duration::from_secs(5);
/// Captured output is cut to this many bytes per call.
pub const GIT_OUTPUT_CAP: usize = 20_000;

/// Snapshot of repository state at capture time. All fields may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitState {
    pub status: String,
    pub diff_stat: String,
    pub diff: String,
    pub recent_commits: String,
    /// False when the directory is not a repository (all fields empty).
    pub captured: bool,
}

impl GitState {
    /// One-line digest for the knowledge index.
    pub fn summary(&self) -> String {
        if !self.captured {
            return String::new();
        }
        let changed = self.status.lines().count();
        let stat_tail = self.diff_stat.lines().last().unwrap_or("").trim();
        format!("{changed} changed paths; {stat_tail}")
    }
}

/// Per-file added/removed line counts from `git diff --numstat HEAD`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumstatEntry {
    pub path: String,
    pub added: u32,
    pub removed: u32,
}

/// Run a git subcommand with the timeout and output cap applied.
///
/// Returns `None` on spawn failure, non-zero exit, or timeout (the child is
/// killed). Stdout is drained on a helper thread so a diff larger than the
/// pipe buffer cannot deadlock the wait loop.
pub fn run_git_bounded(project_dir: &Path, args: &[&str]) -> Option<String> {
    let mut child = Command::new("git")
        .args(args)
        .current_dir(project_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .ok()?;

    let mut stdout = child.stdout.take()?;
    let reader = std::thread::spawn(move || {
        use std::io::Read;
        let mut buffer = Vec::new();
        let _ = stdout.read_to_end(&mut buffer);
        buffer
    });

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if started.elapsed() > GIT_TIMEOUT {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = reader.join();
                    return None;
                }
                std::thread::sleep(Duration::from_millis(25));
            }
            Err(_) => {
                let _ = child.kill();
                let _ = reader.join();
                return None;
            }
        }
    };

    let mut buffer = reader.join().ok()?;
    if !status.success() {
        return None;
    }
    buffer.truncate(GIT_OUTPUT_CAP);
    Some(String::from_utf8_lossy(&buffer).into_owned())
}

fn is_git_repo(project_dir: &Path) -> bool {
    run_git_bounded(project_dir, &["rev-parse", "--is-inside-work-tree"])
        .map(|out| out.trim() == "true")
        .unwrap_or(false)
}

/// Capture the full read-only git state for a project directory.
pub fn capture_git_state(project_dir: &Path) -> GitState {
    if !is_git_repo(project_dir) {
        return GitState::default();
    }

    GitState {
        status: run_git_bounded(project_dir, &["status", "--porcelain"]).unwrap_or_default(),
        diff_stat: run_git_bounded(project_dir, &["diff", "--stat", "HEAD"]).unwrap_or_default(),
        diff: run_git_bounded(project_dir, &["diff", "HEAD"]).unwrap_or_default(),
        recent_commits: run_git_bounded(project_dir, &["log", "--oneline", "--stat", "-5"])
            .unwrap_or_default(),
        captured: true,
    }
}

/// Per-file line counts for the resume-protocol section.
pub fn numstat(project_dir: &Path) -> Vec<NumstatEntry> {
    let Some(output) = run_git_bounded(project_dir, &["diff", "--numstat", "HEAD"]) else {
        return Vec::new();
    };
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split('\t');
            let added = parts.next()?.parse().ok()?;
            let removed = parts.next()?.parse().ok()?;
            let path = parts.next()?.to_string();
            Some(NumstatEntry {
                path,
                added,
                removed,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn git(dir: &Path, args: &[&str]) {
        Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .expect("git");
    }

    fn init_repo(dir: &Path) {
        git(dir, &["init"]);
        git(dir, &["config", "user.email", "test@example.com"]);
        git(dir, &["config", "user.name", "Test User"]);
    }

    #[test]
    fn non_repo_captures_nothing() {
        let td = tempdir().expect("tempdir");
        let state = capture_git_state(td.path());
        assert!(!state.captured);
        assert!(state.status.is_empty());
        assert!(state.summary().is_empty());
    }

    #[test]
    fn dirty_repo_shows_in_status_and_numstat() {
        let td = tempdir().expect("tempdir");
        init_repo(td.path());
        std::fs::write(td.path().join("a.txt"), "one\n").expect("write");
        git(td.path(), &["add", "."]);
        git(td.path(), &["commit", "-m", "initial"]);
        std::fs::write(td.path().join("a.txt"), "one\ntwo\n").expect("write");

        let state = capture_git_state(td.path());
        assert!(state.captured);
        assert!(state.status.contains("a.txt"));
        assert!(state.diff.contains("+two"));

        let stats = numstat(td.path());
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].path, "a.txt");
        assert_eq!(stats[0].added, 1);
        assert_eq!(stats[0].removed, 0);
    }

    #[test]
    fn failing_subcommand_returns_none() {
        let td = tempdir().expect("tempdir");
        assert!(run_git_bounded(td.path(), &["log", "-1"]).is_none());
    }
}
