//! Dedup guard, per-trigger retention and archive rotation.

use std::path::{Path, PathBuf};

use crate::{IMMORTAL_MARKER_PREFIX, Trigger};

/// Dedup window for most triggers.
pub const DEDUP_WINDOW_SECS: u64 = 5;
/// Stop fires after every response; it gets a wider window.
pub const DEDUP_WINDOW_STOP_SECS: u64 = 30;

/// A "rich" snapshot holds at least this many bytes...
pub const RICH_MIN_BYTES: u64 = 3_072;
/// ...and at least this many IMMORTAL markers.
pub const RICH_MIN_MARKERS: usize = 2;

/// How many timestamped snapshots to keep per trigger.
pub fn retention_for(trigger: &str) -> usize {
    match trigger {
        "precompact" => 3,
        "sessionend" => 3,
        "threshold" => 2,
        "stop" => 5,
        _ => 3,
    }
}

/// Session archives under `sessions/` kept after rotation.
pub const SESSION_ARCHIVE_KEEP: usize = 20;

/// True when the save should be skipped because `latest.md` was written
/// within the dedup window. Session-end saves are user-initiated and are
/// never deduped.
pub fn should_skip_save(snapshot_dir: &Path, trigger: Trigger) -> bool {
    if trigger == Trigger::SessionEnd {
        return false;
    }
    let window = match trigger {
        Trigger::Stop => DEDUP_WINDOW_STOP_SECS,
        _ => DEDUP_WINDOW_SECS,
    };
    match warden_fs::age_seconds(&snapshot_dir.join("latest.md")) {
        Some(age) => age < window,
        None => false,
    }
}

/// Empty-snapshot guard signal: true when existing content is worth keeping
/// over a tool-less new save.
pub fn is_rich_snapshot(content: &str) -> bool {
    content.len() as u64 >= RICH_MIN_BYTES
        && content.matches(IMMORTAL_MARKER_PREFIX).count() >= RICH_MIN_MARKERS
}

fn mtime_of(path: &Path) -> std::time::SystemTime {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(std::time::UNIX_EPOCH)
}

/// Remove the oldest timestamped snapshots beyond each trigger's retention.
pub fn cleanup_snapshots(snapshot_dir: &Path) {
    let Ok(read_dir) = std::fs::read_dir(snapshot_dir) else {
        return;
    };

    let mut by_trigger: std::collections::BTreeMap<String, Vec<PathBuf>> = Default::default();
    for entry in read_dir.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == "latest.md" || !name.ends_with(".md") {
            continue;
        }
        // Filename shape: YYYYMMDD_HHMMSS_<trigger>.md
        let Some(trigger) = name
            .trim_end_matches(".md")
            .rsplit('_')
            .next()
            .map(str::to_string)
        else {
            continue;
        };
        by_trigger.entry(trigger).or_default().push(entry.path());
    }

    for (trigger, mut paths) in by_trigger {
        let keep = retention_for(&trigger);
        if paths.len() <= keep {
            continue;
        }
        paths.sort_by_key(|p| mtime_of(p));
        let excess = paths.len() - keep;
        for path in paths.into_iter().take(excess) {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Keep the newest [`SESSION_ARCHIVE_KEEP`] files under `sessions/`.
pub fn cleanup_session_archives(snapshot_dir: &Path) {
    let sessions_dir = snapshot_dir.join("sessions");
    let Ok(read_dir) = std::fs::read_dir(&sessions_dir) else {
        return;
    };
    let mut paths: Vec<PathBuf> = read_dir
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "md"))
        .collect();
    if paths.len() <= SESSION_ARCHIVE_KEEP {
        return;
    }
    paths.sort_by_key(|p| mtime_of(p));
    let excess = paths.len() - SESSION_ARCHIVE_KEEP;
    for path in paths.into_iter().take(excess) {
        let _ = std::fs::remove_file(path);
    }
}

/// Find the best snapshot to restore from: `latest.md` when it holds at
/// least 3 KB, otherwise the largest `sessions/*.md` modified in the last
/// hour.
pub fn find_best_snapshot(snapshot_dir: &Path) -> Option<(PathBuf, u64)> {
    let latest = snapshot_dir.join("latest.md");
    let latest_size = warden_fs::size_of(&latest);
    if latest_size >= RICH_MIN_BYTES {
        return Some((latest, latest_size));
    }

    let mut best = latest.exists().then_some((latest, latest_size));
    let sessions_dir = snapshot_dir.join("sessions");
    if let Ok(read_dir) = std::fs::read_dir(&sessions_dir) {
        for entry in read_dir.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|e| e != "md") {
                continue;
            }
            let age = warden_fs::age_seconds(&path).unwrap_or(u64::MAX);
            let size = warden_fs::size_of(&path);
            if age < 3600 && best.as_ref().is_none_or(|(_, b)| size > *b) {
                best = Some((path, size));
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sessionend_bypasses_dedup() {
        let td = tempdir().expect("tempdir");
        std::fs::write(td.path().join("latest.md"), "fresh").expect("write");
        assert!(should_skip_save(td.path(), Trigger::Stop));
        assert!(should_skip_save(td.path(), Trigger::PreCompact));
        assert!(!should_skip_save(td.path(), Trigger::SessionEnd));
    }

    #[test]
    fn missing_latest_never_skips() {
        let td = tempdir().expect("tempdir");
        assert!(!should_skip_save(td.path(), Trigger::Stop));
    }

    #[test]
    fn rich_snapshot_needs_size_and_markers() {
        let small = "<!-- IMMORTAL: a -->\n<!-- IMMORTAL: b -->";
        assert!(!is_rich_snapshot(small));

        let big_no_markers = "x".repeat(5000);
        assert!(!is_rich_snapshot(&big_no_markers));

        let rich = format!(
            "<!-- IMMORTAL: a -->\n<!-- IMMORTAL: b -->\n{}",
            "x".repeat(5000)
        );
        assert!(is_rich_snapshot(&rich));
    }

    #[test]
    fn per_trigger_retention_removes_oldest() {
        let td = tempdir().expect("tempdir");
        for i in 0..8 {
            let path = td.path().join(format!("20260801_00000{i}_stop.md"));
            std::fs::write(&path, "snap").expect("write");
            // Spread mtimes so the sort is deterministic.
            let time = std::time::SystemTime::now() - std::time::Duration::from_secs(100 - i);
            let file = std::fs::File::open(&path).expect("open");
            file.set_modified(time).expect("set mtime");
        }
        std::fs::write(td.path().join("latest.md"), "latest").expect("write");

        cleanup_snapshots(td.path());

        let remaining: Vec<String> = std::fs::read_dir(td.path())
            .expect("read_dir")
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.contains("_stop"))
            .collect();
        assert_eq!(remaining.len(), retention_for("stop"));
    }

    #[test]
    fn session_archive_rotation_keeps_newest_twenty() {
        let td = tempdir().expect("tempdir");
        let sessions = td.path().join("sessions");
        std::fs::create_dir_all(&sessions).expect("mkdir");
        for i in 0..25 {
            let path = sessions.join(format!("2026-08-01T0000{i:02}_abcd1234.md"));
            std::fs::write(&path, "archive").expect("write");
            let time = std::time::SystemTime::now() - std::time::Duration::from_secs(100 - i);
            std::fs::File::open(&path).expect("open").set_modified(time).expect("mtime");
        }

        cleanup_session_archives(td.path());
        let count = std::fs::read_dir(&sessions).expect("read_dir").count();
        assert_eq!(count, SESSION_ARCHIVE_KEEP);
    }

    #[test]
    fn best_snapshot_prefers_rich_latest() {
        let td = tempdir().expect("tempdir");
        std::fs::write(td.path().join("latest.md"), "x".repeat(5000)).expect("write");
        let (path, size) = find_best_snapshot(td.path()).expect("best");
        assert!(path.ends_with("latest.md"));
        assert_eq!(size, 5000);
    }

    #[test]
    fn best_snapshot_falls_back_to_recent_archive() {
        let td = tempdir().expect("tempdir");
        std::fs::write(td.path().join("latest.md"), "tiny").expect("write");
        let sessions = td.path().join("sessions");
        std::fs::create_dir_all(&sessions).expect("mkdir");
        std::fs::write(sessions.join("2026-08-01T120000_abcd1234.md"), "y".repeat(4000))
            .expect("write");

        let (path, size) = find_best_snapshot(td.path()).expect("best");
        assert!(path.to_string_lossy().contains("sessions"));
        assert_eq!(size, 4000);
    }
}
