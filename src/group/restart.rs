//! # Restart triggers with throttled stats.
//!
//! Two files control group restarts, both stat'd at most once per
//! `stat_throttle_rate`:
//!
//! - `always_restart_file`: while it **exists**, every `get` restarts the
//!   group (useful during development).
//! - `restart_file`: the group restarts once each time its **mtime
//!   advances** (the classic `touch tmp/restart.txt`).
//!
//! Both checks cache between stats so a hot `get` path does at most one
//! filesystem round-trip per throttle window.

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};

/// Throttled existence check.
pub(crate) struct FileExistsCheck {
    path: PathBuf,
    checked_at: Option<Instant>,
    exists: bool,
}

impl FileExistsCheck {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            checked_at: None,
            exists: false,
        }
    }

    /// Returns whether the file exists, re-stating at most once per
    /// `throttle`.
    pub(crate) fn check(&mut self, throttle: Duration) -> bool {
        if let Some(at) = self.checked_at {
            if at.elapsed() < throttle {
                return self.exists;
            }
        }
        self.exists = fs::metadata(&self.path).is_ok();
        self.checked_at = Some(Instant::now());
        self.exists
    }
}

/// Throttled mtime-advance check.
///
/// The first stat primes the recorded state and reports no change; every
/// later stat reports `true` exactly once per observed mtime advance (or
/// per file appearance). Deleting the file records the absence but does
/// not count as a change.
pub(crate) struct FileChangeCheck {
    path: PathBuf,
    checked_at: Option<Instant>,
    mtime: Option<SystemTime>,
    primed: bool,
}

impl FileChangeCheck {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            checked_at: None,
            mtime: None,
            primed: false,
        }
    }

    pub(crate) fn changed(&mut self, throttle: Duration) -> bool {
        if let Some(at) = self.checked_at {
            if at.elapsed() < throttle {
                return false;
            }
        }
        self.checked_at = Some(Instant::now());

        let current = fs::metadata(&self.path)
            .ok()
            .and_then(|m| m.modified().ok());

        if !self.primed {
            self.primed = true;
            self.mtime = current;
            return false;
        }
        if current == self.mtime {
            return false;
        }
        let appeared_or_touched = current.is_some();
        self.mtime = current;
        appeared_or_touched
    }
}

/// The group's restart-trigger state, owned by `GroupState`.
pub(crate) struct RestartState {
    always: FileExistsCheck,
    touch: FileChangeCheck,
}

impl RestartState {
    pub(crate) fn new(restart_file: PathBuf, always_restart_file: PathBuf) -> Self {
        Self {
            always: FileExistsCheck::new(always_restart_file),
            touch: FileChangeCheck::new(restart_file),
        }
    }

    /// True when either trigger fires.
    pub(crate) fn needs_restart(&mut self, throttle: Duration) -> bool {
        // Evaluate both so the mtime check stays primed even while the
        // always-restart file exists.
        let always = self.always.check(throttle);
        let touched = self.touch.changed(throttle);
        always || touched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write as _;

    #[test]
    fn exists_check_tracks_file_lifecycle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("always_restart.txt");
        let mut check = FileExistsCheck::new(path.clone());

        assert!(!check.check(Duration::ZERO));
        File::create(&path).expect("create");
        assert!(check.check(Duration::ZERO));
        // Still reported while the file is there.
        assert!(check.check(Duration::ZERO));
        std::fs::remove_file(&path).expect("remove");
        assert!(!check.check(Duration::ZERO));
    }

    #[test]
    fn exists_check_is_throttled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("always_restart.txt");
        let mut check = FileExistsCheck::new(path.clone());

        assert!(!check.check(Duration::from_secs(3600)));
        File::create(&path).expect("create");
        // Inside the throttle window the cached answer wins.
        assert!(!check.check(Duration::from_secs(3600)));
    }

    #[test]
    fn change_check_fires_once_per_appearance() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("restart.txt");
        let mut check = FileChangeCheck::new(path.clone());

        // Prime on absent file.
        assert!(!check.changed(Duration::ZERO));
        let mut f = File::create(&path).expect("create");
        f.write_all(b"x").expect("write");
        drop(f);
        assert!(check.changed(Duration::ZERO));
        // Reported once; quiet until the mtime moves again.
        assert!(!check.changed(Duration::ZERO));
    }

    #[test]
    fn change_check_ignores_deletion() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("restart.txt");
        File::create(&path).expect("create");

        let mut check = FileChangeCheck::new(path.clone());
        assert!(!check.changed(Duration::ZERO));
        std::fs::remove_file(&path).expect("remove");
        assert!(!check.changed(Duration::ZERO));
        // Reappearing counts as a touch.
        File::create(&path).expect("recreate");
        assert!(check.changed(Duration::ZERO));
    }
}
