//! Chaos testing for vcfs
//!
//! Damages history artifacts behind the engine's back (truncation, random
//! bytes, garbage counters, deleted files) and checks that the primary file
//! operation keeps working and that history degrades to what is still intact.

use ::vcfs::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{info, warn};

/// Chaos test fixture
pub struct VcfsChaosTest {
    pub vcfs: Vcfs,
    pub temp_dir: TempDir,
    pub rng: StdRng,
}

impl VcfsChaosTest {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let vcfs = Vcfs::init(temp_dir.path().to_path_buf()).unwrap();

        Self {
            vcfs,
            temp_dir,
            rng: StdRng::seed_from_u64(42),
        }
    }

    /// Path of one artifact in the metadata directory
    pub fn artifact(&self, key: &str, ext: &str) -> PathBuf {
        self.temp_dir
            .path()
            .join(DEFAULT_META_DIR)
            .join(format!("{}.{}", key, ext))
    }

    /// Record `count` distinct versions of a file
    pub fn build_history(&self, path: &str, count: usize) {
        for i in 0..count {
            self.vcfs
                .record_replace(path, &format!("version {} of the file\n", i))
                .unwrap();
        }
    }

    /// Overwrite random bytes of an artifact
    pub fn corrupt_bytes(&mut self, path: &PathBuf, count: usize) {
        let mut content = fs::read(path).unwrap();
        for _ in 0..count {
            if content.is_empty() {
                break;
            }
            let idx = self.rng.random_range(0..content.len());
            content[idx] = self.rng.random();
        }
        fs::write(path, content).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_truncated_log_keeps_intact_records() {
        let chaos = VcfsChaosTest::new();
        chaos.build_history("/f", 5);

        let log = chaos.artifact("f", "diffs");
        let len = fs::metadata(&log).unwrap().len();
        let file = fs::OpenOptions::new().write(true).open(&log).unwrap();
        file.set_len(len - 3).unwrap();

        // The damaged last record is gone; the rest still undo
        assert_eq!(chaos.vcfs.status("/f").unwrap().backward_records, 4);
        let mut undone = 0;
        while chaos.vcfs.status("/f").unwrap().can_undo() {
            match chaos.vcfs.rollback("/f") {
                Ok(outcome) => assert!(outcome.is_applied()),
                Err(e) => {
                    // Older records expect content the lost record would have restored
                    assert!(e.is_integrity_failure(), "unexpected error: {}", e);
                    break;
                }
            }
            undone += 1;
        }
        info!("Undid {} records after truncation", undone);
    }

    #[test]
    fn test_write_after_truncated_log_is_undoable() {
        let chaos = VcfsChaosTest::new();
        chaos.build_history("/f", 3);

        let log = chaos.artifact("f", "diffs");
        let len = fs::metadata(&log).unwrap().len();
        let file = fs::OpenOptions::new().write(true).open(&log).unwrap();
        file.set_len(len - 3).unwrap();
        assert_eq!(chaos.vcfs.status("/f").unwrap().backward_records, 2);

        let report = chaos.vcfs.record_replace("/f", "brand new text").unwrap();
        assert_eq!(report.update, HistoryUpdate::Recorded);
        assert_eq!(chaos.vcfs.status("/f").unwrap().backward_records, 3);

        // The newest write undoes back to what was on disk before it
        assert!(chaos.vcfs.rollback("/f").unwrap().is_applied());
        assert_eq!(
            chaos.vcfs.read("/f").unwrap().as_deref(),
            Some("version 2 of the file\n")
        );
        assert_eq!(chaos.vcfs.status("/f").unwrap().backward_records, 2);
    }

    #[test]
    fn test_random_log_corruption_never_panics() {
        let mut chaos = VcfsChaosTest::new();

        for round in 0..20 {
            let path = format!("/file{}.txt", round);
            chaos.build_history(&path, 6);
            let log = chaos.artifact(&format!("file{}.txt", round), "diffs");
            chaos.corrupt_bytes(&log, 5);

            // Every outcome is acceptable except a panic or an I/O error
            for _ in 0..7 {
                match chaos.vcfs.rollback(&path) {
                    Ok(_) => {}
                    Err(e) => {
                        assert!(
                            e.is_integrity_failure(),
                            "round {}: unexpected error {}",
                            round,
                            e
                        );
                        warn!("Round {}: {}", round, e);
                        break;
                    }
                }
            }

            // Writes still go through
            chaos.vcfs.record_write(&path, b"after chaos", 0).unwrap();
        }
    }

    #[test]
    fn test_garbage_counter() {
        let chaos = VcfsChaosTest::new();
        chaos.build_history("/f", 3);

        fs::write(chaos.artifact("f", "count"), "\u{0}\u{1}garbage").unwrap();
        assert_eq!(chaos.vcfs.status("/f").unwrap().counter, 0);

        let report = chaos.vcfs.record_replace("/f", "fresh").unwrap();
        assert_eq!(report.update, HistoryUpdate::Recorded);
        assert_eq!(chaos.vcfs.status("/f").unwrap().counter, 1);
    }

    #[test]
    fn test_deleted_counter_and_forward() {
        let chaos = VcfsChaosTest::new();
        chaos.build_history("/f", 3);
        chaos.vcfs.rollback("/f").unwrap();

        fs::remove_file(chaos.artifact("f", "count")).unwrap();
        fs::remove_file(chaos.artifact("f", "forward")).unwrap();

        assert_eq!(
            chaos.vcfs.reverse_rollback("/f").unwrap(),
            RedoOutcome::NoForwardHistory
        );
        assert!(chaos.vcfs.rollback("/f").unwrap().is_applied());
        assert_eq!(chaos.vcfs.status("/f").unwrap().counter, 0);
    }

    #[test]
    fn test_deleted_log_is_not_found() {
        let chaos = VcfsChaosTest::new();
        chaos.build_history("/f", 2);
        fs::remove_file(chaos.artifact("f", "diffs")).unwrap();

        assert!(matches!(
            chaos.vcfs.rollback("/f"),
            Err(VcfsError::NotFound(_))
        ));
    }

    #[test]
    fn test_corrupt_forward_stack() {
        let chaos = VcfsChaosTest::new();
        chaos.build_history("/f", 4);
        for _ in 0..3 {
            chaos.vcfs.rollback("/f").unwrap();
        }

        let forward = chaos.artifact("f", "forward");
        let content = fs::read_to_string(&forward).unwrap();
        // Damage the length field of the first frame
        let damaged = content.replacen("--- FORWARD VERSION f ", "--- FORWARD VERSION f 9", 1);
        fs::write(&forward, damaged).unwrap();

        assert_eq!(chaos.vcfs.status("/f").unwrap().forward_depth, 0);
        assert_eq!(
            chaos.vcfs.reverse_rollback("/f").unwrap(),
            RedoOutcome::NoForwardHistory
        );

        // A new write discards the damaged stack
        chaos.vcfs.record_replace("/f", "new").unwrap();
        assert!(!forward.exists());
    }

    #[test]
    fn test_concurrent_same_file() {
        let chaos = VcfsChaosTest::new();
        let vcfs = Arc::new(chaos.vcfs);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let vcfs = Arc::clone(&vcfs);
                std::thread::spawn(move || {
                    for n in 0..5 {
                        let text = format!("[{}:{}]", i, n);
                        let offset = vcfs.status("/shared").unwrap().content_len;
                        vcfs.record_write("/shared", text.as_bytes(), offset).unwrap();
                        if n % 2 == 1 {
                            let _ = vcfs.rollback("/shared");
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // Whatever interleaving happened, history is consistent with content
        let status = vcfs.status("/shared").unwrap();
        assert_eq!(status.counter as usize, status.backward_records);
        while vcfs.status("/shared").unwrap().can_undo() {
            assert!(vcfs.rollback("/shared").unwrap().is_applied());
        }
    }
}
