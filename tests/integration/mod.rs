//! Integration tests for vcfs
//!
//! Long editing sessions across several files, with the expected content of
//! every file tracked alongside so that undo and redo can be checked step by
//! step.

use ::vcfs::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::fs;
use tempfile::TempDir;
use tracing::info;

/// Test harness recording the content each write produced
pub struct VcfsTestHarness {
    pub temp_dir: TempDir,
    pub vcfs: Vcfs,
    pub rng: StdRng,
    /// Undoable states per path, oldest first
    pub states: HashMap<String, Vec<String>>,
    pub operation_log: Vec<TestOperation>,
}

#[derive(Debug, Clone)]
pub enum TestOperation {
    Append { path: String, text: String },
    Replace { path: String, text: String },
    Rollback { path: String },
    Redo { path: String },
}

impl VcfsTestHarness {
    /// Create a new harness with the default threshold
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_COMPACTION_THRESHOLD)
    }

    /// Create a new harness with a custom threshold
    pub fn with_threshold(threshold: u64) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let vcfs = VcfsBuilder::new()
            .compaction_threshold(threshold)
            .build(temp_dir.path().to_path_buf())
            .unwrap();

        Self {
            temp_dir,
            vcfs,
            rng: StdRng::seed_from_u64(42),
            states: HashMap::new(),
            operation_log: Vec::new(),
        }
    }

    /// Current content of a file through the engine
    pub fn content(&self, path: &str) -> String {
        self.vcfs.read(path).unwrap().unwrap_or_default()
    }

    /// Append text at the end of a file
    pub fn append(&mut self, path: &str, text: &str) -> WriteReport {
        let offset = self.content(path).len() as u64;
        let before = self.content(path);
        let report = self.vcfs.record_write(path, text.as_bytes(), offset).unwrap();
        self.track(path, before, &report);
        self.operation_log.push(TestOperation::Append {
            path: path.to_string(),
            text: text.to_string(),
        });
        report
    }

    /// Replace the whole content of a file
    pub fn replace(&mut self, path: &str, text: &str) -> WriteReport {
        let before = self.content(path);
        let report = self.vcfs.record_replace(path, text).unwrap();
        self.track(path, before, &report);
        self.operation_log.push(TestOperation::Replace {
            path: path.to_string(),
            text: text.to_string(),
        });
        report
    }

    fn track(&mut self, path: &str, before: String, report: &WriteReport) {
        let states = self.states.entry(path.to_string()).or_default();
        match report.update {
            HistoryUpdate::Recorded => states.push(before),
            HistoryUpdate::Unchanged => {}
            HistoryUpdate::Compacted => states.clear(),
        }
    }

    /// Undo one write and check the content against the recorded state
    pub fn rollback_and_check(&mut self, path: &str) -> RollbackOutcome {
        let outcome = self.vcfs.rollback(path).unwrap();
        let expected = self.states.get_mut(path).and_then(|states| states.pop());
        match (&outcome, expected) {
            (RollbackOutcome::Reverted { .. }, Some(expected)) => {
                assert_eq!(self.content(path), expected, "rollback of {}", path);
            }
            (RollbackOutcome::NoHistory, None) => {}
            (outcome, expected) => panic!(
                "rollback of {} gave {:?}, expected state {:?}",
                path, outcome, expected
            ),
        }
        self.operation_log.push(TestOperation::Rollback {
            path: path.to_string(),
        });
        outcome
    }

    /// Redo one write
    pub fn redo(&mut self, path: &str) -> RedoOutcome {
        let before = self.content(path);
        let outcome = self.vcfs.reverse_rollback(path).unwrap();
        if let RedoOutcome::Restored { recorded: true, .. } = outcome {
            self.states.entry(path.to_string()).or_default().push(before);
        }
        self.operation_log.push(TestOperation::Redo {
            path: path.to_string(),
        });
        outcome
    }

    /// Random printable text, sometimes multi-line
    pub fn random_text(&mut self, max_len: usize) -> String {
        const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz      \n.,-";
        let len = self.rng.random_range(1..=max_len);
        (0..len)
            .map(|_| ALPHABET[self.rng.random_range(0..ALPHABET.len())] as char)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_append_then_undo() {
        let mut harness = VcfsTestHarness::new();

        harness.append("/greeting.txt", "hello");
        harness.append("/greeting.txt", " world");
        assert_eq!(harness.content("/greeting.txt"), "hello world");

        harness.rollback_and_check("/greeting.txt");
        assert_eq!(harness.content("/greeting.txt"), "hello");
    }

    #[test]
    fn test_undo_redo_sequence() {
        let mut harness = VcfsTestHarness::new();

        for text in ["a", "ab", "abc"] {
            harness.replace("/f", text);
        }
        harness.rollback_and_check("/f");
        harness.rollback_and_check("/f");
        assert_eq!(harness.content("/f"), "a");

        let status = harness.vcfs.status("/f").unwrap();
        assert_eq!(status.forward_depth, 2);
        let records_before_redo = status.backward_records;

        harness.redo("/f");
        harness.redo("/f");
        assert_eq!(harness.content("/f"), "abc");

        let status = harness.vcfs.status("/f").unwrap();
        assert_eq!(status.forward_depth, 0);
        assert_eq!(status.backward_records, records_before_redo + 2);
    }

    #[test]
    fn test_thirty_writes_compact() {
        let mut harness = VcfsTestHarness::new();

        let mut last = None;
        for i in 0..30u8 {
            let c = (b'!' + i) as char;
            last = Some(harness.replace("/f", &c.to_string()));
        }
        assert_eq!(last.unwrap().update, HistoryUpdate::Compacted);

        let status = harness.vcfs.status("/f").unwrap();
        assert_eq!(status.backward_records, 0);
        assert_eq!(status.counter, 0);
        assert_eq!(harness.rollback_and_check("/f"), RollbackOutcome::NoHistory);
    }

    #[test]
    fn test_compaction_repeats() {
        let mut harness = VcfsTestHarness::with_threshold(5);

        for i in 0..12 {
            harness.append("/log.txt", &format!("line {}\n", i));
        }

        // Writes 5 and 10 compacted; writes 11 and 12 are undoable
        let status = harness.vcfs.status("/log.txt").unwrap();
        assert_eq!(status.counter, 2);
        assert_eq!(status.backward_records, 2);

        harness.rollback_and_check("/log.txt");
        harness.rollback_and_check("/log.txt");
        assert_eq!(
            harness.rollback_and_check("/log.txt"),
            RollbackOutcome::NoHistory
        );
        assert!(harness.content("/log.txt").ends_with("line 9\n"));
    }

    #[test]
    fn test_redo_counts_toward_threshold() {
        let mut harness = VcfsTestHarness::with_threshold(4);

        harness.replace("/f", "1");
        harness.replace("/f", "2");
        harness.replace("/f", "3");
        harness.rollback_and_check("/f");
        harness.redo("/f");
        assert_eq!(harness.vcfs.status("/f").unwrap().counter, 3);

        // The next write reaches the threshold
        let report = harness.replace("/f", "4");
        assert_eq!(report.update, HistoryUpdate::Compacted);
    }

    #[test]
    fn test_interleaved_files_are_independent() {
        let mut harness = VcfsTestHarness::new();

        harness.replace("/a.txt", "alpha");
        harness.replace("/b/c.txt", "beta");
        harness.append("/a.txt", " one");
        harness.append("/b/c.txt", " two");

        harness.rollback_and_check("/a.txt");
        assert_eq!(harness.content("/a.txt"), "alpha");
        assert_eq!(harness.content("/b/c.txt"), "beta two");

        // Writing b does not disturb redo of a
        harness.append("/b/c.txt", " three");
        assert!(harness.redo("/a.txt").is_applied());
        assert_eq!(harness.content("/a.txt"), "alpha one");
    }

    #[test]
    fn test_multiline_edits_in_middle() {
        let mut harness = VcfsTestHarness::new();
        let original = "fn main() {\n    println!(\"hi\");\n}\n";
        let edited = "fn main() {\n    let x = 1;\n    println!(\"hi {}\", x);\n}\n";

        harness.replace("/main.rs", original);
        harness.replace("/main.rs", edited);
        harness.rollback_and_check("/main.rs");
        assert_eq!(harness.content("/main.rs"), original);

        harness.redo("/main.rs");
        assert_eq!(harness.content("/main.rs"), edited);
    }

    #[test]
    fn test_unicode_content() {
        let mut harness = VcfsTestHarness::new();

        harness.replace("/u.txt", "héllo wörld");
        harness.replace("/u.txt", "héllo 世界 🌍");
        harness.rollback_and_check("/u.txt");
        assert_eq!(harness.content("/u.txt"), "héllo wörld");
    }

    #[test]
    #[traced_test]
    fn test_random_session() {
        let mut harness = VcfsTestHarness::new();
        let paths = ["/one.txt", "/two.txt", "/dir/three.txt"];

        for step in 0..200 {
            let path = paths[harness.rng.random_range(0..paths.len())];
            match harness.rng.random_range(0..5) {
                0 | 1 => {
                    let text = harness.random_text(20);
                    harness.append(path, &text);
                }
                2 => {
                    let text = harness.random_text(40);
                    harness.replace(path, &text);
                }
                3 => {
                    if harness.vcfs.status(path).unwrap().has_log {
                        harness.rollback_and_check(path);
                    }
                }
                _ => {
                    harness.redo(path);
                }
            }
            if step % 50 == 0 {
                info!("Step {}: {} operations", step, harness.operation_log.len());
            }
        }

        // Everything left in the log can be undone in order
        for path in paths {
            while harness.vcfs.status(path).unwrap().can_undo() {
                harness.rollback_and_check(path);
            }
        }
    }

    #[test]
    fn test_external_edit_blocks_rollback() {
        let mut harness = VcfsTestHarness::new();

        harness.replace("/f", "version one of the file");
        harness.replace("/f", "version two of the file");
        fs::write(harness.temp_dir.path().join("f"), "rewritten elsewhere").unwrap();

        let err = harness.vcfs.rollback("/f").unwrap_err();
        assert!(matches!(err, VcfsError::ApplyFailed { .. }));
        assert!(err.user_message().contains("Nothing was changed"));
        assert_eq!(harness.content("/f"), "rewritten elsewhere");
    }
}
