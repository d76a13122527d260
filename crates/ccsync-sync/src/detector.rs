//! Change detection by fingerprint comparison.
//!
//! Each scan resolves every channel against a snapshot baseline and
//! compares the fingerprint of the result with the last one recorded. The
//! directory file sets observed during a scan are staged under the scan's
//! generation and only become committed once its broadcast round is done.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use ccsync_core::{Fingerprint, SyncOperation};

use crate::error::SyncError;
use crate::resolver::{Resolver, Snapshots};

#[derive(Debug, Default)]
struct Table {
    committed: Snapshots,
    /// Observed file sets of scans whose rounds are still being delivered.
    in_flight: BTreeMap<u64, Snapshots>,
}

/// Directory snapshots, shared between the scanner, the broadcast rounds
/// and per-connection resolutions.
#[derive(Debug, Clone, Default)]
pub struct SnapshotTable {
    inner: Arc<RwLock<Table>>,
}

impl SnapshotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the committed snapshots.
    pub fn snapshot(&self) -> Snapshots {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .committed
            .clone()
    }

    /// Baseline for the next scan: the committed file sets merged with
    /// those of every round still in flight.
    ///
    /// A file seen by an uncommitted round may already be on a subscriber,
    /// so its removal must still produce a deletion.
    pub fn baseline(&self) -> Snapshots {
        let table = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut baseline = table.committed.clone();
        for observed in table.in_flight.values() {
            for (channel, files) in observed {
                baseline
                    .entry(channel.clone())
                    .or_default()
                    .extend(files.iter().cloned());
            }
        }
        baseline
    }

    /// Hold a scan's observed file sets until its round commits.
    pub fn stage(&self, generation: u64, observed: Snapshots) {
        let mut table = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        table.in_flight.insert(generation, observed);
    }

    /// Make a staged scan's file sets the committed ones for its channels.
    pub fn commit(&self, generation: u64) {
        let mut table = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(observed) = table.in_flight.remove(&generation) {
            table.committed.extend(observed);
        }
    }

    /// Number of staged scans not yet committed.
    pub fn in_flight(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight
            .len()
    }
}

/// A channel whose fingerprint changed, with the operations that changed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedChannel {
    pub name: String,
    pub fingerprint: Fingerprint,
    pub operations: Vec<SyncOperation>,
}

/// A channel that could not be resolved this scan.
#[derive(Debug)]
pub struct ChannelFailure {
    pub name: String,
    pub error: SyncError,
}

/// Result of scanning every channel once.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Monotonic scan number, starting at 1.
    pub generation: u64,
    /// Changed channels in project order.
    pub changed: Vec<ChangedChannel>,
    /// Channels skipped because resolution failed.
    pub failures: Vec<ChannelFailure>,
    /// Directory file sets of every channel that resolved.
    pub observed: Snapshots,
}

impl ScanReport {
    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }

    pub fn changed_names(&self) -> Vec<&str> {
        self.changed.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Fingerprint table and scan counter.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    fingerprints: HashMap<String, Fingerprint>,
    generation: u64,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last recorded fingerprint of a channel.
    pub fn fingerprint(&self, channel: &str) -> Option<Fingerprint> {
        self.fingerprints.get(channel).copied()
    }

    /// Resolve every channel and report those whose fingerprint changed.
    ///
    /// Fingerprints are recorded as soon as a mismatch is seen, whether or
    /// not the change reaches any subscriber. A failing channel keeps its
    /// previous fingerprint.
    pub fn scan_all(&mut self, resolver: &Resolver, baseline: &Snapshots) -> ScanReport {
        self.generation += 1;
        let mut report = ScanReport {
            generation: self.generation,
            ..ScanReport::default()
        };

        for channel in resolver.project().channels() {
            let name = &channel.name;
            let resolution = match resolver.resolve(name, baseline) {
                Ok(resolution) => resolution,
                Err(error) => {
                    tracing::warn!(channel = %name, %error, "channel resolution failed");
                    report.failures.push(ChannelFailure {
                        name: name.clone(),
                        error,
                    });
                    continue;
                }
            };

            let fingerprint = match Fingerprint::of(&resolution.operations) {
                Ok(fp) => fp,
                Err(e) => {
                    report.failures.push(ChannelFailure {
                        name: name.clone(),
                        error: e.into(),
                    });
                    continue;
                }
            };

            report.observed.extend(resolution.observed);

            if self.fingerprints.get(name) != Some(&fingerprint) {
                tracing::debug!(channel = %name, %fingerprint, "fingerprint changed");
                self.fingerprints.insert(name.clone(), fingerprint);
                report.changed.push(ChangedChannel {
                    name: name.clone(),
                    fingerprint,
                    operations: resolution.operations,
                });
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccsync_core::{Channel, ChannelKind, ChunkLimits, Passthrough, Project};
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Resolver) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib/a.lua"), "A").unwrap();
        fs::write(dir.path().join("lib/b.lua"), "B").unwrap();
        fs::write(dir.path().join("main.lua"), "M").unwrap();
        let project = Project::new(
            dir.path(),
            vec![
                Channel::new("util", ChannelKind::Library).directory("lib"),
                Channel::new("main", ChannelKind::Script).file("main.lua").requires("util"),
            ],
        )
        .unwrap();
        let resolver = Resolver::new(Arc::new(project), Arc::new(Passthrough), ChunkLimits::default());
        (dir, resolver)
    }

    #[test]
    fn test_first_scan_reports_everything() {
        let (_dir, resolver) = setup();
        let mut detector = ChangeDetector::new();
        let report = detector.scan_all(&resolver, &Snapshots::new());
        assert_eq!(report.generation, 1);
        assert_eq!(report.changed_names(), vec!["util", "main"]);
        assert!(detector.fingerprint("util").is_some());
    }

    #[test]
    fn test_second_scan_is_quiet() {
        let (_dir, resolver) = setup();
        let mut detector = ChangeDetector::new();
        let committed = detector.scan_all(&resolver, &Snapshots::new()).observed;

        let report = detector.scan_all(&resolver, &committed);
        assert!(!report.has_changes());
        assert_eq!(report.generation, 2);
    }

    #[test]
    fn test_edit_propagates_to_dependents() {
        let (dir, resolver) = setup();
        let mut detector = ChangeDetector::new();
        let committed = detector.scan_all(&resolver, &Snapshots::new()).observed;

        fs::write(dir.path().join("lib/a.lua"), "A2").unwrap();
        let report = detector.scan_all(&resolver, &committed);
        assert_eq!(report.changed_names(), vec!["util", "main"]);
    }

    #[test]
    fn test_script_edit_leaves_library_alone() {
        let (dir, resolver) = setup();
        let mut detector = ChangeDetector::new();
        let committed = detector.scan_all(&resolver, &Snapshots::new()).observed;

        fs::write(dir.path().join("main.lua"), "M2").unwrap();
        let report = detector.scan_all(&resolver, &committed);
        assert_eq!(report.changed_names(), vec!["main"]);
    }

    #[test]
    fn test_deletion_then_commit_settles() {
        let (dir, resolver) = setup();
        let table = SnapshotTable::new();
        let mut detector = ChangeDetector::new();
        let scan = |detector: &mut ChangeDetector| {
            let report = detector.scan_all(&resolver, &table.baseline());
            table.stage(report.generation, report.observed.clone());
            table.commit(report.generation);
            report
        };
        scan(&mut detector);

        fs::remove_file(dir.path().join("lib/a.lua")).unwrap();
        let report = scan(&mut detector);
        let util = &report.changed[0];
        assert_eq!(
            util.operations.last(),
            Some(&SyncOperation::Deletion {
                file_paths: vec!["lib/a.lua".into()]
            })
        );

        // The deletion is part of the committed baseline now.
        let report = scan(&mut detector);
        assert_eq!(report.changed_names(), vec!["util", "main"]);
        let report = scan(&mut detector);
        assert!(!report.has_changes());
    }

    #[test]
    fn test_baseline_includes_in_flight_files() {
        let (dir, resolver) = setup();
        let table = SnapshotTable::new();
        let mut detector = ChangeDetector::new();
        let first = detector.scan_all(&resolver, &table.baseline());
        table.stage(first.generation, first.observed);
        table.commit(first.generation);

        // Added and staged, but its round has not committed yet.
        fs::write(dir.path().join("lib/c.lua"), "C").unwrap();
        let second = detector.scan_all(&resolver, &table.baseline());
        table.stage(second.generation, second.observed);
        assert_eq!(table.in_flight(), 1);
        assert!(!table.snapshot()["util"].contains("lib/c.lua"));

        fs::remove_file(dir.path().join("lib/c.lua")).unwrap();
        let third = detector.scan_all(&resolver, &table.baseline());
        assert_eq!(
            third.changed[0].operations.last(),
            Some(&SyncOperation::Deletion {
                file_paths: vec!["lib/c.lua".into()]
            })
        );

        table.commit(second.generation);
        assert_eq!(table.in_flight(), 0);
        assert!(table.snapshot()["util"].contains("lib/c.lua"));
    }

    #[test]
    fn test_failure_keeps_previous_fingerprint() {
        let (dir, resolver) = setup();
        let mut detector = ChangeDetector::new();
        detector.scan_all(&resolver, &Snapshots::new());
        let before = detector.fingerprint("main");

        fs::remove_file(dir.path().join("main.lua")).unwrap();
        let report = detector.scan_all(&resolver, &Snapshots::new());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].name, "main");
        assert_eq!(detector.fingerprint("main"), before);
    }
}
