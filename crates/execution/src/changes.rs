//! Change detection against the previous execution

use crate::work::InputChanges;
use std::collections::{BTreeMap, BTreeSet};
use workcell_cache::ExecutionState;
use workcell_core::HashCode;
use workcell_vfs::{FileChange, FileCollectionFingerprint};

/// State captured for the current run
#[derive(Debug, Clone, Copy)]
pub struct CurrentState<'a> {
    pub implementation: &'a HashCode,
    pub value_inputs: &'a BTreeMap<String, HashCode>,
    pub file_inputs: &'a BTreeMap<String, FileCollectionFingerprint>,
    pub outputs: &'a BTreeMap<String, FileCollectionFingerprint>,
}

/// Classification of a unit of work before it runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeReport {
    /// First run, or the previous record could not be read
    NoHistory,
    UpToDate,
    /// Inputs match but outputs were modified outside the pipeline
    OutputsChangedExternally { properties: Vec<String> },
    InputsChanged {
        reasons: Vec<String>,
        changes: InputChanges,
    },
}

impl ChangeReport {
    pub fn is_up_to_date(&self) -> bool {
        matches!(self, ChangeReport::UpToDate)
    }

    /// Changes to hand to the work if it executes
    pub fn input_changes(&self, current: &CurrentState<'_>) -> InputChanges {
        match self {
            ChangeReport::InputsChanged { changes, .. } => changes.clone(),
            _ => ChangeDetector::all_added(current.file_inputs),
        }
    }
}

/// Compares the current state of a unit of work with its history.
///
/// Anything that cannot be compared entry by entry makes the execution
/// non-incremental; nothing is ever classified up-to-date unless every
/// recorded hash matches.
pub struct ChangeDetector;

impl ChangeDetector {
    pub fn detect(
        previous: Option<&ExecutionState>,
        current: &CurrentState<'_>,
        incremental_properties: &BTreeSet<String>,
        work_incremental: bool,
    ) -> ChangeReport {
        let Some(previous) = previous else {
            return ChangeReport::NoHistory;
        };

        let mut rebuild_reasons = Vec::new();
        if !previous.successful {
            rebuild_reasons.push("previous execution failed".to_string());
        }
        if previous.implementation != *current.implementation {
            rebuild_reasons.push("implementation has changed".to_string());
        }
        rebuild_reasons.extend(keyed_differences(
            "value input",
            &previous.value_inputs,
            current.value_inputs,
            |a, b| a == b,
        ));
        if !same_keys(&previous.file_inputs, current.file_inputs) {
            rebuild_reasons.push("file input properties have changed".to_string());
        }

        let mut file_reasons = Vec::new();
        for (name, fingerprint) in current.file_inputs {
            if let Some(before) = previous.file_inputs.get(name) {
                if before.strategy() != fingerprint.strategy() {
                    rebuild_reasons.push(format!("normalization of '{name}' has changed"));
                } else if before != fingerprint {
                    file_reasons.push(format!("input files of '{name}' have changed"));
                }
            }
        }

        let mut changed_outputs: Vec<String> = keyed_differences(
            "output",
            &previous.outputs,
            current.outputs,
            |a, b| a == b,
        );
        changed_outputs.sort();

        if rebuild_reasons.is_empty() && file_reasons.is_empty() {
            if changed_outputs.is_empty() {
                return ChangeReport::UpToDate;
            }
            let properties = changed_property_names(&previous.outputs, current.outputs);
            return ChangeReport::OutputsChangedExternally { properties };
        }

        let incremental = work_incremental && rebuild_reasons.is_empty() && changed_outputs.is_empty();
        let changes = if incremental {
            let changes = current
                .file_inputs
                .iter()
                .filter(|(name, _)| incremental_properties.contains(*name))
                .map(|(name, fingerprint)| {
                    let before = previous.file_inputs.get(name);
                    let delta: Vec<FileChange> = match before {
                        Some(before) => fingerprint.changes_since(before),
                        None => fingerprint.changes_since(&FileCollectionFingerprint::empty(
                            fingerprint.strategy(),
                        )),
                    };
                    (name.clone(), delta)
                })
                .collect();
            InputChanges::new(true, changes)
        } else {
            Self::all_added(current.file_inputs)
        };

        let mut reasons = rebuild_reasons;
        reasons.extend(file_reasons);
        reasons.extend(changed_outputs);
        ChangeReport::InputsChanged { reasons, changes }
    }

    /// Non-incremental changes: every current entry is added
    pub fn all_added(file_inputs: &BTreeMap<String, FileCollectionFingerprint>) -> InputChanges {
        let changes = file_inputs
            .iter()
            .map(|(name, fingerprint)| {
                (
                    name.clone(),
                    fingerprint.changes_since(&FileCollectionFingerprint::empty(fingerprint.strategy())),
                )
            })
            .collect();
        InputChanges::new(false, changes)
    }
}

fn same_keys<V>(a: &BTreeMap<String, V>, b: &BTreeMap<String, V>) -> bool {
    a.len() == b.len() && a.keys().zip(b.keys()).all(|(x, y)| x == y)
}

fn keyed_differences<V>(
    what: &str,
    previous: &BTreeMap<String, V>,
    current: &BTreeMap<String, V>,
    equal: impl Fn(&V, &V) -> bool,
) -> Vec<String> {
    let mut reasons = Vec::new();
    for (name, value) in current {
        match previous.get(name) {
            None => reasons.push(format!("{what} '{name}' was added")),
            Some(before) if !equal(before, value) => {
                reasons.push(format!("{what} '{name}' has changed"))
            }
            Some(_) => {}
        }
    }
    for name in previous.keys() {
        if !current.contains_key(name) {
            reasons.push(format!("{what} '{name}' was removed"));
        }
    }
    reasons
}

fn changed_property_names(
    previous: &BTreeMap<String, FileCollectionFingerprint>,
    current: &BTreeMap<String, FileCollectionFingerprint>,
) -> Vec<String> {
    previous
        .keys()
        .chain(current.keys())
        .filter(|name| previous.get(*name) != current.get(*name))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;
    use workcell_cache::OriginMetadata;
    use workcell_vfs::{ChangeType, Fingerprinter, NormalizationStrategy, SnapshotStore};

    struct Fixture {
        implementation: HashCode,
        values: BTreeMap<String, HashCode>,
        files: BTreeMap<String, FileCollectionFingerprint>,
        outputs: BTreeMap<String, FileCollectionFingerprint>,
    }

    impl Fixture {
        fn capture(sources: &Path, output: &Path) -> Self {
            let fingerprinter = Fingerprinter::new(Arc::new(SnapshotStore::new()));
            let mut files = BTreeMap::new();
            files.insert(
                "sources".to_string(),
                fingerprinter
                    .fingerprint(&[sources], NormalizationStrategy::RelativePath)
                    .unwrap(),
            );
            let mut outputs = BTreeMap::new();
            outputs.insert(
                "binary".to_string(),
                fingerprinter
                    .fingerprint(&[output], NormalizationStrategy::RelativePath)
                    .unwrap(),
            );
            let mut values = BTreeMap::new();
            values.insert("level".to_string(), HashCode::of_str("2"));
            Self {
                implementation: HashCode::of_str("compile@1"),
                values,
                files,
                outputs,
            }
        }

        fn current(&self) -> CurrentState<'_> {
            CurrentState {
                implementation: &self.implementation,
                value_inputs: &self.values,
                file_inputs: &self.files,
                outputs: &self.outputs,
            }
        }

        fn record(&self) -> ExecutionState {
            ExecutionState {
                successful: true,
                implementation: self.implementation,
                value_inputs: self.values.clone(),
                file_inputs: self.files.clone(),
                outputs: self.outputs.clone(),
                origin: OriginMetadata::new("build-1", 1),
            }
        }
    }

    fn incremental() -> BTreeSet<String> {
        ["sources".to_string()].into_iter().collect()
    }

    fn project() -> (TempDir, std::path::PathBuf, std::path::PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let sources = temp_dir.path().join("src");
        fs::create_dir_all(&sources).unwrap();
        fs::write(sources.join("A.src"), "v1").unwrap();
        fs::write(sources.join("B.src"), "b").unwrap();
        let output = temp_dir.path().join("A.out");
        fs::write(&output, "out").unwrap();
        (temp_dir, sources, output)
    }

    #[test]
    fn test_no_history() {
        let (_temp_dir, sources, output) = project();
        let fixture = Fixture::capture(&sources, &output);
        assert_eq!(
            ChangeDetector::detect(None, &fixture.current(), &incremental(), true),
            ChangeReport::NoHistory
        );
    }

    #[test]
    fn test_up_to_date() {
        let (_temp_dir, sources, output) = project();
        let fixture = Fixture::capture(&sources, &output);
        let previous = fixture.record();
        assert!(
            ChangeDetector::detect(Some(&previous), &fixture.current(), &incremental(), true)
                .is_up_to_date()
        );
    }

    #[test]
    fn test_incremental_input_change() {
        let (_temp_dir, sources, output) = project();
        let previous = Fixture::capture(&sources, &output).record();
        fs::write(sources.join("A.src"), "v2").unwrap();
        let fixture = Fixture::capture(&sources, &output);

        match ChangeDetector::detect(Some(&previous), &fixture.current(), &incremental(), true) {
            ChangeReport::InputsChanged { changes, .. } => {
                assert!(changes.is_incremental());
                let delta = changes.changes_for("sources");
                assert_eq!(delta.len(), 1);
                assert_eq!(delta[0].normalized_path, "A.src");
                assert_eq!(delta[0].change, ChangeType::Modified);
            }
            other => panic!("unexpected report {other:?}"),
        }
    }

    #[test]
    fn test_failed_previous_run_forces_full_rebuild() {
        let (_temp_dir, sources, output) = project();
        let fixture = Fixture::capture(&sources, &output);
        let previous = fixture.record().into_failed();

        match ChangeDetector::detect(Some(&previous), &fixture.current(), &incremental(), true) {
            ChangeReport::InputsChanged { changes, reasons } => {
                assert!(!changes.is_incremental());
                assert_eq!(changes.added("sources").count(), 3);
                assert!(reasons.iter().any(|r| r.contains("failed")));
            }
            other => panic!("unexpected report {other:?}"),
        }
    }

    #[test]
    fn test_implementation_and_value_changes_are_not_incremental() {
        let (_temp_dir, sources, output) = project();
        let fixture = Fixture::capture(&sources, &output);
        let mut previous = fixture.record();
        previous.implementation = HashCode::of_str("compile@0");
        previous.value_inputs.insert("level".to_string(), HashCode::of_str("1"));

        match ChangeDetector::detect(Some(&previous), &fixture.current(), &incremental(), true) {
            ChangeReport::InputsChanged { changes, reasons } => {
                assert!(!changes.is_incremental());
                assert_eq!(reasons.len(), 2);
            }
            other => panic!("unexpected report {other:?}"),
        }
    }

    #[test]
    fn test_tampered_output() {
        let (_temp_dir, sources, output) = project();
        let previous = Fixture::capture(&sources, &output).record();
        fs::write(&output, "tampered").unwrap();
        let fixture = Fixture::capture(&sources, &output);

        assert_eq!(
            ChangeDetector::detect(Some(&previous), &fixture.current(), &incremental(), true),
            ChangeReport::OutputsChangedExternally {
                properties: vec!["binary".to_string()]
            }
        );
    }
}
