//! Detection of output locations shared between units of work

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Output roots claimed by each identity during the lifetime of an engine.
///
/// Work whose outputs are equal to, inside of, or contain the outputs of other
/// work is flagged as overlapping. Overlapping work is never loaded from or
/// stored into the build cache and never has its previous outputs deleted,
/// since the files there may belong to someone else.
#[derive(Debug, Default)]
pub struct OutputOverlapRegistry {
    state: Mutex<RegistryState>,
}

#[derive(Debug, Default)]
struct RegistryState {
    owners: BTreeMap<PathBuf, BTreeSet<String>>,
    overlapping: BTreeSet<String>,
    warned: BTreeSet<(String, String)>,
}

impl OutputOverlapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `roots` for `identity`. Returns whether they overlap another identity's outputs.
    pub fn register(&self, identity: &str, display_name: &str, roots: &[PathBuf]) -> bool {
        // Checking and claiming happen under one lock so concurrent claims see each other
        let mut state = self.state.lock();

        let mut others = Vec::new();
        for (location, owners) in &state.owners {
            if !roots.iter().any(|root| overlaps(root, location)) {
                continue;
            }
            for other in owners.iter().filter(|other| other.as_str() != identity) {
                others.push((location.clone(), other.clone()));
            }
        }

        for root in roots {
            state
                .owners
                .entry(root.clone())
                .or_default()
                .insert(identity.to_string());
        }

        for (location, other) in others {
            state.overlapping.insert(other.clone());
            state.overlapping.insert(identity.to_string());
            if state.warned.insert(ordered(identity, &other)) {
                tracing::warn!(
                    work = %display_name,
                    location = %location.display(),
                    "Outputs overlap with another unit of work; caching and stale output cleanup are disabled for both"
                );
            }
        }

        state.overlapping.contains(identity)
    }

    pub fn is_overlapping(&self, identity: &str) -> bool {
        self.state.lock().overlapping.contains(identity)
    }
}

fn overlaps(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

fn ordered(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}
