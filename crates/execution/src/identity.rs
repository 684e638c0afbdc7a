//! Identity of a unit of work

use crate::work::{InputValue, UnitOfWork, WorkspaceKind};
use std::fmt;
use workcell_core::{HashCode, Hasher, Result};
use workcell_vfs::Fingerprinter;

/// Stable key locating the workspace and history record of a unit of work
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkIdentity {
    pub display_name: String,
    pub hash: HashCode,
}

impl WorkIdentity {
    /// Key used for history records and mutable workspace names
    pub fn unique_id(&self) -> String {
        self.hash.to_hex()
    }
}

impl fmt::Display for WorkIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.hash.short())
    }
}

/// Hash of a value input in its canonical JSON form
pub fn hash_value(value: &serde_json::Value) -> Result<HashCode> {
    Ok(HashCode::of_bytes(&serde_json::to_vec(value)?))
}

/// Compute the identity from the declared identity inputs.
///
/// Identity file inputs contribute their content fingerprint, so the same
/// declaration over different files is a different identity.
pub fn identify(work: &dyn UnitOfWork, fingerprinter: &Fingerprinter) -> Result<WorkIdentity> {
    let declaration = work.declaration();
    let mut hasher = Hasher::new();
    hasher
        .put_str(match declaration.workspace_kind {
            WorkspaceKind::Mutable => "mutable",
            WorkspaceKind::Immutable => "immutable",
        })
        .put_str(&declaration.display_name);

    let mut identity_inputs: Vec<_> = declaration
        .inputs
        .iter()
        .filter(|input| input.identity)
        .collect();
    identity_inputs.sort_by(|a, b| a.name.cmp(&b.name));

    for input in identity_inputs {
        hasher.put_str(&input.name);
        match &input.value {
            InputValue::Value(value) => {
                hasher.put_hash(&hash_value(value)?);
            }
            InputValue::Files {
                roots,
                normalization,
            } => {
                let fingerprint = fingerprinter.fingerprint(roots, *normalization)?;
                hasher.put_hash(&fingerprint.hash());
            }
        }
    }

    Ok(WorkIdentity {
        display_name: declaration.display_name.clone(),
        hash: hasher.finish(),
    })
}

/// Content address of an immutable workspace: identity plus implementation
pub fn immutable_workspace_key(identity: &WorkIdentity, implementation: &HashCode) -> HashCode {
    let mut hasher = Hasher::new();
    hasher.put_hash(&identity.hash).put_hash(implementation);
    hasher.finish()
}
