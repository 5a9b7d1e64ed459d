//! Lock artifact: everything needed to reproduce a build.

use crate::digest::{digest_of, sha256_hex};
use crate::error::Result;
use crate::network::NetworkPlan;
use crate::spec::AssignmentSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_BOX: &str = "generic/alma9";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PinnedVersions {
    pub almalinux_box: String,
    #[serde(default)]
    pub ansible_core: Option<String>,
    #[serde(default)]
    pub python_deps: BTreeMap<String, String>,
}

/// Relative path to SHA-256 of every file a build wrote.
///
/// Owned by the build stage and consumed when the lock artifact is created.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChecksumLedger {
    entries: BTreeMap<String, String>,
}

impl ChecksumLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the checksum of `content` written to `path`.
    pub fn record(&mut self, path: impl Into<String>, content: impl AsRef<[u8]>) {
        self.entries.insert(path.into(), sha256_hex(content));
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.entries
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockArtifact {
    /// SHA-256 of the canonical JSON form of the specification.
    pub spec_hash: String,
    pub seed: i64,
    pub resolved_network: NetworkPlan,
    pub pinned_versions: PinnedVersions,
    pub checksums: BTreeMap<String, String>,
}

impl LockArtifact {
    pub fn new(
        spec: &AssignmentSpec,
        network: NetworkPlan,
        box_version: &str,
        checksums: ChecksumLedger,
    ) -> Result<Self> {
        Ok(Self {
            spec_hash: spec_hash(spec)?,
            seed: spec.seed,
            resolved_network: network,
            pinned_versions: PinnedVersions {
                almalinux_box: box_version.to_string(),
                ansible_core: None,
                python_deps: BTreeMap::new(),
            },
            checksums: checksums.into_inner(),
        })
    }
}

pub fn spec_hash(spec: &AssignmentSpec) -> Result<String> {
    digest_of(spec)
}
