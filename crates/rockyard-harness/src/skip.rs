//! Pre-flight skip policies.
//!
//! A policy matches an instance by exact name, group prefix, or full
//! tag-equality map. Policy sets are validated against the tag-key allowlist
//! when loaded; matches become skip records in the campaign summary and
//! never count as passed or failed.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::taxonomy::{Tags, is_tag_key};
use rockyard_error::{Result, RockyardError};

/// One skip policy; at least one criterion must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipPolicy {
    /// Exact instance-name match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
    /// Group-prefix match against the instance name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Every entry must equal the instance's derived tag for that key.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,
}

impl SkipPolicy {
    fn matches(&self, instance_name: &str, tags: &Tags) -> bool {
        if let Some(name) = &self.instance_name {
            if name == instance_name {
                return true;
            }
        }
        if let Some(group) = &self.group {
            if instance_name.starts_with(group.as_str()) {
                return true;
            }
        }
        if !self.tags.is_empty()
            && self
                .tags
                .iter()
                .all(|(key, value)| tags.get(key) == value.as_str())
        {
            return true;
        }
        false
    }

    /// Stable one-line descriptor for skip records.
    #[must_use]
    pub fn descriptor(&self) -> String {
        if let Some(name) = &self.instance_name {
            return format!("instance_name={name}");
        }
        if let Some(group) = &self.group {
            return format!("group={group}");
        }
        let tags: Vec<String> = self
            .tags
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        format!("tags{{{}}}", tags.join(","))
    }
}

/// A skip match, recorded in `summary.skipped[]` and `governance.skipped[]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipRecord {
    pub instance_name: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,
    pub policy: String,
}

/// Validated set of skip policies.
#[derive(Debug, Clone, Default)]
pub struct SkipPolicySet {
    policies: Vec<SkipPolicy>,
}

impl SkipPolicySet {
    /// Validate and wrap a policy list.
    ///
    /// Unknown tag keys and criterion-free policies are hard errors.
    pub fn new(policies: Vec<SkipPolicy>) -> Result<Self> {
        for (index, policy) in policies.iter().enumerate() {
            if policy.instance_name.is_none() && policy.group.is_none() && policy.tags.is_empty() {
                return Err(RockyardError::SkipPolicy(format!(
                    "policy #{index} has no match criterion"
                )));
            }
            for key in policy.tags.keys() {
                if !is_tag_key(key) {
                    return Err(RockyardError::SkipPolicy(format!(
                        "policy #{index} references unknown tag key {key:?}"
                    )));
                }
            }
        }
        Ok(Self { policies })
    }

    /// Load a policy set from a JSON array file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let bytes = rockyard_faultfs::host::read(path)?;
        let policies: Vec<SkipPolicy> = serde_json::from_slice(&bytes)?;
        Self::new(policies)
    }

    /// First matching policy for an instance, as a skip record.
    #[must_use]
    pub fn match_instance(&self, instance_name: &str, tags: &Tags) -> Option<SkipRecord> {
        self.policies
            .iter()
            .find(|policy| policy.matches(instance_name, tags))
            .map(|policy| SkipRecord {
                instance_name: instance_name.to_owned(),
                reason: policy.reason.clone(),
                issue_id: policy.issue_id.clone(),
                policy: policy.descriptor(),
            })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
