//! Domain types for the policy store.
//!
//! These types are both the persisted records and the wire contract of the
//! REST API. Field names are camelCase on the wire to stay compatible with
//! existing Elasticity manifests.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Key of a policy or scale record: `{namespace}/{name}`.
pub type PolicyKey = String;

/// Status message written when a policy is first created.
pub const CREATED_MESSAGE: &str = "Created, not processed yet";

// ── Policy ────────────────────────────────────────────────────────

/// A stored Elasticity policy: identity, declared spec, and the
/// controller-owned status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub namespace: String,
    pub name: String,
    pub spec: PolicySpec,
    #[serde(default)]
    pub status: PolicyStatus,
    /// Unix timestamp (seconds) when this policy was created.
    #[serde(default)]
    pub created_at: u64,
    /// Unix timestamp (seconds) when the spec was last updated.
    #[serde(default)]
    pub updated_at: u64,
}

/// Declared capacity model, buffer behaviour and bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    pub deployment: DeploymentRef,
    pub buffer: BufferSpec,
    pub workload: WorkloadRef,
}

/// The managed deployment and its per-instance capacity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRef {
    pub name: String,
    /// Rate a single instance can absorb (same unit as the rate source).
    pub capacity: u32,
    #[serde(default = "default_min_replicas")]
    pub min_replicas: u32,
    pub max_replicas: u32,
}

/// Buffer pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BufferSpec {
    /// Buffer size used for the first decision and whenever the cap binds.
    pub initial: u32,
    /// Percentage (0–100) of the buffer that overflow may occupy before
    /// the buffer grows.
    pub threshold: u32,
}

/// Which rate stream to observe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadRef {
    pub queue: String,
}

/// Observable status, written only by the reconcile loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Actual instance count observed before the last change.
    #[serde(default)]
    pub current_replicas: u32,
    /// Last decided buffer size; seeds the next decision.
    #[serde(default)]
    pub buffered_replicas: u32,
    #[serde(default)]
    pub desired_replicas: u32,
    /// Unix timestamp (seconds) of the last executed scale action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scale_time: Option<u64>,
}

fn default_min_replicas() -> u32 {
    1
}

impl Policy {
    /// Build a freshly created policy with an empty status.
    pub fn new(namespace: &str, name: &str, spec: PolicySpec, now: u64) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            spec,
            status: PolicyStatus {
                message: CREATED_MESSAGE.to_string(),
                ..PolicyStatus::default()
            },
            created_at: now,
            updated_at: now,
        }
    }

    /// Build the composite key for the policies table.
    pub fn table_key(&self) -> PolicyKey {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Key of the scale record of the managed deployment.
    pub fn scale_key(&self) -> PolicyKey {
        format!("{}/{}", self.namespace, self.spec.deployment.name)
    }

    /// Check identity and spec invariants.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.namespace.is_empty() || self.name.is_empty() {
            return Err(ValidationError::MissingIdentity);
        }
        self.spec.validate()
    }
}

impl PolicySpec {
    /// Check `capacity > 0`, `minReplicas <= maxReplicas` and the
    /// threshold range.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let d = &self.deployment;
        if d.name.is_empty() {
            return Err(ValidationError::MissingDeployment);
        }
        if d.capacity == 0 {
            return Err(ValidationError::ZeroCapacity);
        }
        if d.min_replicas > d.max_replicas {
            return Err(ValidationError::InvertedBounds {
                min: d.min_replicas,
                max: d.max_replicas,
            });
        }
        if self.buffer.threshold > 100 {
            return Err(ValidationError::ThresholdOutOfRange(self.buffer.threshold));
        }
        Ok(())
    }
}

// ── Scale ─────────────────────────────────────────────────────────

/// Scale subresource of a managed deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScaleRecord {
    pub namespace: String,
    pub deployment: String,
    /// Declared instance count (`spec.replicas`).
    pub declared: u32,
    /// Observed instance count (`status.replicas`).
    pub actual: u32,
    /// Unix timestamp of last update.
    #[serde(default)]
    pub updated_at: u64,
}

impl ScaleRecord {
    /// Build the composite key for the scales table.
    pub fn table_key(&self) -> PolicyKey {
        format!("{}/{}", self.namespace, self.deployment)
    }
}

/// Current Unix time in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Split a `{namespace}/{name}` key into its parts.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    let (namespace, name) = key.split_once('/')?;
    (!namespace.is_empty() && !name.is_empty()).then_some((namespace, name))
}
