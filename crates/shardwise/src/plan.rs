//! Sharding Plan - Declarative description of how to shard a module
//!
//! A plan names parameters to shard by their fully-qualified path, module
//! outputs to reshard and module outputs to collapse back to local tensors.
//! Plans can be built in code or loaded from JSON:
//!
//! ```json
//! {
//!   "plan": {
//!     "fc1.weight": { "type": "chunk", "dim": 0, "placements": ["rank:0/cpu", "rank:1/cpu"] }
//!   },
//!   "return_local_tensor": ["fc1"]
//! }
//! ```
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use shardwise_core::error::{Error, Result};
use shardwise_distributed::ShardingSpec;

// =============================================================================
// ShardingPlan
// =============================================================================

/// What to shard and which module outputs to transform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardingPlan {
    /// Parameter path (e.g. `fc1.weight`) to the layout it is sharded with.
    #[serde(default)]
    pub plan: BTreeMap<String, ShardingSpec>,
    /// Module path to the layout its output is resharded to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_plan: Option<BTreeMap<String, ShardingSpec>>,
    /// Module paths whose sharded output is collapsed to the local tensor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_local_tensor: Option<BTreeSet<String>>,
}

impl ShardingPlan {
    /// Starts building a plan.
    #[must_use]
    pub fn builder() -> ShardingPlanBuilder {
        ShardingPlanBuilder::default()
    }

    /// Layout for parameter `name`, if planned.
    #[must_use]
    pub fn spec_for(&self, name: &str) -> Option<&ShardingSpec> {
        self.plan.get(name)
    }

    /// Output layout for module `path`, if planned.
    #[must_use]
    pub fn output_spec_for(&self, path: &str) -> Option<&ShardingSpec> {
        self.output_plan.as_ref().and_then(|p| p.get(path))
    }

    /// Returns true if module `path` should return its local tensor.
    #[must_use]
    pub fn returns_local_tensor(&self, path: &str) -> bool {
        self.return_local_tensor
            .as_ref()
            .is_some_and(|set| set.contains(path))
    }

    /// Parses a plan from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::serialization(e.to_string()))
    }

    /// Renders the plan as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::serialization(e.to_string()))
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`ShardingPlan`].
#[derive(Debug, Default)]
pub struct ShardingPlanBuilder {
    plan: ShardingPlan,
}

impl ShardingPlanBuilder {
    /// Shards parameter `name` with `spec`.
    #[must_use]
    pub fn shard(mut self, name: impl Into<String>, spec: ShardingSpec) -> Self {
        self.plan.plan.insert(name.into(), spec);
        self
    }

    /// Reshards the output of module `path` to `spec`.
    #[must_use]
    pub fn reshard_output(mut self, path: impl Into<String>, spec: ShardingSpec) -> Self {
        self.plan
            .output_plan
            .get_or_insert_with(BTreeMap::new)
            .insert(path.into(), spec);
        self
    }

    /// Collapses the sharded output of module `path` to its local tensor.
    #[must_use]
    pub fn return_local_tensor(mut self, path: impl Into<String>) -> Self {
        self.plan
            .return_local_tensor
            .get_or_insert_with(BTreeSet::new)
            .insert(path.into());
        self
    }

    /// Finishes the plan.
    #[must_use]
    pub fn build(self) -> ShardingPlan {
        self.plan
    }
}

// =============================================================================
// Tests
// =============================================================================
