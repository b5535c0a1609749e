//! Terrain Env - Environment Materialization
//!
//! Business logic on top of `terrain-storage`:
//! - [`EnvironmentMaterializer`]: race-safe get-or-create of environments
//!   and their project links, fronted by TTL caches
//! - [`TombstoneRecorder`]: idempotent deletion tombstones
//! - [`ProjectRuleCreator`]: lock-guarded rule creation with workflow
//!   dual-write
//! - [`FeatureFlags`]: per-organization rollout flags

pub mod features;
pub mod materializer;
pub mod rules;
pub mod tombstone;

pub use features::{FeatureFlags, StaticFeatureFlags};
pub use materializer::{EnvironmentMaterializer, MaterializerStats};
pub use rules::{
    IssueAlertMigrator, ProjectRuleCreator, ISSUE_ALERT_DUAL_WRITE_FEATURE,
    RULE_CREATION_LOCK_NAME, RULE_CREATION_LOCK_PREFIX,
};
pub use tombstone::TombstoneRecorder;
