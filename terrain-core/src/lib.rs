//! Terrain Core - Entity Types
//!
//! Pure data structures, environment-name rules, configuration and errors.
//! All other crates depend on this. No storage or cache logic lives here.

pub mod config;
pub mod entities;
pub mod enums;
pub mod error;
pub mod identity;
pub mod lock;
pub mod name;

pub use config::{CacheBackendKind, TerrainConfig};
pub use entities::{Actor, Environment, EnvironmentProject, Rule, RuleData, Tombstone, Workflow};
pub use enums::{EntityType, EnumParseError, MatchType, TombstoneScope};
pub use error::{
    CacheError, ConfigError, LockError, StorageError, TerrainError, TerrainResult,
    ValidationError,
};
pub use identity::{
    new_entity_id, sha256_hex, EntityId, EntityIdType, EnvironmentId, LockId, OrganizationId,
    ProjectId, RuleId, TeamId, Timestamp, UserId, WorkflowId,
};
pub use lock::{expiry_after, Acquired, Lock, LockData, LockState};
pub use name::{
    is_valid_name, name_from_path_segment, name_or_default, validate_name,
    EMPTY_NAME_PATH_SEGMENT, ENVIRONMENT_NAME_MAX_LENGTH, ENVIRONMENT_NAME_PATTERN,
};
