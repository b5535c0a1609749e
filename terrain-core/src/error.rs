//! Error types for Terrain operations

use crate::EntityType;
use std::time::Duration;
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity_type:?} with key {key}")]
    NotFound { entity_type: EntityType, key: String },

    /// A uniqueness constraint rejected the insert. Callers that race on
    /// create-if-absent paths recover from this locally.
    #[error("Unique constraint {constraint} violated for {entity_type:?}")]
    UniqueViolation {
        entity_type: EntityType,
        constraint: String,
    },

    #[error("Insert failed for {entity_type:?}: {reason}")]
    InsertFailed { entity_type: EntityType, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Storage unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    /// Whether this error is the expected create-if-absent race.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StorageError::UniqueViolation { .. })
    }
}

/// Cache layer errors. Never fatal to materialization: callers fail open.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Cache deserialization failed for key {key}: {reason}")]
    Deserialization { key: String, reason: String },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid environment name {name:?}: {reason}")]
    InvalidEnvironmentName { name: String, reason: String },

    #[error("Value for {field} too long: {len} > {max}")]
    TooLong { field: String, len: usize, max: usize },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Distributed lock errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("Unable to acquire lock {key} within {timeout:?}")]
    AcquireTimeout { key: String, timeout: Duration },

    #[error("Lock table poisoned while acquiring {key}")]
    Poisoned { key: String },

    #[error("Lock {key} is no longer held by this guard")]
    NotHeld { key: String },
}

/// Master error type for all Terrain errors.
#[derive(Debug, Clone, Error)]
pub enum TerrainError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),
}

impl TerrainError {
    /// Whether this is a store-level uniqueness violation.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, TerrainError::Storage(e) if e.is_unique_violation())
    }

    /// Whether this is a store-level not-found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TerrainError::Storage(StorageError::NotFound { .. }))
    }
}

/// Result type alias for Terrain operations.
pub type TerrainResult<T> = Result<T, TerrainError>;

// =============================================================================
// TESTS
// =============================================================================
