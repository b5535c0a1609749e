//! Enum types for Terrain entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// CORE ENUMS
// ============================================================================

/// Entity type discriminator for errors and cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Environment,
    EnvironmentProject,
    Tombstone,
    Rule,
    Workflow,
    Lock,
}

impl EntityType {
    /// Table name used by the SQL store.
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityType::Environment => "terrain_environment",
            EntityType::EnvironmentProject => "terrain_environmentproject",
            EntityType::Tombstone => "terrain_tombstone",
            EntityType::Rule => "terrain_rule",
            EntityType::Workflow => "terrain_workflow",
            EntityType::Lock => "terrain_lock",
        }
    }
}

/// Which side of the region/control split a tombstone propagates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TombstoneScope {
    /// Deletions recorded in a region, propagated to control.
    Region,
    /// Deletions recorded in control, propagated to regions.
    Control,
}

impl TombstoneScope {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            TombstoneScope::Region => "region",
            TombstoneScope::Control => "control",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s.to_lowercase().as_str() {
            "region" => Ok(TombstoneScope::Region),
            "control" => Ok(TombstoneScope::Control),
            _ => Err(EnumParseError {
                kind: "tombstone scope",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for TombstoneScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for TombstoneScope {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// How a rule combines its conditions or filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    All,
    Any,
    None,
}

impl MatchType {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            MatchType::All => "all",
            MatchType::Any => "any",
            MatchType::None => "none",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s {
            "all" => Ok(MatchType::All),
            "any" => Ok(MatchType::Any),
            "none" => Ok(MatchType::None),
            _ => Err(EnumParseError {
                kind: "match type",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for MatchType {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid enum string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumParseError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for EnumParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for EnumParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tombstone_scope_roundtrip() {
        for scope in [TombstoneScope::Region, TombstoneScope::Control] {
            let parsed = TombstoneScope::from_db_str(scope.as_db_str()).unwrap();
            assert_eq!(scope, parsed);
        }
        assert_eq!("CONTROL".parse::<TombstoneScope>(), Ok(TombstoneScope::Control));
    }

    #[test]
    fn test_match_type_is_case_sensitive() {
        assert_eq!(MatchType::from_db_str("any"), Ok(MatchType::Any));
        assert!(MatchType::from_db_str("ANY").is_err());
        assert!(MatchType::from_db_str("some").is_err());
    }

    #[test]
    fn test_match_type_serde_lowercase() {
        let json = serde_json::to_string(&MatchType::None).unwrap();
        assert_eq!(json, "\"none\"");
    }

    #[test]
    fn test_entity_type_tables_are_distinct() {
        let all = [
            EntityType::Environment,
            EntityType::EnvironmentProject,
            EntityType::Tombstone,
            EntityType::Rule,
            EntityType::Workflow,
            EntityType::Lock,
        ];
        let mut names: Vec<_> = all.iter().map(|e| e.table_name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), all.len());
    }
}
