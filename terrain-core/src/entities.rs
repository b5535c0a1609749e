//! Core entity structures

use crate::{
    EntityIdType, EnvironmentId, MatchType, OrganizationId, ProjectId, RuleId, TeamId,
    Timestamp, TombstoneScope, UserId, WorkflowId,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Environment - a named, organization-scoped deployment target
/// (`production`, `staging`, ...). At most one row per (organization, name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub id: EnvironmentId,
    pub organization_id: OrganizationId,
    /// Normalized name; the empty string is the default environment.
    pub name: String,
    pub date_added: Timestamp,
}

impl Environment {
    /// Build a new, not yet persisted environment row.
    pub fn new(organization_id: OrganizationId, name: impl Into<String>) -> Self {
        Self {
            id: EnvironmentId::now_v7(),
            organization_id,
            name: name.into(),
            date_added: Utc::now(),
        }
    }
}

/// Link between an environment and a project that has reported into it.
/// Unique per (project, environment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentProject {
    pub project_id: ProjectId,
    pub environment_id: EnvironmentId,
    pub is_hidden: Option<bool>,
}

impl EnvironmentProject {
    pub fn new(project_id: ProjectId, environment_id: EnvironmentId) -> Self {
        Self {
            project_id,
            environment_id,
            is_hidden: None,
        }
    }

    pub fn with_hidden(mut self, is_hidden: Option<bool>) -> Self {
        self.is_hidden = is_hidden;
        self
    }
}

/// Record of a hard deletion, kept so the delete can be propagated between
/// region and control silos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub scope: TombstoneScope,
    pub table_name: String,
    pub object_identifier: i64,
    pub created_at: Timestamp,
}

impl Tombstone {
    /// Maximum length of `table_name`.
    pub const TABLE_NAME_MAX_LENGTH: usize = 48;

    pub fn new(
        scope: TombstoneScope,
        table_name: impl Into<String>,
        object_identifier: i64,
    ) -> Self {
        Self {
            scope,
            table_name: table_name.into(),
            object_identifier,
            created_at: Utc::now(),
        }
    }
}

/// Owner of a rule: either a user or a team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum Actor {
    User(UserId),
    Team(TeamId),
}

/// Rule payload stored alongside the rule row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleData {
    pub action_match: String,
    pub filter_match: Option<String>,
    pub actions: Vec<serde_json::Value>,
    pub conditions: Vec<serde_json::Value>,
    /// Minimum minutes between notifications for the same issue.
    pub frequency: i32,
}

/// Issue alert rule attached to a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub project_id: ProjectId,
    pub organization_id: OrganizationId,
    pub label: String,
    pub environment_id: Option<EnvironmentId>,
    pub owner: Option<Actor>,
    pub data: RuleData,
    pub date_added: Timestamp,
}

/// Workflow migrated from an issue alert rule (dual-write target).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub rule_id: RuleId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub environment_id: Option<EnvironmentId>,
    pub trigger_logic: MatchType,
    pub triggers: Vec<serde_json::Value>,
    pub filter_logic: Option<MatchType>,
    pub actions: Vec<serde_json::Value>,
    pub frequency_minutes: i32,
    pub created_by_id: Option<UserId>,
    pub date_added: Timestamp,
}
