//! Lock-guarded issue alert rule creation with workflow dual-write.
//!
//! Creating a rule takes a per-project lock so rule creation never
//! interleaves with error-detector setup for the same project. When the
//! organization has the dual-write flag, the rule is migrated into a
//! [`Workflow`] and both are persisted in one transaction.

use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use terrain_core::{
    Actor, EntityIdType, EnvironmentId, LockError, MatchType, OrganizationId, ProjectId, Rule,
    RuleData, RuleId, TerrainConfig, TerrainResult, UserId, ValidationError, Workflow, WorkflowId,
};
use terrain_storage::{LockService, RuleStore};

use crate::features::FeatureFlags;

/// Lock key prefix; the project id is appended.
pub const RULE_CREATION_LOCK_PREFIX: &str = "workflow-engine-project-error-detector";

/// Lock name reported alongside the key.
pub const RULE_CREATION_LOCK_NAME: &str = "workflow_engine_issue_alert";

/// Organizations with this flag get a workflow written with every new rule.
pub const ISSUE_ALERT_DUAL_WRITE_FEATURE: &str =
    "organizations:workflow-engine-issue-alert-dual-write";

// ============================================================================
// MIGRATION
// ============================================================================

/// Converts an issue alert rule into the equivalent workflow.
pub struct IssueAlertMigrator<'a> {
    rule: &'a Rule,
    user_id: Option<UserId>,
}

impl<'a> IssueAlertMigrator<'a> {
    pub fn new(rule: &'a Rule, user_id: Option<UserId>) -> Self {
        Self { rule, user_id }
    }

    /// Build the workflow.
    ///
    /// # Errors
    ///
    /// `ValidationError::InvalidValue` when a match type is not one of
    /// `all`, `any`, `none`, when the frequency is not positive, or when an
    /// action is not a JSON object.
    pub fn run(&self) -> TerrainResult<Workflow> {
        let data = &self.rule.data;

        let trigger_logic = parse_match("action_match", &data.action_match)?;
        let filter_logic = data
            .filter_match
            .as_deref()
            .map(|m| parse_match("filter_match", m))
            .transpose()?;

        if data.frequency <= 0 {
            return Err(ValidationError::InvalidValue {
                field: "frequency".to_string(),
                reason: format!("must be positive, got {}", data.frequency),
            }
            .into());
        }
        if let Some(pos) = data.actions.iter().position(|a| !a.is_object()) {
            return Err(ValidationError::InvalidValue {
                field: format!("actions[{}]", pos),
                reason: "expected an object".to_string(),
            }
            .into());
        }

        Ok(Workflow {
            id: WorkflowId::now_v7(),
            rule_id: self.rule.id,
            organization_id: self.rule.organization_id,
            name: self.rule.label.clone(),
            environment_id: self.rule.environment_id,
            trigger_logic,
            triggers: data.conditions.clone(),
            filter_logic,
            actions: data.actions.clone(),
            frequency_minutes: data.frequency,
            created_by_id: self.user_id,
            date_added: Utc::now(),
        })
    }
}

fn parse_match(field: &str, value: &str) -> TerrainResult<MatchType> {
    MatchType::from_db_str(value).map_err(|e| {
        ValidationError::InvalidValue {
            field: field.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

// ============================================================================
// CREATOR
// ============================================================================

/// Request to create an issue alert rule on a project.
#[derive(Debug, Clone)]
pub struct ProjectRuleCreator {
    pub name: String,
    pub project_id: ProjectId,
    pub organization_id: OrganizationId,
    pub action_match: String,
    pub actions: Vec<Value>,
    pub conditions: Vec<Value>,
    pub frequency: i32,
    pub environment: Option<EnvironmentId>,
    pub owner: Option<Actor>,
    pub filter_match: Option<String>,
    /// User making the request, recorded on the migrated workflow.
    pub user_id: Option<UserId>,
    pub lock_duration: Duration,
}

impl ProjectRuleCreator {
    /// Holds the project lock for the default `TerrainConfig::lock_duration`.
    pub fn new(
        name: impl Into<String>,
        project_id: ProjectId,
        organization_id: OrganizationId,
        action_match: impl Into<String>,
        frequency: i32,
    ) -> Self {
        Self {
            name: name.into(),
            project_id,
            organization_id,
            action_match: action_match.into(),
            actions: Vec::new(),
            conditions: Vec::new(),
            frequency,
            environment: None,
            owner: None,
            filter_match: None,
            user_id: None,
            lock_duration: TerrainConfig::default().lock_duration,
        }
    }

    pub fn with_actions(mut self, actions: Vec<Value>) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_conditions(mut self, conditions: Vec<Value>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_environment(mut self, environment: Option<EnvironmentId>) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_owner(mut self, owner: Actor) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_filter_match(mut self, filter_match: impl Into<String>) -> Self {
        self.filter_match = Some(filter_match.into());
        self
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Take the lock duration from configuration.
    pub fn with_config(self, config: &TerrainConfig) -> Self {
        self.with_lock_duration(config.lock_duration)
    }

    pub fn with_lock_duration(mut self, duration: Duration) -> Self {
        self.lock_duration = duration;
        self
    }

    /// Lock key guarding rule creation for this project.
    pub fn lock_key(&self) -> String {
        format!("{}:{}", RULE_CREATION_LOCK_PREFIX, self.project_id)
    }

    /// Create the rule (and workflow, under dual-write) while holding the
    /// project lock.
    ///
    /// # Errors
    ///
    /// - `LockError::AcquireTimeout` if the project lock is contended.
    /// - `LockError::NotHeld` if the lock expired before the write; nothing
    ///   is persisted in that case.
    /// - `ValidationError` if the workflow migration rejects the rule; nothing
    ///   is persisted in that case.
    /// - Store errors from the insert.
    #[tracing::instrument(
        skip_all,
        fields(project_id = %self.project_id, organization_id = %self.organization_id)
    )]
    pub async fn run(
        &self,
        locks: &dyn LockService,
        store: &dyn RuleStore,
        features: &dyn FeatureFlags,
    ) -> TerrainResult<Rule> {
        let guard = locks
            .acquire(&self.lock_key(), self.lock_duration, RULE_CREATION_LOCK_NAME)
            .await?;

        let rule = self.build_rule();

        let workflow = if features.has(ISSUE_ALERT_DUAL_WRITE_FEATURE, self.organization_id) {
            Some(IssueAlertMigrator::new(&rule, self.user_id).run()?)
        } else {
            None
        };

        if guard.is_expired() {
            tracing::warn!(key = guard.key(), "Rule creation lock expired before write");
            return Err(LockError::NotHeld {
                key: guard.key().to_string(),
            }
            .into());
        }
        store.rule_insert(&rule, workflow.as_ref()).await?;
        drop(guard);

        if let Some(workflow) = &workflow {
            tracing::info!(
                rule_id = %rule.id,
                workflow_id = %workflow.id,
                "Migrated issue alert to workflow"
            );
        }
        Ok(rule)
    }

    fn build_rule(&self) -> Rule {
        Rule {
            id: RuleId::now_v7(),
            project_id: self.project_id,
            organization_id: self.organization_id,
            label: self.name.clone(),
            environment_id: self.environment,
            owner: self.owner,
            data: RuleData {
                action_match: self.action_match.clone(),
                filter_match: self.filter_match.clone(),
                actions: self.actions.clone(),
                conditions: self.conditions.clone(),
                frequency: self.frequency,
            },
            date_added: Utc::now(),
        }
    }
}
