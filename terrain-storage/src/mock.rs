//! In-memory mock store for testing.
//!
//! Enforces the same uniqueness constraints as the SQL schema, counts every
//! store round trip, and can be switched offline to exercise failure paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use terrain_core::{
    EntityType, Environment, EnvironmentId, EnvironmentProject, OrganizationId, ProjectId, Rule,
    RuleId, StorageError, TerrainResult, Tombstone, TombstoneScope, Workflow,
};

use crate::store::{EnvironmentStore, RuleStore, TombstoneStore};

type TombstoneKey = (TombstoneScope, String, i64);

/// In-memory mock store for testing.
#[derive(Debug, Default)]
pub struct MockStore {
    environments: Arc<RwLock<HashMap<EnvironmentId, Environment>>>,
    // (organization, name) uniqueness index
    environment_names: Arc<RwLock<HashMap<(OrganizationId, String), EnvironmentId>>>,
    environment_projects: Arc<RwLock<HashMap<(ProjectId, EnvironmentId), EnvironmentProject>>>,
    tombstones: Arc<RwLock<HashMap<TombstoneKey, Tombstone>>>,
    rules: Arc<RwLock<HashMap<RuleId, Rule>>>,
    workflows: Arc<RwLock<HashMap<RuleId, Workflow>>>,
    unavailable: AtomicBool,
    round_trips: AtomicU64,
}

fn read<T>(lock: &RwLock<T>) -> TerrainResult<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| StorageError::LockPoisoned.into())
}

fn write<T>(lock: &RwLock<T>) -> TerrainResult<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| StorageError::LockPoisoned.into())
}

impl MockStore {
    /// Create a new mock store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the database going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of store calls made so far, successful or not.
    pub fn round_trips(&self) -> u64 {
        self.round_trips.load(Ordering::SeqCst)
    }

    pub fn reset_round_trips(&self) {
        self.round_trips.store(0, Ordering::SeqCst);
    }

    pub fn environment_count(&self) -> usize {
        self.environments.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn environment_project_count(&self) -> usize {
        self.environment_projects.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn workflow_count(&self) -> usize {
        self.workflows.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Count a round trip and fail if the store is offline.
    fn begin(&self) -> TerrainResult<()> {
        self.round_trips.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                reason: "mock store is offline".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl EnvironmentStore for MockStore {
    async fn environment_insert(&self, env: &Environment) -> TerrainResult<()> {
        self.begin()?;
        // Take both locks in a fixed order so the index and rows never diverge.
        let mut names = write(&self.environment_names)?;
        let mut environments = write(&self.environments)?;

        let natural_key = (env.organization_id, env.name.clone());
        if names.contains_key(&natural_key) {
            return Err(StorageError::UniqueViolation {
                entity_type: EntityType::Environment,
                constraint: "environment_organization_id_name_key".to_string(),
            }
            .into());
        }
        if environments.contains_key(&env.id) {
            return Err(StorageError::UniqueViolation {
                entity_type: EntityType::Environment,
                constraint: "environment_pkey".to_string(),
            }
            .into());
        }

        names.insert(natural_key, env.id);
        environments.insert(env.id, env.clone());
        Ok(())
    }

    async fn environment_find(
        &self,
        organization_id: OrganizationId,
        name: &str,
    ) -> TerrainResult<Option<Environment>> {
        self.begin()?;
        let names = read(&self.environment_names)?;
        let environments = read(&self.environments)?;
        Ok(names
            .get(&(organization_id, name.to_string()))
            .and_then(|id| environments.get(id))
            .cloned())
    }

    async fn environment_get(&self, id: EnvironmentId) -> TerrainResult<Option<Environment>> {
        self.begin()?;
        let environments = read(&self.environments)?;
        Ok(environments.get(&id).cloned())
    }

    async fn environment_project_insert_ignore_conflict(
        &self,
        link: &EnvironmentProject,
    ) -> TerrainResult<bool> {
        self.begin()?;
        let mut links = write(&self.environment_projects)?;
        let key = (link.project_id, link.environment_id);
        if links.contains_key(&key) {
            return Ok(false);
        }
        links.insert(key, link.clone());
        Ok(true)
    }

    async fn environment_projects(
        &self,
        environment_id: EnvironmentId,
    ) -> TerrainResult<Vec<EnvironmentProject>> {
        self.begin()?;
        let links = read(&self.environment_projects)?;
        Ok(links
            .values()
            .filter(|l| l.environment_id == environment_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TombstoneStore for MockStore {
    async fn tombstone_insert(&self, tombstone: &Tombstone) -> TerrainResult<()> {
        self.begin()?;
        let mut tombstones = write(&self.tombstones)?;
        let key = (
            tombstone.scope,
            tombstone.table_name.clone(),
            tombstone.object_identifier,
        );
        if tombstones.contains_key(&key) {
            return Err(StorageError::UniqueViolation {
                entity_type: EntityType::Tombstone,
                constraint: "tombstone_scope_table_name_object_identifier_key".to_string(),
            }
            .into());
        }
        tombstones.insert(key, tombstone.clone());
        Ok(())
    }

    async fn tombstone_list(&self, scope: TombstoneScope) -> TerrainResult<Vec<Tombstone>> {
        self.begin()?;
        let tombstones = read(&self.tombstones)?;
        let mut result: Vec<Tombstone> = tombstones
            .values()
            .filter(|t| t.scope == scope)
            .cloned()
            .collect();
        result.sort_by_key(|t| t.created_at);
        Ok(result)
    }
}

#[async_trait]
impl RuleStore for MockStore {
    async fn rule_insert(&self, rule: &Rule, workflow: Option<&Workflow>) -> TerrainResult<()> {
        self.begin()?;
        let mut rules = write(&self.rules)?;
        let mut workflows = write(&self.workflows)?;

        if rules.contains_key(&rule.id) {
            return Err(StorageError::UniqueViolation {
                entity_type: EntityType::Rule,
                constraint: "rule_pkey".to_string(),
            }
            .into());
        }
        if let Some(workflow) = workflow {
            if workflow.rule_id != rule.id {
                return Err(StorageError::TransactionFailed {
                    reason: format!(
                        "workflow {} references rule {}, expected {}",
                        workflow.id, workflow.rule_id, rule.id
                    ),
                }
                .into());
            }
            workflows.insert(rule.id, workflow.clone());
        }
        rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn rule_get(&self, id: RuleId) -> TerrainResult<Option<Rule>> {
        self.begin()?;
        let rules = read(&self.rules)?;
        Ok(rules.get(&id).cloned())
    }

    async fn rule_list_by_project(&self, project_id: ProjectId) -> TerrainResult<Vec<Rule>> {
        self.begin()?;
        let rules = read(&self.rules)?;
        let mut result: Vec<Rule> = rules
            .values()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect();
        result.sort_by_key(|r| r.date_added);
        Ok(result)
    }

    async fn workflow_get_for_rule(&self, rule_id: RuleId) -> TerrainResult<Option<Workflow>> {
        self.begin()?;
        let workflows = read(&self.workflows)?;
        Ok(workflows.get(&rule_id).cloned())
    }
}

// ============================================================================
// TESTS
// ============================================================================
