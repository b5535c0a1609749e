//! PostgreSQL-backed store.
//!
//! Enabled with the `postgres` feature. Uniqueness is enforced by the schema
//! in [`SCHEMA_SQL`]; unique violations surface as
//! [`StorageError::UniqueViolation`] so create-if-absent callers can recover.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use serde_json::Value as JsonValue;
use terrain_core::{
    ConfigError, EntityIdType, EntityType, Environment, EnvironmentId, EnvironmentProject,
    MatchType, OrganizationId, ProjectId, Rule, RuleData, RuleId, StorageError, TerrainError,
    TerrainResult, Tombstone, TombstoneScope, UserId, Workflow, WorkflowId,
};
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use crate::store::{EnvironmentStore, RuleStore, TombstoneStore};

/// Tables and constraints the store relies on.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS terrain_environment (
    id UUID PRIMARY KEY,
    organization_id UUID NOT NULL,
    name VARCHAR(64) NOT NULL,
    date_added TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT environment_organization_id_name_key UNIQUE (organization_id, name)
);

CREATE TABLE IF NOT EXISTS terrain_environment_project (
    project_id UUID NOT NULL,
    environment_id UUID NOT NULL REFERENCES terrain_environment (id) ON DELETE CASCADE,
    is_hidden BOOLEAN,
    CONSTRAINT environment_project_key UNIQUE (project_id, environment_id)
);

CREATE TABLE IF NOT EXISTS terrain_tombstone (
    scope VARCHAR(16) NOT NULL,
    table_name VARCHAR(48) NOT NULL,
    object_identifier BIGINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT tombstone_scope_table_name_object_identifier_key
        UNIQUE (scope, table_name, object_identifier)
);

CREATE TABLE IF NOT EXISTS terrain_rule (
    id UUID PRIMARY KEY,
    project_id UUID NOT NULL,
    organization_id UUID NOT NULL,
    label VARCHAR(256) NOT NULL,
    environment_id UUID REFERENCES terrain_environment (id),
    owner JSONB,
    data JSONB NOT NULL,
    date_added TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS terrain_rule_project_idx ON terrain_rule (project_id);

CREATE TABLE IF NOT EXISTS terrain_workflow (
    id UUID PRIMARY KEY,
    rule_id UUID NOT NULL UNIQUE REFERENCES terrain_rule (id) ON DELETE CASCADE,
    organization_id UUID NOT NULL,
    name VARCHAR(256) NOT NULL,
    environment_id UUID REFERENCES terrain_environment (id),
    trigger_logic VARCHAR(8) NOT NULL,
    triggers JSONB NOT NULL,
    filter_logic VARCHAR(8),
    actions JSONB NOT NULL,
    frequency_minutes INTEGER NOT NULL,
    created_by_id UUID,
    date_added TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// PostgreSQL connection configuration.
#[derive(Debug, Clone)]
pub struct PgConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// Maximum pool size.
    pub max_size: usize,
    /// Wait for a pooled connection before reporting the store unavailable.
    pub timeout: Duration,
}

impl Default for PgConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "terrain".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl PgConfig {
    /// Create configuration from environment variables.
    ///
    /// - `TERRAIN_DB_HOST` (default: localhost)
    /// - `TERRAIN_DB_PORT` (default: 5432)
    /// - `TERRAIN_DB_NAME` (default: terrain)
    /// - `TERRAIN_DB_USER` (default: postgres)
    /// - `TERRAIN_DB_PASSWORD` (default: empty)
    /// - `TERRAIN_DB_POOL_SIZE` (default: 16)
    /// - `TERRAIN_DB_TIMEOUT` seconds (default: 30)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("TERRAIN_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("TERRAIN_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("TERRAIN_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("TERRAIN_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("TERRAIN_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("TERRAIN_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: Duration::from_secs(
                std::env::var("TERRAIN_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.timeout.as_secs()),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> TerrainResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let mut pool_cfg = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls).map_err(|e| {
            ConfigError::InvalidValue {
                field: "TERRAIN_DB_*".to_string(),
                value: format!("{}:{}/{}", self.host, self.port, self.dbname),
                reason: format!("Failed to create pool: {}", e),
            }
            .into()
        })
    }
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

fn map_pg_error(entity_type: EntityType, e: tokio_postgres::Error) -> TerrainError {
    if let Some(db_error) = e.as_db_error() {
        if db_error.code() == &SqlState::UNIQUE_VIOLATION {
            return StorageError::UniqueViolation {
                entity_type,
                constraint: db_error.constraint().unwrap_or("unknown").to_string(),
            }
            .into();
        }
        return StorageError::TransactionFailed {
            reason: db_error.message().to_string(),
        }
        .into();
    }
    StorageError::Unavailable {
        reason: e.to_string(),
    }
    .into()
}

fn map_pool_error(e: deadpool_postgres::PoolError) -> TerrainError {
    StorageError::Unavailable {
        reason: format!("Failed to get connection: {}", e),
    }
    .into()
}

fn decode_error(entity_type: EntityType, reason: impl std::fmt::Display) -> TerrainError {
    StorageError::TransactionFailed {
        reason: format!("Malformed {:?} row: {}", entity_type, reason),
    }
    .into()
}

fn to_json<T: serde::Serialize>(entity_type: EntityType, value: &T) -> TerrainResult<JsonValue> {
    serde_json::to_value(value).map_err(|e| {
        StorageError::InsertFailed {
            entity_type,
            reason: e.to_string(),
        }
        .into()
    })
}

// ============================================================================
// ROW CONVERSION
// ============================================================================

fn environment_from_row(row: &Row) -> TerrainResult<Environment> {
    let et = EntityType::Environment;
    Ok(Environment {
        id: EnvironmentId::new(row.try_get("id").map_err(|e| map_pg_error(et, e))?),
        organization_id: OrganizationId::new(
            row.try_get("organization_id").map_err(|e| map_pg_error(et, e))?,
        ),
        name: row.try_get("name").map_err(|e| map_pg_error(et, e))?,
        date_added: row.try_get("date_added").map_err(|e| map_pg_error(et, e))?,
    })
}

fn environment_project_from_row(row: &Row) -> TerrainResult<EnvironmentProject> {
    let et = EntityType::EnvironmentProject;
    Ok(EnvironmentProject {
        project_id: ProjectId::new(row.try_get("project_id").map_err(|e| map_pg_error(et, e))?),
        environment_id: EnvironmentId::new(
            row.try_get("environment_id").map_err(|e| map_pg_error(et, e))?,
        ),
        is_hidden: row.try_get("is_hidden").map_err(|e| map_pg_error(et, e))?,
    })
}

fn tombstone_from_row(row: &Row) -> TerrainResult<Tombstone> {
    let et = EntityType::Tombstone;
    let scope: String = row.try_get("scope").map_err(|e| map_pg_error(et, e))?;
    Ok(Tombstone {
        scope: TombstoneScope::from_db_str(&scope).map_err(|e| decode_error(et, e))?,
        table_name: row.try_get("table_name").map_err(|e| map_pg_error(et, e))?,
        object_identifier: row
            .try_get("object_identifier")
            .map_err(|e| map_pg_error(et, e))?,
        created_at: row.try_get("created_at").map_err(|e| map_pg_error(et, e))?,
    })
}

fn rule_from_row(row: &Row) -> TerrainResult<Rule> {
    let et = EntityType::Rule;
    let owner: Option<JsonValue> = row.try_get("owner").map_err(|e| map_pg_error(et, e))?;
    let data: JsonValue = row.try_get("data").map_err(|e| map_pg_error(et, e))?;
    let environment_id: Option<Uuid> =
        row.try_get("environment_id").map_err(|e| map_pg_error(et, e))?;
    Ok(Rule {
        id: RuleId::new(row.try_get("id").map_err(|e| map_pg_error(et, e))?),
        project_id: ProjectId::new(row.try_get("project_id").map_err(|e| map_pg_error(et, e))?),
        organization_id: OrganizationId::new(
            row.try_get("organization_id").map_err(|e| map_pg_error(et, e))?,
        ),
        label: row.try_get("label").map_err(|e| map_pg_error(et, e))?,
        environment_id: environment_id.map(EnvironmentId::new),
        owner: owner
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| decode_error(et, e))?,
        data: serde_json::from_value::<RuleData>(data).map_err(|e| decode_error(et, e))?,
        date_added: row.try_get("date_added").map_err(|e| map_pg_error(et, e))?,
    })
}

fn workflow_from_row(row: &Row) -> TerrainResult<Workflow> {
    let et = EntityType::Workflow;
    let trigger_logic: String = row.try_get("trigger_logic").map_err(|e| map_pg_error(et, e))?;
    let filter_logic: Option<String> =
        row.try_get("filter_logic").map_err(|e| map_pg_error(et, e))?;
    let triggers: JsonValue = row.try_get("triggers").map_err(|e| map_pg_error(et, e))?;
    let actions: JsonValue = row.try_get("actions").map_err(|e| map_pg_error(et, e))?;
    let environment_id: Option<Uuid> =
        row.try_get("environment_id").map_err(|e| map_pg_error(et, e))?;
    let created_by_id: Option<Uuid> =
        row.try_get("created_by_id").map_err(|e| map_pg_error(et, e))?;
    Ok(Workflow {
        id: WorkflowId::new(row.try_get("id").map_err(|e| map_pg_error(et, e))?),
        rule_id: RuleId::new(row.try_get("rule_id").map_err(|e| map_pg_error(et, e))?),
        organization_id: OrganizationId::new(
            row.try_get("organization_id").map_err(|e| map_pg_error(et, e))?,
        ),
        name: row.try_get("name").map_err(|e| map_pg_error(et, e))?,
        environment_id: environment_id.map(EnvironmentId::new),
        trigger_logic: MatchType::from_db_str(&trigger_logic).map_err(|e| decode_error(et, e))?,
        triggers: serde_json::from_value(triggers).map_err(|e| decode_error(et, e))?,
        filter_logic: filter_logic
            .as_deref()
            .map(MatchType::from_db_str)
            .transpose()
            .map_err(|e| decode_error(et, e))?,
        actions: serde_json::from_value(actions).map_err(|e| decode_error(et, e))?,
        frequency_minutes: row
            .try_get("frequency_minutes")
            .map_err(|e| map_pg_error(et, e))?,
        created_by_id: created_by_id.map(UserId::new),
        date_added: row.try_get("date_added").map_err(|e| map_pg_error(et, e))?,
    })
}

// ============================================================================
// STORE
// ============================================================================

/// Store backed by a deadpool-managed PostgreSQL pool.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &PgConfig) -> TerrainResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Create tables and constraints if they do not exist.
    pub async fn migrate(&self) -> TerrainResult<()> {
        let conn = self.pool.get().await.map_err(map_pool_error)?;
        conn.batch_execute(SCHEMA_SQL)
            .await
            .map_err(|e| map_pg_error(EntityType::Environment, e))?;
        tracing::info!("Applied terrain schema");
        Ok(())
    }
}

#[async_trait]
impl EnvironmentStore for PgStore {
    async fn environment_insert(&self, env: &Environment) -> TerrainResult<()> {
        let conn = self.pool.get().await.map_err(map_pool_error)?;
        conn.execute(
            "INSERT INTO terrain_environment (id, organization_id, name, date_added)
             VALUES ($1, $2, $3, $4)",
            &[
                &env.id.as_uuid(),
                &env.organization_id.as_uuid(),
                &env.name,
                &env.date_added,
            ],
        )
        .await
        .map_err(|e| map_pg_error(EntityType::Environment, e))?;
        Ok(())
    }

    async fn environment_find(
        &self,
        organization_id: OrganizationId,
        name: &str,
    ) -> TerrainResult<Option<Environment>> {
        let conn = self.pool.get().await.map_err(map_pool_error)?;
        let row = conn
            .query_opt(
                "SELECT id, organization_id, name, date_added FROM terrain_environment
                 WHERE organization_id = $1 AND name = $2",
                &[&organization_id.as_uuid(), &name],
            )
            .await
            .map_err(|e| map_pg_error(EntityType::Environment, e))?;
        row.as_ref().map(environment_from_row).transpose()
    }

    async fn environment_get(&self, id: EnvironmentId) -> TerrainResult<Option<Environment>> {
        let conn = self.pool.get().await.map_err(map_pool_error)?;
        let row = conn
            .query_opt(
                "SELECT id, organization_id, name, date_added FROM terrain_environment
                 WHERE id = $1",
                &[&id.as_uuid()],
            )
            .await
            .map_err(|e| map_pg_error(EntityType::Environment, e))?;
        row.as_ref().map(environment_from_row).transpose()
    }

    async fn environment_project_insert_ignore_conflict(
        &self,
        link: &EnvironmentProject,
    ) -> TerrainResult<bool> {
        let conn = self.pool.get().await.map_err(map_pool_error)?;
        let inserted = conn
            .execute(
                "INSERT INTO terrain_environment_project (project_id, environment_id, is_hidden)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (project_id, environment_id) DO NOTHING",
                &[
                    &link.project_id.as_uuid(),
                    &link.environment_id.as_uuid(),
                    &link.is_hidden,
                ],
            )
            .await
            .map_err(|e| map_pg_error(EntityType::EnvironmentProject, e))?;
        Ok(inserted > 0)
    }

    async fn environment_projects(
        &self,
        environment_id: EnvironmentId,
    ) -> TerrainResult<Vec<EnvironmentProject>> {
        let conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows = conn
            .query(
                "SELECT project_id, environment_id, is_hidden FROM terrain_environment_project
                 WHERE environment_id = $1",
                &[&environment_id.as_uuid()],
            )
            .await
            .map_err(|e| map_pg_error(EntityType::EnvironmentProject, e))?;
        rows.iter().map(environment_project_from_row).collect()
    }
}

#[async_trait]
impl TombstoneStore for PgStore {
    async fn tombstone_insert(&self, tombstone: &Tombstone) -> TerrainResult<()> {
        let conn = self.pool.get().await.map_err(map_pool_error)?;
        conn.execute(
            "INSERT INTO terrain_tombstone (scope, table_name, object_identifier, created_at)
             VALUES ($1, $2, $3, $4)",
            &[
                &tombstone.scope.as_db_str(),
                &tombstone.table_name,
                &tombstone.object_identifier,
                &tombstone.created_at,
            ],
        )
        .await
        .map_err(|e| map_pg_error(EntityType::Tombstone, e))?;
        Ok(())
    }

    async fn tombstone_list(&self, scope: TombstoneScope) -> TerrainResult<Vec<Tombstone>> {
        let conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows = conn
            .query(
                "SELECT scope, table_name, object_identifier, created_at FROM terrain_tombstone
                 WHERE scope = $1 ORDER BY created_at",
                &[&scope.as_db_str()],
            )
            .await
            .map_err(|e| map_pg_error(EntityType::Tombstone, e))?;
        rows.iter().map(tombstone_from_row).collect()
    }
}

#[async_trait]
impl RuleStore for PgStore {
    async fn rule_insert(&self, rule: &Rule, workflow: Option<&Workflow>) -> TerrainResult<()> {
        if let Some(wf) = workflow {
            if wf.rule_id != rule.id {
                return Err(StorageError::TransactionFailed {
                    reason: format!("workflow {} does not belong to rule {}", wf.id, rule.id),
                }
                .into());
            }
        }

        let owner = rule
            .owner
            .as_ref()
            .map(|o| to_json(EntityType::Rule, o))
            .transpose()?;
        let data = to_json(EntityType::Rule, &rule.data)?;

        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| map_pg_error(EntityType::Rule, e))?;

        tx.execute(
            "INSERT INTO terrain_rule
                (id, project_id, organization_id, label, environment_id, owner, data, date_added)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                &rule.id.as_uuid(),
                &rule.project_id.as_uuid(),
                &rule.organization_id.as_uuid(),
                &rule.label,
                &rule.environment_id.map(|id| id.as_uuid()),
                &owner,
                &data,
                &rule.date_added,
            ],
        )
        .await
        .map_err(|e| map_pg_error(EntityType::Rule, e))?;

        if let Some(wf) = workflow {
            let triggers = to_json(EntityType::Workflow, &wf.triggers)?;
            let actions = to_json(EntityType::Workflow, &wf.actions)?;
            tx.execute(
                "INSERT INTO terrain_workflow
                    (id, rule_id, organization_id, name, environment_id, trigger_logic,
                     triggers, filter_logic, actions, frequency_minutes, created_by_id, date_added)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
                &[
                    &wf.id.as_uuid(),
                    &wf.rule_id.as_uuid(),
                    &wf.organization_id.as_uuid(),
                    &wf.name,
                    &wf.environment_id.map(|id| id.as_uuid()),
                    &wf.trigger_logic.as_db_str(),
                    &triggers,
                    &wf.filter_logic.map(|m| m.as_db_str()),
                    &actions,
                    &wf.frequency_minutes,
                    &wf.created_by_id.map(|id| id.as_uuid()),
                    &wf.date_added,
                ],
            )
            .await
            .map_err(|e| map_pg_error(EntityType::Workflow, e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_pg_error(EntityType::Rule, e))
    }

    async fn rule_get(&self, id: RuleId) -> TerrainResult<Option<Rule>> {
        let conn = self.pool.get().await.map_err(map_pool_error)?;
        let row = conn
            .query_opt(
                "SELECT id, project_id, organization_id, label, environment_id, owner, data,
                        date_added
                 FROM terrain_rule WHERE id = $1",
                &[&id.as_uuid()],
            )
            .await
            .map_err(|e| map_pg_error(EntityType::Rule, e))?;
        row.as_ref().map(rule_from_row).transpose()
    }

    async fn rule_list_by_project(&self, project_id: ProjectId) -> TerrainResult<Vec<Rule>> {
        let conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows = conn
            .query(
                "SELECT id, project_id, organization_id, label, environment_id, owner, data,
                        date_added
                 FROM terrain_rule WHERE project_id = $1 ORDER BY date_added",
                &[&project_id.as_uuid()],
            )
            .await
            .map_err(|e| map_pg_error(EntityType::Rule, e))?;
        rows.iter().map(rule_from_row).collect()
    }

    async fn workflow_get_for_rule(&self, rule_id: RuleId) -> TerrainResult<Option<Workflow>> {
        let conn = self.pool.get().await.map_err(map_pool_error)?;
        let row = conn
            .query_opt(
                "SELECT id, rule_id, organization_id, name, environment_id, trigger_logic,
                        triggers, filter_logic, actions, frequency_minutes, created_by_id,
                        date_added
                 FROM terrain_workflow WHERE rule_id = $1",
                &[&rule_id.as_uuid()],
            )
            .await
            .map_err(|e| map_pg_error(EntityType::Workflow, e))?;
        row.as_ref().map(workflow_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pg_config_defaults() {
        let config = PgConfig::default();
        assert_eq!(config.port, 5432);
        assert_eq!(config.dbname, "terrain");
        assert_eq!(config.max_size, 16);
    }

    #[test]
    fn test_schema_declares_uniqueness_constraints() {
        assert!(SCHEMA_SQL.contains("environment_organization_id_name_key"));
        assert!(SCHEMA_SQL.contains("UNIQUE (project_id, environment_id)"));
        assert!(SCHEMA_SQL.contains("tombstone_scope_table_name_object_identifier_key"));
    }

    /// Runs only with `DB_TESTS=1` against a reachable database.
    #[tokio::test]
    async fn test_environment_roundtrip_against_database() {
        if std::env::var("DB_TESTS").ok().as_deref() != Some("1") {
            return;
        }
        let store = PgStore::from_config(&PgConfig::from_env()).expect("pool");
        store.migrate().await.expect("migrate");

        let env = Environment::new(OrganizationId::now_v7(), "production");
        store.environment_insert(&env).await.expect("insert");
        let err = store
            .environment_insert(&Environment::new(env.organization_id, "production"))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());

        let found = store
            .environment_find(env.organization_id, "production")
            .await
            .expect("find");
        assert_eq!(found.map(|e| e.id), Some(env.id));

        let link = EnvironmentProject::new(ProjectId::now_v7(), env.id);
        assert!(store
            .environment_project_insert_ignore_conflict(&link)
            .await
            .expect("link"));
        assert!(!store
            .environment_project_insert_ignore_conflict(&link)
            .await
            .expect("link again"));
    }
}
