//! PostgreSQL adapter for the transition store.
//!
//! This adapter is the transactional source-of-truth backend. History is an
//! append-only table keyed by a monotonically increasing sequence; the
//! pending schedule is a one-row-per-(entity, field) table whose primary
//! key implements the replace-on-save semantics.

use crate::traits::{DeletionScope, QueryWindow, TransitionStore};
use crate::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use stateflow_types::{
    ActorId, EntityRef, FieldName, StateId, Transition, TransitionId, WorkflowTypeId,
};

/// PostgreSQL-backed transition store.
#[derive(Clone)]
pub struct PostgresTransitionStore {
    pool: PgPool,
}

impl PostgresTransitionStore {
    /// Connect to PostgreSQL and initialize the required schema.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    /// Connect with explicit pool parameters.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to connect postgres: {e}")))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create an adapter from an existing pool.
    pub async fn from_pool(pool: PgPool) -> StoreResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StoreResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS stateflow_history (
                seq BIGSERIAL PRIMARY KEY,
                id TEXT NOT NULL UNIQUE,
                workflow TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                revision_id TEXT,
                field TEXT NOT NULL,
                from_state TEXT NOT NULL,
                to_state TEXT NOT NULL,
                actor TEXT NOT NULL,
                happened_at TIMESTAMPTZ NOT NULL,
                comment TEXT NOT NULL DEFAULT '',
                forced BOOLEAN NOT NULL DEFAULT FALSE
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS stateflow_history_entity_idx
                ON stateflow_history (entity_type, entity_id, field, seq DESC)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS stateflow_scheduled (
                workflow TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                revision_id TEXT,
                field TEXT NOT NULL,
                from_state TEXT NOT NULL,
                to_state TEXT NOT NULL,
                actor TEXT NOT NULL,
                due_at TIMESTAMPTZ NOT NULL,
                comment TEXT NOT NULL DEFAULT '',
                forced BOOLEAN NOT NULL DEFAULT FALSE,
                PRIMARY KEY (entity_type, entity_id, field)
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS stateflow_scheduled_due_idx
                ON stateflow_scheduled (due_at)
            "#,
        ];
        for statement in ddl {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }

    fn entity_id_of(entity: &EntityRef) -> StoreResult<&str> {
        entity.entity_id.as_deref().ok_or_else(|| {
            StoreError::InvalidInput("cannot persist transitions for unsaved entities".to_string())
        })
    }
}

fn history_row_to_transition(row: &sqlx::postgres::PgRow) -> StoreResult<Transition> {
    let id_text: String = row
        .try_get("id")
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    let id = uuid::Uuid::parse_str(&id_text)
        .map(TransitionId)
        .map_err(|e| StoreError::Serialization(format!("bad transition id {id_text}: {e}")))?;
    Ok(Transition::restore(
        Some(id),
        WorkflowTypeId::new(get_text(row, "workflow")?),
        StateId::new(get_text(row, "from_state")?),
        StateId::new(get_text(row, "to_state")?),
        restore_entity(row)?,
        FieldName::new(get_text(row, "field")?),
        ActorId::new(get_text(row, "actor")?),
        get_timestamp(row, "happened_at")?,
        get_text(row, "comment")?,
        false,
        true,
        row.try_get("forced")
            .map_err(|e| StoreError::Backend(e.to_string()))?,
    ))
}

fn scheduled_row_to_transition(row: &sqlx::postgres::PgRow) -> StoreResult<Transition> {
    Ok(Transition::restore(
        None,
        WorkflowTypeId::new(get_text(row, "workflow")?),
        StateId::new(get_text(row, "from_state")?),
        StateId::new(get_text(row, "to_state")?),
        restore_entity(row)?,
        FieldName::new(get_text(row, "field")?),
        ActorId::new(get_text(row, "actor")?),
        get_timestamp(row, "due_at")?,
        get_text(row, "comment")?,
        true,
        false,
        row.try_get("forced")
            .map_err(|e| StoreError::Backend(e.to_string()))?,
    ))
}

fn restore_entity(row: &sqlx::postgres::PgRow) -> StoreResult<EntityRef> {
    let mut entity = EntityRef::new(get_text(row, "entity_type")?, get_text(row, "entity_id")?);
    let revision: Option<String> = row
        .try_get("revision_id")
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    if let Some(revision) = revision {
        entity = entity.with_revision(revision);
    }
    Ok(entity)
}

fn get_text(row: &sqlx::postgres::PgRow, column: &str) -> StoreResult<String> {
    row.try_get(column)
        .map_err(|e| StoreError::Backend(e.to_string()))
}

fn get_timestamp(row: &sqlx::postgres::PgRow, column: &str) -> StoreResult<DateTime<Utc>> {
    row.try_get(column)
        .map_err(|e| StoreError::Backend(e.to_string()))
}

#[async_trait]
impl TransitionStore for PostgresTransitionStore {
    async fn save_executed(&self, transition: &mut Transition) -> StoreResult<TransitionId> {
        if !transition.is_executed() {
            return Err(StoreError::InvalidInput(
                "only executed transitions belong in history".to_string(),
            ));
        }
        let entity_id = Self::entity_id_of(&transition.entity)?;
        let id = TransitionId::generate();

        sqlx::query(
            r#"
            INSERT INTO stateflow_history
                (id, workflow, entity_type, entity_id, revision_id, field,
                 from_state, to_state, actor, happened_at, comment, forced)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(id.to_string())
        .bind(&transition.workflow.0)
        .bind(&transition.entity.entity_type)
        .bind(entity_id)
        .bind(transition.entity.revision_id.as_deref())
        .bind(&transition.field.0)
        .bind(&transition.from_state().0)
        .bind(&transition.to_state().0)
        .bind(&transition.actor.0)
        .bind(transition.timestamp)
        .bind(transition.comment())
        .bind(transition.is_forced())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(format!("history insert failed: {e}")))?;

        transition.record_persisted(id);
        Ok(id)
    }

    async fn save_scheduled(&self, transition: &Transition) -> StoreResult<()> {
        if !transition.is_scheduled() || transition.is_executed() {
            return Err(StoreError::InvalidInput(
                "only pending scheduled transitions belong in the schedule".to_string(),
            ));
        }
        let entity_id = Self::entity_id_of(&transition.entity)?;

        sqlx::query(
            r#"
            INSERT INTO stateflow_scheduled
                (workflow, entity_type, entity_id, revision_id, field,
                 from_state, to_state, actor, due_at, comment, forced)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (entity_type, entity_id, field) DO UPDATE SET
                workflow = EXCLUDED.workflow,
                revision_id = EXCLUDED.revision_id,
                from_state = EXCLUDED.from_state,
                to_state = EXCLUDED.to_state,
                actor = EXCLUDED.actor,
                due_at = EXCLUDED.due_at,
                comment = EXCLUDED.comment,
                forced = EXCLUDED.forced
            "#,
        )
        .bind(&transition.workflow.0)
        .bind(&transition.entity.entity_type)
        .bind(entity_id)
        .bind(transition.entity.revision_id.as_deref())
        .bind(&transition.field.0)
        .bind(&transition.from_state().0)
        .bind(&transition.to_state().0)
        .bind(&transition.actor.0)
        .bind(transition.timestamp)
        .bind(transition.comment())
        .bind(transition.is_forced())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(format!("schedule upsert failed: {e}")))?;

        Ok(())
    }

    async fn last_executed(
        &self,
        entity: &EntityRef,
        field: &FieldName,
        exclude: Option<&TransitionId>,
    ) -> StoreResult<Option<Transition>> {
        if entity.is_new() {
            return Ok(None);
        }
        let entity_id = Self::entity_id_of(entity)?;

        let row = sqlx::query(
            r#"
            SELECT id, workflow, entity_type, entity_id, revision_id, field,
                   from_state, to_state, actor, happened_at, comment, forced
            FROM stateflow_history
            WHERE entity_type = $1 AND entity_id = $2 AND field = $3
              AND ($4::TEXT IS NULL OR id != $4)
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(&entity.entity_type)
        .bind(entity_id)
        .bind(&field.0)
        .bind(exclude.map(|id| id.to_string()))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(format!("history query failed: {e}")))?;

        row.as_ref().map(history_row_to_transition).transpose()
    }

    async fn history(
        &self,
        entity: &EntityRef,
        field: &FieldName,
        window: QueryWindow,
    ) -> StoreResult<Vec<Transition>> {
        if entity.is_new() {
            return Ok(Vec::new());
        }
        let entity_id = Self::entity_id_of(entity)?;
        let limit = if window.limit == 0 {
            i64::MAX
        } else {
            window.limit as i64
        };

        let rows = sqlx::query(
            r#"
            SELECT id, workflow, entity_type, entity_id, revision_id, field,
                   from_state, to_state, actor, happened_at, comment, forced
            FROM stateflow_history
            WHERE entity_type = $1 AND entity_id = $2 AND field = $3
            ORDER BY seq DESC
            OFFSET $4 LIMIT $5
            "#,
        )
        .bind(&entity.entity_type)
        .bind(entity_id)
        .bind(&field.0)
        .bind(window.offset as i64)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(format!("history query failed: {e}")))?;

        rows.iter().map(history_row_to_transition).collect()
    }

    async fn scheduled_for(
        &self,
        entity: &EntityRef,
        field: &FieldName,
    ) -> StoreResult<Option<Transition>> {
        if entity.is_new() {
            return Ok(None);
        }
        let entity_id = Self::entity_id_of(entity)?;

        let row = sqlx::query(
            r#"
            SELECT workflow, entity_type, entity_id, revision_id, field,
                   from_state, to_state, actor, due_at, comment, forced
            FROM stateflow_scheduled
            WHERE entity_type = $1 AND entity_id = $2 AND field = $3
            "#,
        )
        .bind(&entity.entity_type)
        .bind(entity_id)
        .bind(&field.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(format!("schedule query failed: {e}")))?;

        row.as_ref().map(scheduled_row_to_transition).transpose()
    }

    async fn due_scheduled(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Transition>> {
        let rows = sqlx::query(
            r#"
            SELECT workflow, entity_type, entity_id, revision_id, field,
                   from_state, to_state, actor, due_at, comment, forced
            FROM stateflow_scheduled
            WHERE due_at > $1 AND due_at <= $2
            ORDER BY due_at ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(format!("due query failed: {e}")))?;

        rows.iter().map(scheduled_row_to_transition).collect()
    }

    async fn delete_scheduled(&self, entity: &EntityRef, field: &FieldName) -> StoreResult<()> {
        if entity.is_new() {
            return Ok(());
        }
        let entity_id = Self::entity_id_of(entity)?;

        sqlx::query(
            "DELETE FROM stateflow_scheduled WHERE entity_type = $1 AND entity_id = $2 AND field = $3",
        )
        .bind(&entity.entity_type)
        .bind(entity_id)
        .bind(&field.0)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(format!("schedule delete failed: {e}")))?;

        Ok(())
    }

    async fn delete_for_entity(
        &self,
        entity: &EntityRef,
        field: Option<&FieldName>,
        scope: DeletionScope,
    ) -> StoreResult<()> {
        if entity.is_new() {
            return Ok(());
        }
        let entity_id = Self::entity_id_of(entity)?;
        let field_name = field.map(|f| f.0.clone());

        sqlx::query(
            r#"
            DELETE FROM stateflow_scheduled
            WHERE entity_type = $1 AND entity_id = $2
              AND ($3::TEXT IS NULL OR field = $3)
            "#,
        )
        .bind(&entity.entity_type)
        .bind(entity_id)
        .bind(field_name.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(format!("schedule delete failed: {e}")))?;

        if scope == DeletionScope::All {
            sqlx::query(
                r#"
                DELETE FROM stateflow_history
                WHERE entity_type = $1 AND entity_id = $2
                  AND ($3::TEXT IS NULL OR field = $3)
                "#,
            )
            .bind(&entity.entity_type)
            .bind(entity_id)
            .bind(field_name.as_deref())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("history delete failed: {e}")))?;
        }

        Ok(())
    }
}
