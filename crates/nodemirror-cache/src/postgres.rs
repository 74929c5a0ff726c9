//! PostgreSQL implementation of ICacheStore
//!
//! Same schema and row mapping as the SQLite backend; `is_root` is a
//! BOOLEAN and sizes are BIGINT.

use std::str::FromStr;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};

use nodemirror_core::domain::{EdgePlan, IdentityKey, Node, NodeId, Session};
use nodemirror_core::ports::{ICacheStore, NodeFilter};

use crate::sql::{
    filter_clause, node_from_raw, nodes_from_raw, schema_statements, timestamp_key, SessionRow,
};
use crate::CacheError;

const POSTGRES_SCHEMA: &str = include_str!("migrations/postgres_initial.sql");

/// PostgreSQL-backed node cache
pub struct PostgresCacheStore {
    pool: PgPool,
}

impl PostgresCacheStore {
    /// Connects to `url` and creates the schema if missing
    ///
    /// # Errors
    ///
    /// Returns `CacheError::ConnectionFailed` for a malformed URL or an
    /// unreachable server, `CacheError::MigrationFailed` if the schema
    /// cannot be applied.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, CacheError> {
        let options = PgConnectOptions::from_str(url)
            .map_err(|e| CacheError::ConnectionFailed(format!("Invalid PostgreSQL URL: {}", e)))?;

        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!("Failed to connect to PostgreSQL: {}", e))
            })?;

        let store = Self::from_pool(pool);
        store.migrate().await?;

        tracing::info!(max_connections, "PostgreSQL node cache connected");
        Ok(store)
    }

    /// Wraps an existing pool; the schema is assumed to exist
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the schema one statement at a time
    ///
    /// PostgreSQL prepared statements cannot hold more than one command.
    pub async fn migrate(&self) -> Result<(), CacheError> {
        for statement in schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| CacheError::MigrationFailed(format!("Failed to apply schema: {}", e)))?;
        }
        Ok(())
    }

    async fn reconcile_edges(
        tx: &mut Transaction<'_, Postgres>,
        child: &NodeId,
        parents: &[NodeId],
    ) -> Result<EdgePlan, CacheError> {
        let stored: Vec<String> =
            sqlx::query_scalar("SELECT parent_id FROM edges WHERE child_id = $1")
                .bind(child.as_str())
                .fetch_all(&mut **tx)
                .await?;
        let persisted = stored
            .into_iter()
            .map(NodeId::new)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CacheError::SerializationError(format!("Invalid parent id: {}", e)))?;

        let plan = EdgePlan::compute(&persisted, parents);

        for parent in &plan.to_delete {
            sqlx::query("DELETE FROM edges WHERE child_id = $1 AND parent_id = $2")
                .bind(child.as_str())
                .bind(parent.as_str())
                .execute(&mut **tx)
                .await?;
        }
        for parent in &plan.to_insert {
            sqlx::query("INSERT INTO edges (child_id, parent_id) VALUES ($1, $2)")
                .bind(child.as_str())
                .bind(parent.as_str())
                .execute(&mut **tx)
                .await?;
        }

        Ok(plan)
    }
}

#[async_trait::async_trait]
impl ICacheStore for PostgresCacheStore {
    async fn find_node_by_id(&self, id: &NodeId) -> anyhow::Result<Option<Node>> {
        let raw: Option<String> = sqlx::query_scalar("SELECT raw_payload FROM nodes WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(raw.as_deref().map(node_from_raw).transpose()?)
    }

    async fn find_nodes_by_name(&self, name: &str) -> anyhow::Result<Vec<Node>> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT raw_payload FROM nodes WHERE name = $1 ORDER BY id")
                .bind(name)
                .fetch_all(&self.pool)
                .await?;

        Ok(nodes_from_raw(rows)?)
    }

    async fn find_root_node(&self) -> anyhow::Result<Option<Node>> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT raw_payload FROM nodes WHERE is_root ORDER BY id LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;

        Ok(raw.as_deref().map(node_from_raw).transpose()?)
    }

    async fn get_node_children(&self, parent: &NodeId) -> anyhow::Result<Vec<Node>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT n.raw_payload FROM nodes n \
             JOIN edges e ON e.child_id = n.id \
             WHERE e.parent_id = $1 ORDER BY n.id",
        )
        .bind(parent.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(nodes_from_raw(rows)?)
    }

    async fn get_parent_ids(&self, child: &NodeId) -> anyhow::Result<Vec<NodeId>> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT parent_id FROM edges WHERE child_id = $1 ORDER BY parent_id")
                .bind(child.as_str())
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(NodeId::new)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn filter_nodes(&self, filter: &NodeFilter) -> anyhow::Result<Vec<Node>> {
        let (clause, binds) = filter_clause(filter, |n| format!("${}", n));
        let sql = format!("SELECT raw_payload FROM nodes{}", clause);

        let mut query = sqlx::query_scalar::<_, String>(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let rows = query.fetch_all(&self.pool).await?;

        Ok(nodes_from_raw(rows)?)
    }

    async fn count_nodes(&self) -> anyhow::Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM nodes")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn delete_node_by_id(&self, id: &NodeId) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM edges WHERE child_id = $1")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM nodes WHERE id = $1")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::trace!(node_id = %id, "Deleted node");
        Ok(())
    }

    async fn delete_all_nodes(&self) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM edges").execute(&mut *tx).await?;
        let removed = sqlx::query("DELETE FROM nodes").execute(&mut *tx).await?;
        tx.commit().await?;

        tracing::info!(removed = removed.rows_affected(), "Cleared node cache");
        Ok(())
    }

    async fn save_node(&self, node: &Node) -> anyhow::Result<()> {
        let size = i64::try_from(node.size()).unwrap_or(i64::MAX);

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO nodes \
             (id, name, kind, status, content_hash, size, created, modified, is_root, raw_payload) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (id) DO UPDATE SET \
             name = EXCLUDED.name, kind = EXCLUDED.kind, status = EXCLUDED.status, \
             content_hash = EXCLUDED.content_hash, size = EXCLUDED.size, \
             created = EXCLUDED.created, modified = EXCLUDED.modified, \
             is_root = EXCLUDED.is_root, raw_payload = EXCLUDED.raw_payload",
        )
        .bind(node.id().as_str())
        .bind(node.name())
        .bind(node.kind().as_str())
        .bind(node.status().as_str())
        .bind(node.content_hash())
        .bind(size)
        .bind(node.created().map(timestamp_key))
        .bind(node.modified().map(timestamp_key))
        .bind(node.is_root())
        .bind(node.payload_string())
        .execute(&mut *tx)
        .await?;

        let plan = Self::reconcile_edges(&mut tx, node.id(), node.parents()).await?;
        tx.commit().await?;

        tracing::trace!(node_id = %node.id(), edge_writes = plan.write_count(), "Saved node");
        Ok(())
    }

    async fn save_node_parents(&self, child: &NodeId, parents: &[NodeId]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::reconcile_edges(&mut tx, child, parents).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn load_session(&self, identity: &IdentityKey) -> anyhow::Result<Option<Session>> {
        let row: Option<SessionRow> =
            sqlx::query_as("SELECT * FROM sessions WHERE identity_key = $1")
                .bind(identity.as_str())
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(SessionRow::into_session).transpose()?)
    }

    async fn save_session(&self, session: &Session) -> anyhow::Result<()> {
        let row = SessionRow::from_session(session);

        sqlx::query(
            "INSERT INTO sessions \
             (identity_key, token_type, expiry, refresh_token, access_token, \
              last_authorized, content_url, metadata_url, checkpoint) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (identity_key) DO UPDATE SET \
             token_type = EXCLUDED.token_type, expiry = EXCLUDED.expiry, \
             refresh_token = EXCLUDED.refresh_token, access_token = EXCLUDED.access_token, \
             last_authorized = EXCLUDED.last_authorized, content_url = EXCLUDED.content_url, \
             metadata_url = EXCLUDED.metadata_url, checkpoint = EXCLUDED.checkpoint",
        )
        .bind(&row.identity_key)
        .bind(&row.token_type)
        .bind(row.expiry)
        .bind(&row.refresh_token)
        .bind(&row.access_token)
        .bind(&row.last_authorized)
        .bind(&row.content_url)
        .bind(&row.metadata_url)
        .bind(&row.checkpoint)
        .execute(&self.pool)
        .await?;

        tracing::debug!(identity = %row.identity_key, "Saved session");
        Ok(())
    }
}
