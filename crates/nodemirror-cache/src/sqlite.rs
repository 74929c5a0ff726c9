//! SQLite implementation of ICacheStore
//!
//! ## Column mapping
//!
//! | Node field   | Column         | Strategy                              |
//! |--------------|----------------|---------------------------------------|
//! | id           | id             | `NodeId::as_str()`                    |
//! | kind, status | kind, status   | UPPERCASE wire names                  |
//! | size         | size           | INTEGER (saturates at `i64::MAX`)     |
//! | created      | created        | fixed-width RFC 3339 (`timestamp_key`)|
//! | modified     | modified       | fixed-width RFC 3339 (`timestamp_key`)|
//! | is_root      | is_root        | INTEGER 0/1                           |
//! | payload      | raw_payload    | compact JSON, source of truth         |
//! | parents      | edges          | one row per (child, parent)           |

use sqlx::{Sqlite, SqlitePool, Transaction};

use nodemirror_core::domain::{EdgePlan, IdentityKey, Node, NodeId, Session};
use nodemirror_core::ports::{ICacheStore, NodeFilter};

use crate::sql::{filter_clause, node_from_raw, nodes_from_raw, timestamp_key, SessionRow};
use crate::CacheError;

/// SQLite-backed node cache
pub struct SqliteCacheStore {
    pool: SqlitePool,
}

impl SqliteCacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Brings the edges of `child` in line with `parents` inside `tx`
    async fn reconcile_edges(
        tx: &mut Transaction<'_, Sqlite>,
        child: &NodeId,
        parents: &[NodeId],
    ) -> Result<EdgePlan, CacheError> {
        let stored: Vec<String> = sqlx::query_scalar("SELECT parent_id FROM edges WHERE child_id = ?")
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
            sqlx::query("DELETE FROM edges WHERE child_id = ? AND parent_id = ?")
                .bind(child.as_str())
                .bind(parent.as_str())
                .execute(&mut **tx)
                .await?;
        }
        for parent in &plan.to_insert {
            sqlx::query("INSERT INTO edges (child_id, parent_id) VALUES (?, ?)")
                .bind(child.as_str())
                .bind(parent.as_str())
                .execute(&mut **tx)
                .await?;
        }

        Ok(plan)
    }
}

#[async_trait::async_trait]
impl ICacheStore for SqliteCacheStore {
    async fn find_node_by_id(&self, id: &NodeId) -> anyhow::Result<Option<Node>> {
        let raw: Option<String> = sqlx::query_scalar("SELECT raw_payload FROM nodes WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(raw.as_deref().map(node_from_raw).transpose()?)
    }

    async fn find_nodes_by_name(&self, name: &str) -> anyhow::Result<Vec<Node>> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT raw_payload FROM nodes WHERE name = ? ORDER BY id")
                .bind(name)
                .fetch_all(&self.pool)
                .await?;

        Ok(nodes_from_raw(rows)?)
    }

    async fn find_root_node(&self) -> anyhow::Result<Option<Node>> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT raw_payload FROM nodes WHERE is_root = 1 ORDER BY id LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;

        Ok(raw.as_deref().map(node_from_raw).transpose()?)
    }

    async fn get_node_children(&self, parent: &NodeId) -> anyhow::Result<Vec<Node>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT n.raw_payload FROM nodes n \
             JOIN edges e ON e.child_id = n.id \
             WHERE e.parent_id = ? ORDER BY n.id",
        )
        .bind(parent.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(nodes_from_raw(rows)?)
    }

    async fn get_parent_ids(&self, child: &NodeId) -> anyhow::Result<Vec<NodeId>> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT parent_id FROM edges WHERE child_id = ? ORDER BY parent_id")
                .bind(child.as_str())
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(NodeId::new)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn filter_nodes(&self, filter: &NodeFilter) -> anyhow::Result<Vec<Node>> {
        let (clause, binds) = filter_clause(filter, |_| "?".to_string());
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
        sqlx::query("DELETE FROM edges WHERE child_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM nodes WHERE id = ?")
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
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
             name = excluded.name, kind = excluded.kind, status = excluded.status, \
             content_hash = excluded.content_hash, size = excluded.size, \
             created = excluded.created, modified = excluded.modified, \
             is_root = excluded.is_root, raw_payload = excluded.raw_payload",
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
            sqlx::query_as("SELECT * FROM sessions WHERE identity_key = ?")
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
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(identity_key) DO UPDATE SET \
             token_type = excluded.token_type, expiry = excluded.expiry, \
             refresh_token = excluded.refresh_token, access_token = excluded.access_token, \
             last_authorized = excluded.last_authorized, content_url = excluded.content_url, \
             metadata_url = excluded.metadata_url, checkpoint = excluded.checkpoint",
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
