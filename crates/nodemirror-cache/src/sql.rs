//! Helpers shared by the relational backends

use chrono::{DateTime, SecondsFormat, Utc};

use nodemirror_core::domain::{
    Checkpoint, Endpoints, IdentityKey, Node, Session, TokenBundle,
};
use nodemirror_core::ports::NodeFilter;

use crate::CacheError;

/// Splits a schema script into executable statements
///
/// Statements are separated by `;`. Fragments holding only whitespace or
/// `--` comment lines are skipped.
pub(crate) fn schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// Fixed-width UTC rendering, so stored timestamps compare as text
pub(crate) fn timestamp_key(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CacheError::SerializationError(format!("Invalid datetime '{}': {}", s, e)))
}

/// Rebuilds a node from its stored raw payload
pub(crate) fn node_from_raw(raw: &str) -> Result<Node, CacheError> {
    Node::from_payload_str(raw)
        .map_err(|e| CacheError::SerializationError(format!("Invalid node payload: {}", e)))
}

pub(crate) fn nodes_from_raw(rows: Vec<String>) -> Result<Vec<Node>, CacheError> {
    rows.iter().map(|raw| node_from_raw(raw)).collect()
}

// ============================================================================
// Node filters
// ============================================================================

/// WHERE/LIMIT tail for `filter`, plus its bind values in order
///
/// `placeholder` renders the n-th (1-based) bind parameter for the dialect.
pub(crate) fn filter_clause(
    filter: &NodeFilter,
    placeholder: fn(usize) -> String,
) -> (String, Vec<String>) {
    let mut sql = String::from(" WHERE 1=1");
    let mut binds: Vec<String> = Vec::new();

    let mut push = |column: &str, op: &str, value: String, sql: &mut String| {
        binds.push(value);
        sql.push_str(&format!(" AND {} {} {}", column, op, placeholder(binds.len())));
    };

    if let Some(kind) = filter.kind {
        push("kind", "=", kind.as_str().to_string(), &mut sql);
    }
    if let Some(status) = filter.status {
        push("status", "=", status.as_str().to_string(), &mut sql);
    }
    if let Some(ref name) = filter.name {
        push("name", "=", name.clone(), &mut sql);
    }
    if let Some(ref hash) = filter.content_hash {
        push("content_hash", "=", hash.clone(), &mut sql);
    }
    if let Some(since) = filter.modified_since {
        push("modified", ">", timestamp_key(since), &mut sql);
    }

    sql.push_str(" ORDER BY id");
    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    (sql, binds)
}

// ============================================================================
// Session rows
// ============================================================================

/// One row of the `sessions` table
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SessionRow {
    pub identity_key: String,
    pub token_type: Option<String>,
    pub expiry: Option<i64>,
    pub refresh_token: Option<String>,
    pub access_token: Option<String>,
    pub last_authorized: Option<String>,
    pub content_url: Option<String>,
    pub metadata_url: Option<String>,
    pub checkpoint: Option<String>,
}

impl SessionRow {
    pub fn from_session(session: &Session) -> Self {
        let tokens = session.tokens();
        let endpoints = session.endpoints();
        Self {
            identity_key: session.identity().to_string(),
            token_type: tokens.map(|t| t.token_type.clone()),
            expiry: tokens.map(|t| t.expires_in),
            refresh_token: tokens.and_then(|t| t.refresh_token.clone()),
            access_token: tokens.map(|t| t.access_token.clone()),
            last_authorized: tokens.map(|t| t.last_authorized.to_rfc3339()),
            content_url: endpoints.map(|e| e.content_url.clone()),
            metadata_url: endpoints.map(|e| e.metadata_url.clone()),
            checkpoint: session.checkpoint().map(|c| c.to_string()),
        }
    }

    /// Rebuilds the session; a row without an access token has no tokens
    pub fn into_session(self) -> Result<Session, CacheError> {
        let identity = IdentityKey::new(self.identity_key).map_err(|e| {
            CacheError::SerializationError(format!("Invalid identity key: {}", e))
        })?;

        let tokens = match self.access_token {
            Some(access_token) => {
                let last_authorized = match self.last_authorized {
                    Some(ref s) => parse_datetime(s)?,
                    None => DateTime::<Utc>::MIN_UTC,
                };
                Some(TokenBundle::new(
                    self.token_type.unwrap_or_else(|| "bearer".to_string()),
                    access_token,
                    self.refresh_token,
                    self.expiry.unwrap_or(0),
                    last_authorized,
                ))
            }
            None => None,
        };

        let endpoints = match (self.metadata_url, self.content_url) {
            (Some(metadata), Some(content)) => Some(Endpoints::new(metadata, content)),
            _ => None,
        };

        let checkpoint = self
            .checkpoint
            .filter(|c| !c.is_empty())
            .map(Checkpoint::new)
            .transpose()
            .map_err(|e| CacheError::SerializationError(format!("Invalid checkpoint: {}", e)))?;

        Ok(Session::from_parts(identity, tokens, endpoints, checkpoint))
    }
}
