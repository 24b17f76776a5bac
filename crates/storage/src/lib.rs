use anyhow::{anyhow, bail, Context, Result};
use serde_json::{Map, Value};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite, SqliteConnection,
};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tokio::sync::broadcast;
use tracing::debug;

use shared::protocol::{Collection, RawDocument, WriteOperation};

const CHANGE_FEED_CAPACITY: usize = 1024;

/// Document database with atomic batches and a feed of committed changes.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
    changes: broadcast::Sender<CommittedChange>,
}

/// Documents touched by one committed batch, grouped by collection.
#[derive(Debug, Clone)]
pub struct CommittedChange {
    pub collection: Collection,
    pub added: Vec<RawDocument>,
    pub changed: Vec<RawDocument>,
}

/// Documents of one collection committed after a revision watermark.
#[derive(Debug, Clone, Default)]
pub struct DocumentChanges {
    pub added: Vec<RawDocument>,
    pub changed: Vec<RawDocument>,
    /// Highest revision included; pass it back as the next watermark.
    pub revision: i64,
}

impl DocumentChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty()
    }
}

struct TouchedDocument {
    collection: Collection,
    document_id: String,
    created: bool,
    body: Value,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to an in-memory database is a separate database.
        let max_connections = if is_memory_url(database_url) { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(Self { pool, changes })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<CommittedChange> {
        self.changes.subscribe()
    }

    pub async fn get_document(
        &self,
        collection: &Collection,
        document_id: &str,
    ) -> Result<Option<RawDocument>> {
        let row = sqlx::query("SELECT body FROM documents WHERE collection = ? AND document_id = ?")
            .bind(collection.path())
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| {
            let body = parse_body(&r.get::<String, _>(0))?;
            Ok(RawDocument::new(document_id, body))
        })
        .transpose()
    }

    /// All documents of a collection in first-write order.
    pub async fn list_documents(&self, collection: &Collection) -> Result<Vec<RawDocument>> {
        let mut conn = self.pool.acquire().await?;
        list_in(&mut conn, collection).await
    }

    /// The collection's documents together with the revision they reflect.
    pub async fn snapshot(&self, collection: &Collection) -> Result<(Vec<RawDocument>, i64)> {
        let mut tx = self.pool.begin().await?;
        let revision = current_revision(&mut tx).await?;
        let documents = list_in(&mut tx, collection).await?;
        tx.commit().await?;
        Ok((documents, revision))
    }

    /// Documents written after `since`, whichever process committed them.
    pub async fn changes_since(
        &self,
        collection: &Collection,
        since: i64,
    ) -> Result<DocumentChanges> {
        let rows = sqlx::query(
            "SELECT document_id, body, revision, created_revision FROM documents
             WHERE collection = ? AND revision > ? ORDER BY revision ASC, seq ASC",
        )
        .bind(collection.path())
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut changes = DocumentChanges {
            revision: since,
            ..DocumentChanges::default()
        };
        for r in rows {
            let body = parse_body(&r.get::<String, _>(1))?;
            let document = RawDocument::new(r.get::<String, _>(0), body);
            changes.revision = changes.revision.max(r.get::<i64, _>(2));
            if r.get::<i64, _>(3) > since {
                changes.added.push(document);
            } else {
                changes.changed.push(document);
            }
        }
        Ok(changes)
    }

    /// Applies every operation or none of them.
    pub async fn apply_batch(&self, operations: &[WriteOperation]) -> Result<()> {
        if operations.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        // Writing first takes the database write lock before anything is read.
        let revision: i64 = sqlx::query_scalar(
            "UPDATE revision_counter SET value = value + 1 WHERE id = 0 RETURNING value",
        )
        .fetch_one(&mut *tx)
        .await
        .context("failed to allocate revision")?;
        let mut touched: Vec<TouchedDocument> = Vec::new();

        for operation in operations {
            let collection = operation.collection().clone();
            let document_id = operation.document_id().to_string();
            let existing = load_body(&mut tx, &collection, &document_id).await?;

            let (created, body) = match operation {
                WriteOperation::Put { fields, .. } => {
                    (existing.is_none(), Value::Object(fields.clone()))
                }
                WriteOperation::Update { fields, .. } => {
                    let Some(current) = existing else {
                        bail!(
                            "cannot update missing document {}/{}",
                            collection.path(),
                            document_id
                        );
                    };
                    let mut object = match current {
                        Value::Object(map) => map,
                        _ => Map::new(),
                    };
                    for (field, update) in fields {
                        let next = update.apply(object.get(field));
                        object.insert(field.clone(), next);
                    }
                    (false, Value::Object(object))
                }
            };

            sqlx::query(
                "INSERT INTO documents (collection, document_id, body, revision, created_revision)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(collection, document_id) DO UPDATE SET
                    body=excluded.body, revision=excluded.revision, updated_at=CURRENT_TIMESTAMP",
            )
            .bind(collection.path())
            .bind(&document_id)
            .bind(body.to_string())
            .bind(revision)
            .bind(revision)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to write {}/{}", collection.path(), document_id))?;

            record_touch(&mut touched, collection, document_id, created, body);
        }

        tx.commit().await.context("failed to commit batch")?;
        debug!(
            operations = operations.len(),
            revision,
            "storage: committed batch"
        );

        for change in group_changes(touched) {
            // No subscribers is not an error.
            let _ = self.changes.send(change);
        }

        Ok(())
    }
}

async fn current_revision(conn: &mut SqliteConnection) -> Result<i64> {
    sqlx::query_scalar("SELECT value FROM revision_counter WHERE id = 0")
        .fetch_one(&mut *conn)
        .await
        .context("failed to read revision counter")
}

async fn list_in(conn: &mut SqliteConnection, collection: &Collection) -> Result<Vec<RawDocument>> {
    let rows = sqlx::query(
        "SELECT document_id, body FROM documents WHERE collection = ? ORDER BY seq ASC",
    )
    .bind(collection.path())
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|r| {
            let body = parse_body(&r.get::<String, _>(1))?;
            Ok(RawDocument::new(r.get::<String, _>(0), body))
        })
        .collect()
}

async fn load_body(
    conn: &mut SqliteConnection,
    collection: &Collection,
    document_id: &str,
) -> Result<Option<Value>> {
    let row = sqlx::query("SELECT body FROM documents WHERE collection = ? AND document_id = ?")
        .bind(collection.path())
        .bind(document_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|r| parse_body(&r.get::<String, _>(0))).transpose()
}

fn parse_body(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|err| anyhow!("stored document body is not JSON: {err}"))
}

fn record_touch(
    touched: &mut Vec<TouchedDocument>,
    collection: Collection,
    document_id: String,
    created: bool,
    body: Value,
) {
    if let Some(previous) = touched
        .iter_mut()
        .find(|t| t.collection == collection && t.document_id == document_id)
    {
        previous.body = body;
        return;
    }
    touched.push(TouchedDocument {
        collection,
        document_id,
        created,
        body,
    });
}

fn group_changes(touched: Vec<TouchedDocument>) -> Vec<CommittedChange> {
    let mut order: Vec<Collection> = Vec::new();
    let mut grouped: HashMap<Collection, CommittedChange> = HashMap::new();

    for doc in touched {
        let entry = grouped.entry(doc.collection.clone()).or_insert_with(|| {
            order.push(doc.collection.clone());
            CommittedChange {
                collection: doc.collection.clone(),
                added: Vec::new(),
                changed: Vec::new(),
            }
        });
        let raw = RawDocument::new(doc.document_id, doc.body);
        if doc.created {
            entry.added.push(raw);
        } else {
            entry.changed.push(raw);
        }
    }

    order
        .into_iter()
        .filter_map(|collection| grouped.remove(&collection))
        .collect()
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_memory_url(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
