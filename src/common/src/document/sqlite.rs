use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool, query};
use std::path::Path;

use super::{
    CollectionPath, DocumentPath, DocumentRef, DocumentStore, DocumentStoreError, FieldUpdates,
    Fields, apply_updates,
};

/// Document store persisted in a SQLite database.
///
/// Each document is one row holding its fields as JSON text; the parent
/// collection is stored next to it so collection queries use an index.
#[derive(Clone, Debug)]
pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    /// Connect to the database and initialize the schema.
    pub async fn connect(dsn: &str) -> Result<Self, sqlx::Error> {
        tracing::info!(dsn, "Connecting to document database");

        let in_memory = dsn.contains(":memory:");
        if !in_memory {
            ensure_data_directory(dsn).map_err(sqlx::Error::Io)?;
        }

        // Add mode=rwc to create database file if it doesn't exist
        let dsn_with_create = if in_memory || dsn.contains("mode=") {
            dsn.to_string()
        } else if dsn.contains('?') {
            format!("{dsn}&mode=rwc")
        } else {
            format!("{dsn}?mode=rwc")
        };

        // Every connection to sqlite::memory: opens its own database
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&dsn_with_create)
            .await
            .inspect_err(|e| {
                tracing::error!(dsn = %dsn_with_create, error = %e, "Failed to connect to SQLite database");
            })?;

        let store = Self { pool };
        store.init().await.inspect_err(|e| {
            tracing::error!(error = %e, "Failed to initialize document schema");
        })?;
        tracing::info!("Document schema initialized successfully");
        Ok(store)
    }

    async fn init(&self) -> Result<(), sqlx::Error> {
        let create_documents = r#"
        CREATE TABLE IF NOT EXISTS documents (
            path TEXT PRIMARY KEY,
            collection TEXT NOT NULL,
            fields TEXT NOT NULL
        )"#;
        query(create_documents).execute(&self.pool).await?;

        let create_index = r#"
        CREATE INDEX IF NOT EXISTS documents_by_collection
        ON documents (collection, path)"#;
        query(create_index).execute(&self.pool).await?;

        Ok(())
    }
}

/// Create the parent directory of a file-backed SQLite DSN.
fn ensure_data_directory(dsn: &str) -> std::io::Result<()> {
    let file = dsn
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    let file = file.split('?').next().unwrap_or(file);
    if let Some(parent) = Path::new(file).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Fields>, DocumentStoreError> {
        let row = query("SELECT fields FROM documents WHERE path = ?")
            .bind(path.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String = row.try_get("fields")?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, path: &DocumentPath, fields: Fields) -> Result<(), DocumentStoreError> {
        let raw = serde_json::to_string(&fields)?;
        let stmt = r#"
        INSERT INTO documents (path, collection, fields)
        VALUES (?, ?, ?)
        ON CONFLICT (path) DO UPDATE SET fields = excluded.fields
        "#;
        query(stmt)
            .bind(path.as_str())
            .bind(path.collection())
            .bind(raw)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &CollectionPath,
        limit: usize,
    ) -> Result<Vec<DocumentRef>, DocumentStoreError> {
        let rows = query("SELECT path FROM documents WHERE collection = ? ORDER BY path LIMIT ?")
            .bind(collection.as_str())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        let mut refs = Vec::with_capacity(rows.len());
        for row in rows {
            let path: String = row.try_get("path")?;
            refs.push(DocumentRef {
                path: DocumentPath::parse(path)?,
            });
        }
        Ok(refs)
    }

    async fn batch_delete(&self, refs: &[DocumentRef]) -> Result<usize, DocumentStoreError> {
        let mut tx = self.pool.begin().await?;
        let mut deleted = 0;
        for doc in refs {
            let result = query("DELETE FROM documents WHERE path = ?")
                .bind(doc.path.as_str())
                .execute(&mut *tx)
                .await?;
            deleted += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(deleted)
    }

    async fn update(
        &self,
        path: &DocumentPath,
        updates: &FieldUpdates,
    ) -> Result<(), DocumentStoreError> {
        let mut tx = self.pool.begin().await?;

        let row = query("SELECT fields FROM documents WHERE path = ?")
            .bind(path.as_str())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DocumentStoreError::NotFound(path.to_string()))?;

        let raw: String = row.try_get("fields")?;
        let mut fields: Fields = serde_json::from_str(&raw)?;
        apply_updates(&mut fields, updates);

        query("UPDATE documents SET fields = ? WHERE path = ?")
            .bind(serde_json::to_string(&fields)?)
            .bind(path.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, path: &DocumentPath) -> Result<(), DocumentStoreError> {
        query("DELETE FROM documents WHERE path = ?")
            .bind(path.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
