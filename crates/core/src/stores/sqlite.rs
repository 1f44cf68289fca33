use crate::error::RepositoryError;
use crate::models::{ChatDocumentLink, ChatSession, Document, DocumentSummary, NewDocument};
use crate::traits::DocumentRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        file_path TEXT NOT NULL,
        checksum TEXT NOT NULL,
        size_bytes INTEGER NOT NULL,
        extracted_text TEXT NOT NULL DEFAULT '',
        uploaded_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chats (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chat_document_links (
        chat_id INTEGER PRIMARY KEY REFERENCES chats(id) ON DELETE CASCADE,
        document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
        created_at INTEGER NOT NULL
    )
    "#,
];

/// Documents, chat sessions and their links in SQLite.
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub async fn open(path: &Path) -> Result<Self, RepositoryError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(sqlx::Error::Io)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    /// Private in-memory database; a single connection keeps it alive.
    pub async fn in_memory() -> Result<Self, RepositoryError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self, RepositoryError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }
}

fn timestamp(table: &'static str, seconds: i64) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::from_timestamp(seconds, 0).ok_or_else(|| RepositoryError::Corrupt {
        table,
        details: format!("timestamp out of range: {seconds}"),
    })
}

fn document_from_row(row: &SqliteRow) -> Result<Document, RepositoryError> {
    let size_bytes: i64 = row.try_get("size_bytes")?;
    Ok(Document {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        file_path: row.try_get("file_path")?,
        checksum: row.try_get("checksum")?,
        size_bytes: u64::try_from(size_bytes).map_err(|_| RepositoryError::Corrupt {
            table: "documents",
            details: format!("negative size_bytes: {size_bytes}"),
        })?,
        extracted_text: row.try_get("extracted_text")?,
        uploaded_at: timestamp("documents", row.try_get("uploaded_at")?)?,
    })
}

const DOCUMENT_COLUMNS: &str =
    "d.id, d.title, d.file_path, d.checksum, d.size_bytes, d.extracted_text, d.uploaded_at";

async fn insert_document_row(
    conn: &mut SqliteConnection,
    document: NewDocument,
) -> Result<Document, RepositoryError> {
    let size_bytes =
        i64::try_from(document.size_bytes).map_err(|_| RepositoryError::InvalidValue {
            field: "size_bytes",
            details: format!("{} does not fit in an INTEGER column", document.size_bytes),
        })?;
    let uploaded_at = Utc::now().timestamp();

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO documents (title, file_path, checksum, size_bytes, extracted_text, uploaded_at)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(&document.title)
    .bind(&document.file_path)
    .bind(&document.checksum)
    .bind(size_bytes)
    .bind(&document.extracted_text)
    .bind(uploaded_at)
    .fetch_one(&mut *conn)
    .await?;

    Ok(Document {
        id,
        title: document.title,
        file_path: document.file_path,
        checksum: document.checksum,
        size_bytes: document.size_bytes,
        extracted_text: document.extracted_text,
        uploaded_at: timestamp("documents", uploaded_at)?,
    })
}

async fn insert_chat_row(
    conn: &mut SqliteConnection,
    title: &str,
) -> Result<ChatSession, RepositoryError> {
    let created_at = Utc::now().timestamp();
    let id: i64 =
        sqlx::query_scalar("INSERT INTO chats (title, created_at) VALUES (?, ?) RETURNING id")
            .bind(title)
            .bind(created_at)
            .fetch_one(&mut *conn)
            .await?;

    Ok(ChatSession {
        id,
        title: title.to_string(),
        created_at: timestamp("chats", created_at)?,
    })
}

async fn upsert_link_row(
    conn: &mut SqliteConnection,
    chat_id: i64,
    document_id: i64,
) -> Result<ChatDocumentLink, RepositoryError> {
    let created_at = Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO chat_document_links (chat_id, document_id, created_at)
        VALUES (?, ?, ?)
        ON CONFLICT(chat_id) DO UPDATE SET
            document_id = excluded.document_id,
            created_at = excluded.created_at
        "#,
    )
    .bind(chat_id)
    .bind(document_id)
    .bind(created_at)
    .execute(&mut *conn)
    .await?;

    Ok(ChatDocumentLink {
        chat_id,
        document_id,
        created_at: timestamp("chat_document_links", created_at)?,
    })
}

#[async_trait]
impl DocumentRepository for SqliteRepository {
    async fn insert_document(&self, document: NewDocument) -> Result<Document, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        insert_document_row(&mut *conn, document).await
    }

    async fn insert_document_with_chat(
        &self,
        document: NewDocument,
    ) -> Result<(Document, ChatSession), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let document = insert_document_row(&mut *tx, document).await?;
        let chat = insert_chat_row(&mut *tx, &document.title).await?;
        upsert_link_row(&mut *tx, chat.id, document.id).await?;

        tx.commit().await?;
        Ok((document, chat))
    }

    async fn get_document(&self, id: i64) -> Result<Option<Document>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {DOCUMENT_COLUMNS} FROM documents d WHERE d.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(document_from_row).transpose()
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT d.id, d.title, d.file_path, d.uploaded_at,
                   (SELECT l.chat_id FROM chat_document_links l
                    WHERE l.document_id = d.id
                    ORDER BY l.chat_id LIMIT 1) AS linked_chat_id
            FROM documents d
            ORDER BY d.uploaded_at DESC, d.id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<DocumentSummary, RepositoryError> {
                Ok(DocumentSummary {
                    id: row.try_get("id")?,
                    title: row.try_get("title")?,
                    file_path: row.try_get("file_path")?,
                    uploaded_at: timestamp("documents", row.try_get("uploaded_at")?)?,
                    linked_chat_id: row.try_get("linked_chat_id")?,
                })
            })
            .collect()
    }

    async fn delete_document(&self, id: i64) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chat_document_links WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn create_chat(&self, title: &str) -> Result<ChatSession, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        insert_chat_row(&mut *conn, title).await
    }

    async fn link_chat(
        &self,
        chat_id: i64,
        document_id: i64,
    ) -> Result<ChatDocumentLink, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        upsert_link_row(&mut *conn, chat_id, document_id).await
    }

    async fn linked_document(&self, chat_id: i64) -> Result<Option<Document>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM chat_document_links l \
             JOIN documents d ON d.id = l.document_id WHERE l.chat_id = ?"
        ))
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(document_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteRepository;
    use crate::error::RepositoryError;
    use crate::models::NewDocument;
    use crate::traits::DocumentRepository;

    fn new_document(title: &str, text: &str) -> NewDocument {
        NewDocument {
            title: title.to_string(),
            file_path: format!("documents/{title}"),
            checksum: "c0ffee".to_string(),
            size_bytes: text.len() as u64,
            extracted_text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn documents_round_trip_through_sqlite() {
        let repository = SqliteRepository::in_memory().await.unwrap();
        let stored = repository
            .insert_document(new_document("notes.txt", "meeting notes"))
            .await
            .unwrap();

        let loaded = repository.get_document(stored.id).await.unwrap();
        assert_eq!(loaded, Some(stored));
        assert_eq!(repository.get_document(999).await.unwrap(), None);
    }

    #[tokio::test]
    async fn listing_is_newest_first_with_linked_chat() {
        let repository = SqliteRepository::in_memory().await.unwrap();
        let first = repository
            .insert_document(new_document("a.txt", "a"))
            .await
            .unwrap();
        let second = repository
            .insert_document(new_document("b.txt", "b"))
            .await
            .unwrap();
        let chat = repository.create_chat("b.txt").await.unwrap();
        repository.link_chat(chat.id, second.id).await.unwrap();

        let listed = repository.list_documents().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[0].linked_chat_id, Some(chat.id));
        assert_eq!(listed[1].id, first.id);
        assert_eq!(listed[1].linked_chat_id, None);
    }

    #[tokio::test]
    async fn relinking_a_chat_replaces_its_document() {
        let repository = SqliteRepository::in_memory().await.unwrap();
        let first = repository
            .insert_document(new_document("a.txt", "a"))
            .await
            .unwrap();
        let second = repository
            .insert_document(new_document("b.txt", "b"))
            .await
            .unwrap();
        let chat = repository.create_chat("chat").await.unwrap();

        repository.link_chat(chat.id, first.id).await.unwrap();
        repository.link_chat(chat.id, second.id).await.unwrap();

        let linked = repository.linked_document(chat.id).await.unwrap();
        assert_eq!(linked.map(|document| document.title), Some("b.txt".to_string()));
    }

    #[tokio::test]
    async fn document_with_chat_is_stored_linked() {
        let repository = SqliteRepository::in_memory().await.unwrap();
        let (document, chat) = repository
            .insert_document_with_chat(new_document("report.pdf", "q3 numbers"))
            .await
            .unwrap();

        assert_eq!(chat.title, "report.pdf");
        let linked = repository.linked_document(chat.id).await.unwrap();
        assert_eq!(linked, Some(document));
    }

    #[tokio::test]
    async fn failed_chat_insert_leaves_no_document_behind() {
        let repository = SqliteRepository::in_memory().await.unwrap();
        sqlx::query("DROP TABLE chat_document_links")
            .execute(&repository.pool)
            .await
            .unwrap();
        sqlx::query("DROP TABLE chats")
            .execute(&repository.pool)
            .await
            .unwrap();

        let result = repository
            .insert_document_with_chat(new_document("report.pdf", "q3 numbers"))
            .await;

        assert!(result.is_err());
        let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&repository.pool)
            .await
            .unwrap();
        assert_eq!(documents, 0);
    }

    #[tokio::test]
    async fn oversized_document_size_is_rejected() {
        let repository = SqliteRepository::in_memory().await.unwrap();
        let mut document = new_document("huge.txt", "x");
        document.size_bytes = u64::MAX;

        let result = repository.insert_document(document).await;

        assert!(matches!(
            result,
            Err(RepositoryError::InvalidValue {
                field: "size_bytes",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn deleting_a_document_removes_its_links() {
        let repository = SqliteRepository::in_memory().await.unwrap();
        let document = repository
            .insert_document(new_document("a.txt", "a"))
            .await
            .unwrap();
        let chat = repository.create_chat("a.txt").await.unwrap();
        repository.link_chat(chat.id, document.id).await.unwrap();

        assert!(repository.delete_document(document.id).await.unwrap());
        assert!(!repository.delete_document(document.id).await.unwrap());
        assert_eq!(repository.linked_document(chat.id).await.unwrap(), None);
    }
}
