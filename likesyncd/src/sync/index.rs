use std::collections::HashSet;
use std::path::{Path, PathBuf};

use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqlitePool, migrate::Migrator};
use thiserror::Error;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One fully acquired and tagged track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRecord {
    pub id: String,
    pub title: String,
    pub artist: String,
    /// Resolved file location. `None` for rows written before paths were
    /// persisted; callers fall back to the naming convention.
    pub path: Option<PathBuf>,
    pub added_at: i64,
}

impl LocalRecord {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        path: Option<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            path,
            added_at: time::OffsetDateTime::now_utc().unix_timestamp(),
        }
    }
}

/// Durable id-keyed index of acquired tracks.
///
/// Every operation is a single statement, so a record is either fully
/// present or absent.
#[derive(Clone)]
pub struct LocalIndex {
    pool: SqlitePool,
}

impl LocalIndex {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn new(database_url: &str) -> Result<Self, IndexError> {
        let pool = SqlitePool::connect(database_url).await?;
        let index = Self { pool };
        index.init().await?;
        Ok(index)
    }

    pub async fn open(db_path: &Path) -> Result<Self, IndexError> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let index = Self { pool };
        index.init().await?;
        Ok(index)
    }

    pub async fn init(&self) -> Result<(), IndexError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub async fn contains(&self, id: &str) -> Result<bool, IndexError> {
        let row = sqlx::query("SELECT 1 FROM tracks WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Inserting an id that is already indexed leaves the stored row as is.
    pub async fn put(&self, record: &LocalRecord) -> Result<(), IndexError> {
        sqlx::query(
            "INSERT INTO tracks (id, title, artist, path, added_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&record.id)
        .bind(&record.title)
        .bind(&record.artist)
        .bind(record.path.as_ref().map(|p| p.to_string_lossy().into_owned()))
        .bind(record.added_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns whether a row was removed; a missing id is not an error.
    pub async fn delete(&self, id: &str) -> Result<bool, IndexError> {
        let result = sqlx::query("DELETE FROM tracks WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, id: &str) -> Result<Option<LocalRecord>, IndexError> {
        let row = sqlx::query("SELECT id, title, artist, path, added_at FROM tracks WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| record_from_row(&row)).transpose()
    }

    pub async fn list_all(&self) -> Result<Vec<LocalRecord>, IndexError> {
        let rows = sqlx::query(
            "SELECT id, title, artist, path, added_at FROM tracks ORDER BY added_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(record_from_row(&row)?);
        }
        Ok(out)
    }

    pub async fn list_ids(&self) -> Result<HashSet<String>, IndexError> {
        let rows = sqlx::query("SELECT id FROM tracks")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| row.try_get::<String, _>("id").map_err(IndexError::from))
            .collect()
    }

    /// Number of records pointing at `path`. Two liked tracks with the same
    /// title and artist resolve to one file.
    pub async fn count_with_path(&self, path: &Path) -> Result<usize, IndexError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tracks WHERE path = ?1")
            .bind(path.to_string_lossy().into_owned())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    pub async fn len(&self) -> Result<usize, IndexError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tracks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    pub async fn is_empty(&self) -> Result<bool, IndexError> {
        Ok(self.len().await? == 0)
    }
}

fn record_from_row(row: &SqliteRow) -> Result<LocalRecord, IndexError> {
    let path: Option<String> = row.try_get("path")?;
    Ok(LocalRecord {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        artist: row.try_get("artist")?,
        path: path.map(PathBuf::from),
        added_at: row.try_get("added_at")?,
    })
}

#[cfg(test)]
#[path = "index_tests.rs"]
mod tests;
