//! Access to the media server's SQLite catalog.
//!
//! The catalog is owned by another process. It is opened per operation
//! through [`Catalog::connect`], used, and closed again so this tool holds
//! the file for as short a time as possible. Journal mode and schema are left
//! untouched.
//!
//! Tables read and written:
//! - `library_sections(id, name, section_type, agent)`
//! - `metadata_items(id, library_section_id, metadata_type, title, guid, hash,
//!   audience_rating, extra_data)`
//!
//! Vote counts live in the item's `extra_data` JSON under `at:imdbVotes`.
//! Rows whose `extra_data` holds anything other than a JSON object (older
//! servers store it URL-encoded) are never read into a job nor written.

mod error;

pub use error::{CatalogDbErrorKind, CatalogError};

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::{debug, instrument, warn};

use crate::dataset::Score;
use crate::guid::Scheme;
use crate::model::{Item, Library, LibraryKind};

/// How long a single statement waits on a foreign lock before reporting busy.
/// Kept short: the pipeline has its own, much longer, retry loop.
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(1);

/// Marker written next to the rating so the media server shows the IMDb badge.
pub const RATING_IMAGE: &str = "imdb://image.rating";

const SELECT_LIBRARIES: &str = r"
    SELECT ls.id, ls.name, ls.section_type, ls.agent,
           (SELECT COUNT(*) FROM metadata_items mi
             WHERE mi.library_section_id = ls.id
               AND mi.metadata_type = ls.section_type) AS item_count
      FROM library_sections ls
     WHERE ls.section_type IN (1, 2)
     ORDER BY ls.id";

const SELECT_ITEMS: &str = r#"
    SELECT id, title, guid, hash, audience_rating,
           CASE WHEN json_valid(extra_data)
                THEN json_extract(extra_data, '$."at:imdbVotes"') END AS votes,
           CASE WHEN extra_data IS NULL OR extra_data = '' THEN 1
                WHEN json_valid(extra_data) THEN json_type(extra_data) = 'object'
                ELSE 0 END AS extra_writable
      FROM metadata_items
     WHERE library_section_id = ? AND metadata_type = ?
     ORDER BY id"#;

// The guard in WHERE repeats `extra_writable`: the row may have changed
// between read and write.
const UPDATE_ITEM: &str = r#"
    UPDATE metadata_items
       SET audience_rating = ?,
           extra_data = json_set(
               COALESCE(NULLIF(extra_data, ''), '{}'),
               '$."at:audienceRatingImage"', ?,
               '$."at:imdbVotes"', ?)
     WHERE id = ?
       AND CASE WHEN extra_data IS NULL OR extra_data = '' THEN 1
                WHEN json_valid(extra_data) THEN json_type(extra_data) = 'object'
                ELSE 0 END"#;

/// Which libraries a cycle should consider.
#[derive(Debug, Clone, Default)]
pub struct LibraryFilter {
    /// Include movie libraries.
    pub movies: bool,
    /// Include series libraries.
    pub series: bool,
    /// Agent schemes whose libraries can be resolved.
    pub schemes: BTreeSet<Scheme>,
    /// Library ids excluded by the operator.
    pub ignored: BTreeSet<i64>,
}

impl LibraryFilter {
    /// Whether `library` passes the filter.
    #[must_use]
    pub fn accepts(&self, library: &Library) -> bool {
        let kind_enabled = match library.kind {
            LibraryKind::Movie => self.movies,
            LibraryKind::Series => self.series,
        };
        kind_enabled && self.schemes.contains(&library.scheme) && !self.ignored.contains(&library.id)
    }
}

/// Handle on the catalog database file.
#[derive(Debug, Clone)]
pub struct Catalog {
    path: PathBuf,
    busy_timeout: Duration,
}

impl Catalog {
    /// Catalog stored at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// Overrides how long statements wait on a foreign lock.
    #[must_use]
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    /// Opens a scoped connection. Close it with [`CatalogConnection::close`].
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Missing`] if the file does not exist and
    /// [`CatalogError::Database`] if it cannot be opened.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn connect(&self) -> Result<CatalogConnection, CatalogError> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Err(CatalogError::Missing(self.path.clone()));
        }

        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(false)
            .busy_timeout(self.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        debug!("Opened catalog connection");
        Ok(CatalogConnection { pool })
    }
}

/// An open, scoped catalog connection.
#[derive(Debug)]
pub struct CatalogConnection {
    pool: SqlitePool,
}

impl CatalogConnection {
    /// Lists libraries that pass `filter`.
    ///
    /// Sections with an unknown type or an agent outside the known schemes
    /// are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the query fails.
    #[instrument(skip_all)]
    pub async fn list_libraries(&self, filter: &LibraryFilter) -> Result<Vec<Library>, CatalogError> {
        let rows = sqlx::query(SELECT_LIBRARIES).fetch_all(&self.pool).await?;

        let mut libraries = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(library) = library_from_row(&row)? else {
                continue;
            };
            if filter.accepts(&library) {
                libraries.push(library);
            } else {
                debug!(library = library.id, name = %library.name, "Library filtered out");
            }
        }
        Ok(libraries)
    }

    /// Reads the top-level items of `library`.
    ///
    /// Items whose `extra_data` is not a JSON object are left out with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the query fails.
    #[instrument(skip_all, fields(library = library.id))]
    pub async fn library_items(&self, library: &Library) -> Result<Vec<Item>, CatalogError> {
        let rows = sqlx::query(SELECT_ITEMS)
            .bind(library.id)
            .bind(library.kind.type_code())
            .fetch_all(&self.pool)
            .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            if row.try_get::<i64, _>("extra_writable")? != 0 {
                items.push(item_from_row(row)?);
            } else {
                let id: i64 = row.try_get("id")?;
                warn!(item = id, "Skipping item whose extra_data is not JSON");
            }
        }
        Ok(items)
    }

    /// Writes the ratings of `items` in one transaction.
    ///
    /// Items without a rating are skipped, as are rows whose `extra_data` is
    /// not a JSON object; those are left exactly as found.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`]; use [`CatalogError::is_busy`] to
    /// tell a foreign lock apart from other failures.
    #[instrument(skip_all, fields(items = items.len()))]
    pub async fn batch_write(&self, items: &[Item]) -> Result<(), CatalogError> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0_usize;
        let mut untouched = 0_usize;

        for item in items {
            let (Some(score), Some(votes)) = (item.rating, item.votes) else {
                warn!(item = item.id, "Skipping item without a rating");
                continue;
            };
            let result = sqlx::query(UPDATE_ITEM)
                .bind(score.as_f64())
                .bind(RATING_IMAGE)
                .bind(i64::from(votes))
                .bind(item.id)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 0 {
                warn!(item = item.id, "Item gone or its extra_data is not JSON; left untouched");
                untouched += 1;
            } else {
                written += 1;
            }
        }

        tx.commit().await?;
        debug!(written, untouched, "Batch write committed");
        Ok(())
    }

    /// Closes the connection.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

fn library_from_row(row: &SqliteRow) -> Result<Option<Library>, CatalogError> {
    let section_type: i64 = row.try_get("section_type")?;
    let agent: Option<String> = row.try_get("agent")?;
    let (Some(kind), Some(scheme)) = (
        LibraryKind::from_type_code(section_type),
        agent.as_deref().and_then(Scheme::from_agent),
    ) else {
        return Ok(None);
    };

    Ok(Some(Library {
        id: row.try_get("id")?,
        name: row.try_get::<Option<String>, _>("name")?.unwrap_or_default(),
        kind,
        scheme,
        item_count: row.try_get("item_count")?,
    }))
}

fn item_from_row(row: &SqliteRow) -> Result<Item, CatalogError> {
    let rating: Option<f64> = row.try_get("audience_rating")?;
    let votes: Option<i64> = row.try_get("votes")?;

    Ok(Item {
        id: row.try_get("id")?,
        title: row.try_get::<Option<String>, _>("title")?.unwrap_or_default(),
        guid: row.try_get::<Option<String>, _>("guid")?.unwrap_or_default(),
        hash: row
            .try_get::<Option<String>, _>("hash")?
            .filter(|h| !h.is_empty()),
        imdb_id: None,
        rating: rating.and_then(Score::from_f64),
        votes: votes.and_then(|v| u32::try_from(v).ok()),
    })
}
