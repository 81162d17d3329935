//! Shared fixtures for integration tests: a media-server-shaped data
//! directory with a real SQLite catalog and metadata bundles.

#![allow(dead_code)]

pub mod socket_guard;

use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tempfile::TempDir;

use ratings_sync::pipeline::files::info_xml_path;
use ratings_sync::{Library, LibraryFilter, MetadataRoots, Scheme, SyncConfig};

pub const IMDB_AGENT: &str = "com.plexapp.agents.imdb";
pub const TMDB_AGENT: &str = "com.plexapp.agents.themoviedb";
pub const TVDB_AGENT: &str = "com.plexapp.agents.thetvdb";

const SCHEMA: &[&str] = &[
    "CREATE TABLE library_sections (
        id INTEGER PRIMARY KEY,
        name TEXT,
        section_type INTEGER,
        agent TEXT)",
    "CREATE TABLE metadata_items (
        id INTEGER PRIMARY KEY,
        library_section_id INTEGER,
        metadata_type INTEGER,
        title TEXT,
        guid TEXT,
        hash TEXT,
        audience_rating REAL,
        extra_data TEXT)",
];

/// A temporary media server data directory plus a work directory.
pub struct PlexFixture {
    _dir: TempDir,
    pub data_dir: PathBuf,
    pub work_dir: PathBuf,
    pub pool: SqlitePool,
}

impl PlexFixture {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("plex");
        let work_dir = dir.path().join("work");
        std::fs::create_dir_all(&work_dir).unwrap();

        let config = SyncConfig::new(&data_dir, &work_dir);
        let db_path = config.catalog_path();
        std::fs::create_dir_all(db_path.parent().unwrap()).unwrap();

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await.unwrap();
        }

        Self {
            _dir: dir,
            data_dir,
            work_dir,
            pool,
        }
    }

    pub fn config(&self) -> SyncConfig {
        SyncConfig::new(&self.data_dir, &self.work_dir)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.config().catalog_path()
    }

    pub fn roots(&self) -> MetadataRoots {
        MetadataRoots::under(&self.data_dir)
    }

    pub async fn add_library(&self, id: i64, name: &str, section_type: i64, agent: &str) {
        sqlx::query("INSERT INTO library_sections (id, name, section_type, agent) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(name)
            .bind(section_type)
            .bind(agent)
            .execute(&self.pool)
            .await
            .unwrap();
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn add_item(
        &self,
        id: i64,
        library: i64,
        metadata_type: i64,
        title: &str,
        guid: &str,
        hash: Option<&str>,
        rating: Option<f64>,
        votes: Option<u32>,
    ) {
        let extra_data = votes.map(|v| format!(r#"{{"at:imdbVotes":{v}}}"#));
        sqlx::query(
            "INSERT INTO metadata_items
                (id, library_section_id, metadata_type, title, guid, hash, audience_rating, extra_data)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(library)
        .bind(metadata_type)
        .bind(title)
        .bind(guid)
        .bind(hash)
        .bind(rating)
        .bind(extra_data)
        .execute(&self.pool)
        .await
        .unwrap();
    }

    pub async fn set_extra_data(&self, id: i64, extra_data: &str) {
        sqlx::query("UPDATE metadata_items SET extra_data = ? WHERE id = ?")
            .bind(extra_data)
            .bind(id)
            .execute(&self.pool)
            .await
            .unwrap();
    }

    pub async fn extra_data(&self, id: i64) -> Option<String> {
        sqlx::query("SELECT extra_data FROM metadata_items WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .unwrap()
            .get("extra_data")
    }

    /// `(audience_rating, votes, rating image)` of one item.
    pub async fn stored(&self, id: i64) -> (Option<f64>, Option<i64>, Option<String>) {
        let row = sqlx::query(
            r#"SELECT audience_rating,
                      json_extract(extra_data, '$."at:imdbVotes"') AS votes,
                      json_extract(extra_data, '$."at:audienceRatingImage"') AS image
                 FROM metadata_items WHERE id = ?"#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .unwrap();
        (
            row.get("audience_rating"),
            row.get("votes"),
            row.get("image"),
        )
    }

    /// Writes an Info.xml for a movie bundle and returns its path.
    pub fn write_movie_info(&self, hash: &str, xml: &str) -> PathBuf {
        let path = info_xml_path(&self.roots().movies, hash).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, xml).unwrap();
        path
    }

    /// Lists libraries through the crate's own catalog adapter.
    pub async fn libraries(&self, filter: &LibraryFilter) -> Vec<Library> {
        let connection = ratings_sync::Catalog::new(self.catalog_path())
            .connect()
            .await
            .unwrap();
        let libraries = connection.list_libraries(filter).await.unwrap();
        connection.close().await;
        libraries
    }
}

/// Filter accepting movies and series matched by the IMDb agent only.
pub fn imdb_only_filter() -> LibraryFilter {
    LibraryFilter {
        movies: true,
        series: true,
        schemes: [Scheme::Imdb].into(),
        ignored: Default::default(),
    }
}

pub fn movie_info_xml(title: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\" standalone=\"no\" ?>\n\
         <Movie ratingKey=\"1\" title=\"{title}\">\n  <Genre tag=\"Drama\" />\n</Movie>\n"
    )
}

/// Gzip-compressed ratings export with the real header line.
pub fn ratings_tsv_gz(rows: &[(&str, &str, u32)]) -> Vec<u8> {
    let mut tsv = String::from("tconst\taverageRating\tnumVotes\n");
    for (id, rating, votes) in rows {
        tsv.push_str(&format!("{id}\t{rating}\t{votes}\n"));
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(tsv.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

pub fn read_to_string(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}
