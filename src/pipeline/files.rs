//! Concurrent rewrite of per-item `Info.xml` files.
//!
//! The working set is cut into at most [`LIST_PARTITIONS`] slices. Each slice
//! runs on the blocking pool as its own worker. Workers share only the
//! missing-file collector; every worker reports its own completed ids and, at
//! most, one unexpected error. The phase waits for all workers (bounded by a
//! timeout) before anything is merged, so one failing worker never hides the
//! writes of the others.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Duration;

use regex::Regex;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::catalog::RATING_IMAGE;
use crate::model::Item;

use super::FileUpdateError;

/// Maximum number of slices (and so of concurrent workers) per job.
pub const LIST_PARTITIONS: usize = 16;

/// Upper bound on how long the phase waits for its workers.
pub const DEFAULT_FILE_PHASE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// First element start tag: name, attributes, closing `>` or `/>`.
#[allow(clippy::expect_used)]
static ROOT_START_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<([A-Za-z_][\w:.\-]*)((?:\s+[^\s=/>]+\s*=\s*(?:"[^"]*"|'[^']*'))*)(\s*/?>)"#)
        .expect("root tag regex is valid")
});

/// One `name="value"` token of a start tag, with its leading whitespace.
/// Matched in sequence over the attribute list, so quoted values are always
/// consumed whole.
#[allow(clippy::expect_used)]
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(\s+)([^\s=/>]+)\s*=\s*(?:"[^"]*"|'[^']*')"#).expect("attribute regex is valid")
});

/// An item whose file was not on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingFile {
    /// Item id.
    pub item_id: i64,
    /// Item title.
    pub title: String,
    /// Expected location; `None` when the item has no bundle hash.
    pub path: Option<PathBuf>,
}

/// Merged result of all workers.
#[derive(Debug, Default)]
pub struct FilePhaseReport {
    /// Items whose file was rewritten.
    pub completed: Vec<i64>,
    /// Items whose file does not exist.
    pub missing: Vec<MissingFile>,
    /// First unexpected error, if any.
    pub error: Option<FileUpdateError>,
}

impl FilePhaseReport {
    /// Ids of every item the phase is finished with.
    pub fn settled_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.completed
            .iter()
            .copied()
            .chain(self.missing.iter().map(|m| m.item_id))
    }
}

#[derive(Debug, Default)]
struct SliceOutcome {
    completed: Vec<i64>,
    error: Option<FileUpdateError>,
}

enum FileWrite {
    Written,
    Missing(Option<PathBuf>),
}

/// Location of an item's combined `Info.xml`, derived from its bundle hash.
#[must_use]
pub fn info_xml_path(root: &Path, hash: &str) -> Option<PathBuf> {
    let mut chars = hash.chars();
    let first = chars.next()?;
    let rest = chars.as_str();
    if rest.is_empty() {
        return None;
    }
    Some(
        root.join(first.to_string())
            .join(format!("{rest}.bundle"))
            .join("Contents")
            .join("_combined")
            .join("Info.xml"),
    )
}

/// Sets `audienceRating` and `audienceRatingImage` on the first element of
/// `xml`, replacing existing values or inserting the attributes.
/// Returns `None` when the document has no element.
#[must_use]
pub fn rewrite_rating_attributes(xml: &str, rating: &str, image: &str) -> Option<String> {
    let caps = ROOT_START_TAG.captures(xml)?;
    let whole = caps.get(0)?;
    let attributes = set_attribute(&caps[2], "audienceRating", rating);
    let attributes = set_attribute(&attributes, "audienceRatingImage", image);

    let mut out = String::with_capacity(xml.len() + 64);
    out.push_str(&xml[..whole.start()]);
    out.push('<');
    out.push_str(&caps[1]);
    out.push_str(&attributes);
    out.push_str(&caps[3]);
    out.push_str(&xml[whole.end()..]);
    Some(out)
}

fn set_attribute(attributes: &str, name: &str, value: &str) -> String {
    let mut out = String::with_capacity(attributes.len() + name.len() + value.len() + 4);
    let mut copied = 0;
    let mut replaced = false;

    for caps in ATTRIBUTE.captures_iter(attributes) {
        let (Some(whole), Some(space), Some(key)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        if key.as_str() == name {
            out.push_str(&attributes[copied..whole.start()]);
            out.push_str(space.as_str());
            out.push_str(&format!("{name}=\"{value}\""));
            copied = whole.end();
            replaced = true;
            break;
        }
    }
    out.push_str(&attributes[copied..]);
    if !replaced {
        out.push_str(&format!(" {name}=\"{value}\""));
    }
    out
}

fn update_item_file(root: &Path, item: &Item) -> Result<FileWrite, FileUpdateError> {
    let Some(path) = item.hash.as_deref().and_then(|h| info_xml_path(root, h)) else {
        return Ok(FileWrite::Missing(None));
    };
    let Some(score) = item.rating else {
        debug!(item = item.id, "No rating to write");
        return Ok(FileWrite::Written);
    };

    let xml = match std::fs::read_to_string(&path) {
        Ok(xml) => xml,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(FileWrite::Missing(Some(path)));
        }
        Err(source) => return Err(FileUpdateError::Io { path, source }),
    };

    let rewritten = rewrite_rating_attributes(&xml, &score.to_string(), RATING_IMAGE)
        .ok_or_else(|| FileUpdateError::MalformedXml { path: path.clone() })?;

    let mut tmp = path.clone().into_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, rewritten).map_err(|source| FileUpdateError::Io {
        path: tmp.clone(),
        source,
    })?;
    std::fs::rename(&tmp, &path).map_err(|source| FileUpdateError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(FileWrite::Written)
}

fn process_slice(root: &Path, slice: &[Item], missing: &Mutex<Vec<MissingFile>>) -> SliceOutcome {
    let mut outcome = SliceOutcome::default();
    for item in slice {
        match update_item_file(root, item) {
            Ok(FileWrite::Written) => outcome.completed.push(item.id),
            Ok(FileWrite::Missing(path)) => {
                missing
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(MissingFile {
                        item_id: item.id,
                        title: item.title.clone(),
                        path,
                    });
            }
            Err(error) => {
                outcome.error = Some(error);
                break;
            }
        }
    }
    outcome
}

/// Chunk length that cuts `len` items into at most `slices` near-equal slices.
#[must_use]
pub fn slice_len(len: usize, slices: usize) -> usize {
    len.div_ceil(slices.max(1)).max(1)
}

/// Runs the file phase.
#[derive(Debug, Clone)]
pub struct FileUpdater {
    slices: usize,
    timeout: Duration,
}

impl Default for FileUpdater {
    fn default() -> Self {
        Self {
            slices: LIST_PARTITIONS,
            timeout: DEFAULT_FILE_PHASE_TIMEOUT,
        }
    }
}

impl FileUpdater {
    /// Overrides the slice count (at least 1).
    #[must_use]
    pub fn with_slices(mut self, slices: usize) -> Self {
        self.slices = slices.max(1);
        self
    }

    /// Overrides the bounded wait.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Rewrites the files of `items` below `root` and merges the worker results.
    #[instrument(skip_all, fields(items = items.len(), root = %root.display()))]
    pub async fn run(&self, root: &Path, items: &[Item]) -> FilePhaseReport {
        if items.is_empty() {
            return FilePhaseReport::default();
        }

        let root = Arc::new(root.to_path_buf());
        let missing = Arc::new(Mutex::new(Vec::new()));
        let mut workers = JoinSet::new();

        for slice in items.chunks(slice_len(items.len(), self.slices)) {
            let slice = slice.to_vec();
            let root = Arc::clone(&root);
            let missing = Arc::clone(&missing);
            workers.spawn_blocking(move || process_slice(&root, &slice, &missing));
        }
        debug!(workers = workers.len(), "Started file workers");

        let mut report = FilePhaseReport::default();
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            match tokio::time::timeout_at(deadline, workers.join_next()).await {
                Ok(None) => break,
                Ok(Some(Ok(outcome))) => {
                    report.completed.extend(outcome.completed);
                    if let Some(error) = outcome.error {
                        warn!(%error, "File worker failed");
                        report.error.get_or_insert(error);
                    }
                }
                Ok(Some(Err(join_error))) => {
                    warn!(error = %join_error, "File worker did not finish");
                    report
                        .error
                        .get_or_insert(FileUpdateError::WorkerPanicked(join_error.to_string()));
                }
                Err(_) => {
                    let pending = workers.len();
                    warn!(pending, "File workers exceeded the bounded wait");
                    report.error.get_or_insert(FileUpdateError::TimedOut {
                        timeout: self.timeout,
                        pending,
                    });
                    // Blocking workers cannot be cancelled; let them finish detached.
                    workers.detach_all();
                    break;
                }
            }
        }

        report.missing = std::mem::take(&mut *missing.lock().unwrap_or_else(PoisonError::into_inner));
        report
    }
}

/// Name of the missing-file report of one job.
#[must_use]
pub fn missing_report_name(run_id: Uuid, library_id: i64) -> String {
    format!("xml-error-{run_id}-{library_id}.log")
}

/// Writes one line per missing item to `path`.
///
/// # Errors
///
/// Returns the IO error if the report cannot be written.
pub async fn write_missing_report(path: &Path, missing: &[MissingFile]) -> std::io::Result<()> {
    let mut body = String::new();
    for entry in missing {
        match &entry.path {
            Some(path) => body.push_str(&path.display().to_string()),
            None => body.push_str(&format!("<no bundle hash> item {} ({})", entry.item_id, entry.title)),
        }
        body.push('\n');
    }
    tokio::fs::write(path, body).await
}
