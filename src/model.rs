//! Catalog entities shared by the catalog adapter, jobs and the pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dataset::{Rating, Score};
use crate::guid::{ImdbId, Scheme, SourceReference};

/// What a library holds. The discriminants match the catalog's
/// `section_type`/`metadata_type` codes for the top-level items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryKind {
    /// Movie library; items are movies.
    Movie,
    /// TV library; items are shows.
    Series,
}

impl LibraryKind {
    /// Catalog type code.
    #[must_use]
    pub fn type_code(self) -> i64 {
        match self {
            Self::Movie => 1,
            Self::Series => 2,
        }
    }

    /// Maps a catalog type code back onto a kind.
    #[must_use]
    pub fn from_type_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Movie),
            2 => Some(Self::Series),
            _ => None,
        }
    }
}

impl fmt::Display for LibraryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Movie => "Movie",
            Self::Series => "TV Series",
        })
    }
}

/// A catalog library section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    /// Section id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Movie or series.
    pub kind: LibraryKind,
    /// Scheme of the agent the library is matched with.
    pub scheme: Scheme,
    /// Number of top-level items at listing time.
    pub item_count: i64,
}

/// One catalog entry being synchronised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// `metadata_items.id`.
    pub id: i64,
    /// Title, for logs and reports only.
    #[serde(default)]
    pub title: String,
    /// Raw scheme-tagged source reference.
    pub guid: String,
    /// Bundle hash used to locate the item's Info.xml.
    #[serde(default)]
    pub hash: Option<String>,
    /// Canonical identifier, set by resolution.
    #[serde(default)]
    pub imdb_id: Option<ImdbId>,
    /// Stored audience rating.
    #[serde(default)]
    pub rating: Option<Score>,
    /// Stored vote count.
    #[serde(default)]
    pub votes: Option<u32>,
}

impl Item {
    /// Parses the item's GUID.
    #[must_use]
    pub fn source_reference(&self) -> Option<SourceReference> {
        SourceReference::parse(&self.guid)
    }

    /// True when the stored fields already equal `rating`: same score at one
    /// decimal and exactly the same vote count.
    #[must_use]
    pub fn matches(&self, rating: &Rating) -> bool {
        self.rating == Some(rating.score) && self.votes == Some(rating.votes)
    }

    /// Overwrites the stored fields with `rating`.
    pub fn apply(&mut self, rating: &Rating) {
        self.rating = Some(rating.score);
        self.votes = Some(rating.votes);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn item(rating: Option<u16>, votes: Option<u32>) -> Item {
        Item {
            id: 1,
            title: "Heat".to_string(),
            guid: "com.plexapp.agents.imdb://tt0113277?lang=en".to_string(),
            hash: None,
            imdb_id: None,
            rating: rating.map(|t| Score::from_tenths(t).unwrap()),
            votes,
        }
    }

    fn rating(tenths: u16, votes: u32) -> Rating {
        Rating {
            score: Score::from_tenths(tenths).unwrap(),
            votes,
        }
    }

    #[test]
    fn test_matches_requires_equal_score_and_votes() {
        assert!(item(Some(83), Some(700_000)).matches(&rating(83, 700_000)));
        assert!(!item(Some(83), Some(699_999)).matches(&rating(83, 700_000)));
        assert!(!item(Some(82), Some(700_000)).matches(&rating(83, 700_000)));
        assert!(!item(None, None).matches(&rating(83, 700_000)));
        assert!(!item(Some(83), None).matches(&rating(83, 700_000)));
    }

    #[test]
    fn test_apply_overwrites_fields() {
        let mut it = item(None, None);
        it.apply(&rating(71, 10));
        assert!(it.matches(&rating(71, 10)));
    }

    #[test]
    fn test_library_kind_type_codes() {
        assert_eq!(LibraryKind::from_type_code(1), Some(LibraryKind::Movie));
        assert_eq!(LibraryKind::from_type_code(2), Some(LibraryKind::Series));
        assert_eq!(LibraryKind::from_type_code(4), None);
        assert_eq!(LibraryKind::Series.type_code(), 2);
    }

    #[test]
    fn test_item_source_reference() {
        let parsed = item(None, None).source_reference().unwrap();
        assert_eq!(parsed.scheme, Scheme::Imdb);
        assert_eq!(parsed.id, "tt0113277");
    }
}
