//! Source reference parsing for catalog GUIDs.
//!
//! Every catalog item carries a GUID written by the metadata agent that
//! matched it, e.g. `com.plexapp.agents.themoviedb://603?lang=en`. The agent
//! tag decides which [`Scheme`] the embedded identifier belongs to and
//! therefore which resolution strategy turns it into an [`ImdbId`].

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Matches the three legacy agent tags. The tag may appear anywhere in the GUID.
#[allow(clippy::expect_used)]
static GUID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"agents\.imdb://(?P<imdb>tt[^?/]+)|agents\.themoviedb://(?P<tmdb>[^?/]+)|agents\.thetvdb://(?P<tvdb>[^?/]+)",
    )
    .expect("GUID regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static IMDB_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^tt\d+$").expect("IMDb id regex is valid"));

/// The agent that produced an item's source reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// IMDb agent; the reference already is the canonical identifier.
    Imdb,
    /// The Movie Database agent.
    Tmdb,
    /// TheTVDB agent.
    Tvdb,
}

impl Scheme {
    /// All known schemes in dispatch order.
    pub const ALL: [Scheme; 3] = [Scheme::Imdb, Scheme::Tmdb, Scheme::Tvdb];

    /// Stable lowercase name, used for logging and cache file names.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Imdb => "imdb",
            Self::Tmdb => "tmdb",
            Self::Tvdb => "tvdb",
        }
    }

    /// Agent identifier as stored in the catalog's `library_sections.agent` column.
    #[must_use]
    pub fn agent(self) -> &'static str {
        match self {
            Self::Imdb => "com.plexapp.agents.imdb",
            Self::Tmdb => "com.plexapp.agents.themoviedb",
            Self::Tvdb => "com.plexapp.agents.thetvdb",
        }
    }

    /// Maps a library agent back onto its scheme.
    #[must_use]
    pub fn from_agent(agent: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.agent() == agent)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed, scheme-tagged source reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceReference {
    /// Which agent produced the identifier.
    pub scheme: Scheme,
    /// The agent-local identifier (`tt0111161`, `603`, `81189`, ...).
    pub id: String,
}

impl SourceReference {
    /// Parses a catalog GUID. Returns `None` when no known agent tag is present.
    #[must_use]
    pub fn parse(guid: &str) -> Option<Self> {
        let caps = GUID_PATTERN.captures(guid)?;
        Scheme::ALL.into_iter().find_map(|scheme| {
            caps.name(scheme.as_str()).map(|m| Self {
                scheme,
                id: m.as_str().to_string(),
            })
        })
    }
}

impl fmt::Display for SourceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.id)
    }
}

/// Canonical rating-dataset key (`tt` followed by digits).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImdbId(String);

impl ImdbId {
    /// Validates and wraps an IMDb identifier.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        IMDB_ID_PATTERN
            .is_match(value)
            .then(|| Self(value.to_string()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ImdbId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid IMDb id '{value}'"))
    }
}

impl From<ImdbId> for String {
    fn from(value: ImdbId) -> Self {
        value.0
    }
}

impl fmt::Display for ImdbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_imdb_guid() {
        let parsed = SourceReference::parse("com.plexapp.agents.imdb://tt0111161?lang=en").unwrap();
        assert_eq!(parsed.scheme, Scheme::Imdb);
        assert_eq!(parsed.id, "tt0111161");
    }

    #[test]
    fn test_parse_tmdb_guid() {
        let parsed = SourceReference::parse("com.plexapp.agents.themoviedb://603?lang=de").unwrap();
        assert_eq!(parsed.scheme, Scheme::Tmdb);
        assert_eq!(parsed.id, "603");
    }

    #[test]
    fn test_parse_tvdb_guid_with_season_path() {
        let parsed = SourceReference::parse("com.plexapp.agents.thetvdb://81189/1/2?lang=en").unwrap();
        assert_eq!(parsed.scheme, Scheme::Tvdb);
        assert_eq!(parsed.id, "81189");
    }

    #[test]
    fn test_parse_keeps_non_numeric_ids_for_lookup() {
        let parsed = SourceReference::parse("com.plexapp.agents.themoviedb://tv-603?lang=en").unwrap();
        assert_eq!(parsed.scheme, Scheme::Tmdb);
        assert_eq!(parsed.id, "tv-603");

        let parsed = SourceReference::parse("com.plexapp.agents.thetvdb://abc12/1").unwrap();
        assert_eq!(parsed.scheme, Scheme::Tvdb);
        assert_eq!(parsed.id, "abc12");
    }

    #[test]
    fn test_parse_unknown_agent_returns_none() {
        assert!(SourceReference::parse("plex://movie/5d7768248718ba001e3120d4").is_none());
        assert!(SourceReference::parse("local://42").is_none());
        assert!(SourceReference::parse("").is_none());
    }

    #[test]
    fn test_parse_imdb_agent_without_tt_prefix_returns_none() {
        assert!(SourceReference::parse("com.plexapp.agents.imdb://0111161").is_none());
    }

    #[test]
    fn test_scheme_agent_round_trip() {
        for scheme in Scheme::ALL {
            assert_eq!(Scheme::from_agent(scheme.agent()), Some(scheme));
        }
        assert_eq!(Scheme::from_agent("tv.plex.agents.movie"), None);
    }

    #[test]
    fn test_imdb_id_validation() {
        assert!(ImdbId::parse("tt0133093").is_some());
        assert_eq!(ImdbId::parse(" tt1 ").unwrap().as_str(), "tt1");
        assert!(ImdbId::parse("0133093").is_none());
        assert!(ImdbId::parse("tt").is_none());
        assert!(ImdbId::parse("").is_none());
    }

    #[test]
    fn test_imdb_id_serde_rejects_invalid() {
        let ok: ImdbId = serde_json::from_str("\"tt42\"").unwrap();
        assert_eq!(ok.as_str(), "tt42");
        assert!(serde_json::from_str::<ImdbId>("\"nope\"").is_err());
    }
}
