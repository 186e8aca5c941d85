//! Raw declaration as it appears in the YAML document.
//!
//! Every field is optional here so that the normalizer, not serde, decides
//! what is missing and reports it by name.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Top level of the declaration document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDatabase {
    pub directories: Option<BTreeMap<String, String>>,
    pub shows: Option<BTreeMap<String, Vec<RawShow>>>,
    pub torrents: Option<BTreeMap<String, RawTorrent>>,
}

impl RawDatabase {
    /// Parses a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        // An empty document is valid YAML but deserializes to unit.
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawShow {
    pub title: Option<String>,
    pub seasons: Option<Vec<RawSeason>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSeason {
    pub year: Option<Scalar>,
    pub season: Option<String>,
    pub title: Option<String>,
    pub episodes: Option<Scalar>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTorrent {
    pub source: Option<Scalar>,
    pub archived: Option<bool>,
    pub location: Option<String>,
    pub episodes: Option<Vec<RawEpisode>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEpisode {
    pub show: Option<String>,
    pub season: Option<Scalar>,
    pub episode: Option<Scalar>,
    pub alt: Option<Scalar>,
    pub file: Option<String>,
    pub pattern: Option<RawPattern>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPattern {
    pub regex: Option<String>,
    pub show: Option<String>,
    pub season: Option<Scalar>,
    pub alt: Option<Scalar>,
    pub season_offset: Option<i64>,
    pub episode_offset: Option<i64>,
}

/// A YAML scalar that may be written either as a number or as text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Interprets the value as an integer, accepting numeric strings.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Scalar::Int(i) => Some(*i),
            Scalar::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Scalar::Float(_) => None,
            Scalar::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_as_int() {
        assert_eq!(Scalar::Int(3).as_int(), Some(3));
        assert_eq!(Scalar::Text(" 12 ".to_string()).as_int(), Some(12));
        assert_eq!(Scalar::Float(2.0).as_int(), Some(2));
        assert_eq!(Scalar::Float(2.5).as_int(), None);
        assert_eq!(Scalar::Text("OVA".to_string()).as_int(), None);
    }

    #[test]
    fn test_parse_minimal_document() {
        let raw = RawDatabase::from_yaml(
            r#"
directories:
  media: /srv/anime
shows: {}
torrents:
  0123456789abcdef0123456789abcdef01234567:
    source: "magnet:?x"
    episodes:
      - show: Foo
        episode: OVA
"#,
        )
        .unwrap();

        assert_eq!(raw.directories.unwrap()["media"], "/srv/anime");
        let torrents = raw.torrents.unwrap();
        let torrent = &torrents["0123456789abcdef0123456789abcdef01234567"];
        let episodes = torrent.episodes.as_ref().unwrap();
        assert_eq!(episodes[0].episode, Some(Scalar::Text("OVA".to_string())));
        assert!(torrent.archived.is_none());
    }

    #[test]
    fn test_empty_document_has_no_fields() {
        let raw = RawDatabase::from_yaml("   \n").unwrap();
        assert!(raw.directories.is_none());
        assert!(raw.shows.is_none());
        assert!(raw.torrents.is_none());
    }
}
