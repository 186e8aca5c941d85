//! Normalized, fully-resolved declaration.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

/// Library status of a show, which decides the directory its links live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowStatus {
    InProgress,
    Archived,
    RainyDay,
}

impl ShowStatus {
    /// All statuses, in declaration order.
    pub const ALL: [ShowStatus; 3] = [
        ShowStatus::InProgress,
        ShowStatus::Archived,
        ShowStatus::RainyDay,
    ];

    /// Parses a status key as written in the declaration.
    ///
    /// Both `in_progress` and `in progress` spellings are accepted.
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_lowercase().replace(' ', "_").as_str() {
            "in_progress" => Some(ShowStatus::InProgress),
            "archived" => Some(ShowStatus::Archived),
            "rainy_day" => Some(ShowStatus::RainyDay),
            _ => None,
        }
    }

    /// Returns the canonical key.
    pub fn as_str(&self) -> &'static str {
        match self {
            ShowStatus::InProgress => "in_progress",
            ShowStatus::Archived => "archived",
            ShowStatus::RainyDay => "rainy_day",
        }
    }

    /// Directory name used when the declaration does not name one.
    pub fn default_dir(&self) -> &'static str {
        match self {
            ShowStatus::InProgress => "In Progress",
            ShowStatus::Archived => "Archived",
            ShowStatus::RainyDay => "Rainy Day",
        }
    }
}

impl fmt::Display for ShowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Managed directories, all resolved against the media root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directories {
    pub media: PathBuf,
    pub trash: PathBuf,
    pub torrents: PathBuf,
    pub in_progress: PathBuf,
    pub archived: PathBuf,
    pub rainy_day: PathBuf,
}

impl Directories {
    /// Directories rooted at `media` using the default names.
    pub fn with_media(media: impl Into<PathBuf>) -> Self {
        let media = media.into();
        Self {
            trash: media.join(".Trash"),
            torrents: media.join(".Torrents"),
            in_progress: media.join(ShowStatus::InProgress.default_dir()),
            archived: media.join(ShowStatus::Archived.default_dir()),
            rainy_day: media.join(ShowStatus::RainyDay.default_dir()),
            media,
        }
    }

    /// Directory holding links for shows with the given status.
    pub fn status_dir(&self, status: ShowStatus) -> &Path {
        match status {
            ShowStatus::InProgress => &self.in_progress,
            ShowStatus::Archived => &self.archived,
            ShowStatus::RainyDay => &self.rainy_day,
        }
    }

    /// Every managed directory except the media root.
    pub fn managed(&self) -> Vec<&Path> {
        vec![
            &self.trash,
            &self.torrents,
            &self.in_progress,
            &self.archived,
            &self.rainy_day,
        ]
    }

    /// Expresses `path` relative to the media root when it lies under it.
    pub fn relative_to_media(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.media) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => path.to_path_buf(),
        }
    }

    /// Inverse of [`Directories::relative_to_media`].
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.media.join(path)
    }
}

/// Calendar quarter a season aired in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Quarter {
    Q1,
    Q2,
    Q3,
    Q4,
}

impl Quarter {
    /// Maps a yearly season name to its quarter.
    pub fn from_season_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "winter" => Some(Quarter::Q1),
            "spring" => Some(Quarter::Q2),
            "summer" => Some(Quarter::Q3),
            "fall" => Some(Quarter::Q4),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Quarter::Q1 => "q1",
            Quarter::Q2 => "q2",
            Quarter::Q3 => "q3",
            Quarter::Q4 => "q4",
        }
    }
}

/// Year and quarter, ordered chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearQuarter {
    pub year: u32,
    pub quarter: Quarter,
}

impl YearQuarter {
    pub fn new(year: u32, quarter: Quarter) -> Self {
        Self { year, quarter }
    }
}

impl fmt::Display for YearQuarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{}", self.year, self.quarter.as_str())
    }
}

/// One season of a show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Season {
    /// 1-based position within the show.
    pub index: u32,
    pub title: Option<String>,
    pub aired: YearQuarter,
    /// Declared total number of episodes, if known.
    pub episode_count: Option<u32>,
}

/// A show and its seasons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Show {
    pub title: String,
    pub status: ShowStatus,
    pub seasons: Vec<Season>,
}

impl Show {
    /// Looks up a season by its 1-based index.
    pub fn season(&self, index: u32) -> Option<&Season> {
        if index == 0 {
            return None;
        }
        self.seasons.get(index as usize - 1)
    }

    pub fn is_multi_season(&self) -> bool {
        self.seasons.len() > 1
    }
}

/// Episode identifier: a number, or free text for specials.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EpisodeNumber {
    Number(u32),
    Special(String),
}

impl EpisodeNumber {
    /// Parses a captured or declared value, preferring a number.
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        match trimmed.parse::<u32>() {
            Ok(n) => EpisodeNumber::Number(n),
            Err(_) => EpisodeNumber::Special(trimmed.to_string()),
        }
    }
}

impl fmt::Display for EpisodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpisodeNumber::Number(n) => write!(f, "{}", n),
            EpisodeNumber::Special(s) => f.write_str(s),
        }
    }
}

/// A single episode a torrent provides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Episode {
    /// Title of the owning show.
    pub show: String,
    /// 1-based season index.
    pub season: u32,
    pub number: EpisodeNumber,
    pub alt: Option<String>,
    /// Path of the episode's file below the torrent's top-level name.
    pub file: Option<PathBuf>,
}

/// Rule generating episodes from a torrent's file listing.
#[derive(Debug, Clone)]
pub struct EpisodePattern {
    pub show: String,
    pub regex: Regex,
    /// Season used when the regex has no `season` capture.
    pub season: u32,
    /// Alt label used when the regex has no `alt` capture.
    pub alt: Option<String>,
    pub season_offset: i64,
    pub episode_offset: i64,
}

impl EpisodePattern {
    /// Matches a file path and builds the episode it stands for.
    ///
    /// `file` is the path below the torrent's top-level name, or `None` for a
    /// single-file torrent whose only file is `display`.
    pub fn expand(&self, display: &str, file: Option<PathBuf>) -> Option<Episode> {
        let caps = self.regex.captures(display)?;
        let number = caps.name("episode").map(|m| EpisodeNumber::parse(m.as_str()))?;
        let number = match number {
            EpisodeNumber::Number(n) => {
                let shifted = i64::from(n) + self.episode_offset;
                EpisodeNumber::Number(u32::try_from(shifted).ok()?)
            }
            special => special,
        };

        let season = match caps.name("season") {
            Some(m) => {
                let captured: i64 = m.as_str().trim().parse().ok()?;
                u32::try_from(captured + self.season_offset).ok()?
            }
            None => self.season,
        };

        let alt = caps
            .name("alt")
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| self.alt.clone());

        Some(Episode {
            show: self.show.clone(),
            season,
            number,
            alt,
            file,
        })
    }
}

impl PartialEq for EpisodePattern {
    fn eq(&self, other: &Self) -> bool {
        self.show == other.show
            && self.regex.as_str() == other.regex.as_str()
            && self.season == other.season
            && self.alt == other.alt
            && self.season_offset == other.season_offset
            && self.episode_offset == other.episode_offset
    }
}

/// What a torrent contributes: one episode, or a pattern over its files.
#[derive(Debug, Clone, PartialEq)]
pub enum EpisodeSpec {
    Single(Episode),
    Pattern(EpisodePattern),
}

impl EpisodeSpec {
    /// Show and season this entry is anchored on.
    pub fn anchor(&self) -> (&str, u32) {
        match self {
            EpisodeSpec::Single(e) => (&e.show, e.season),
            EpisodeSpec::Pattern(p) => (&p.show, p.season),
        }
    }
}

/// A torrent declared in the library.
#[derive(Debug, Clone, PartialEq)]
pub struct Torrent {
    pub hash: String,
    pub source: String,
    /// Explicit download location; overrides the bucket when set.
    pub location: Option<PathBuf>,
    /// `Some(true)` keeps it stopped, `Some(false)` keeps it seeding,
    /// `None` leaves it to the liveness heuristic.
    pub archived: Option<bool>,
    pub episodes: Vec<EpisodeSpec>,
}

impl Torrent {
    pub fn has_patterns(&self) -> bool {
        self.episodes
            .iter()
            .any(|e| matches!(e, EpisodeSpec::Pattern(_)))
    }
}

/// The whole validated declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Database {
    pub directories: Directories,
    /// Shows keyed by title.
    pub shows: BTreeMap<String, Show>,
    /// Torrents keyed by hash.
    pub torrents: BTreeMap<String, Torrent>,
}

impl Database {
    /// A database with no shows or torrents.
    pub fn empty(directories: Directories) -> Self {
        Self {
            directories,
            shows: BTreeMap::new(),
            torrents: BTreeMap::new(),
        }
    }

    pub fn show(&self, title: &str) -> Option<&Show> {
        self.shows.get(title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_status_from_key() {
        assert_eq!(ShowStatus::from_key("in progress"), Some(ShowStatus::InProgress));
        assert_eq!(ShowStatus::from_key("in_progress"), Some(ShowStatus::InProgress));
        assert_eq!(ShowStatus::from_key("Rainy Day"), Some(ShowStatus::RainyDay));
        assert_eq!(ShowStatus::from_key("archived"), Some(ShowStatus::Archived));
        assert_eq!(ShowStatus::from_key("dropped"), None);
    }

    #[test]
    fn test_year_quarter_ordering_and_display() {
        let winter = YearQuarter::new(2019, Quarter::Q1);
        let summer = YearQuarter::new(2019, Quarter::Q3);
        let old = YearQuarter::new(999, Quarter::Q4);
        assert!(winter < summer);
        assert!(old < winter);
        assert_eq!(winter.to_string(), "2019q1");
        assert_eq!(old.to_string(), "0999q4");
    }

    #[test]
    fn test_directories_relative_to_media() {
        let dirs = Directories::with_media("/srv/anime");
        assert_eq!(
            dirs.relative_to_media(Path::new("/srv/anime/.Torrents/2019q1")),
            PathBuf::from(".Torrents/2019q1")
        );
        assert_eq!(
            dirs.relative_to_media(Path::new("/mnt/other")),
            PathBuf::from("/mnt/other")
        );
        assert_eq!(
            dirs.resolve(Path::new(".Torrents/2019q1")),
            PathBuf::from("/srv/anime/.Torrents/2019q1")
        );
        assert_eq!(dirs.resolve(Path::new("/mnt/other")), PathBuf::from("/mnt/other"));
    }

    #[test]
    fn test_pattern_expand_with_offsets() {
        let pattern = EpisodePattern {
            show: "Foo".to_string(),
            regex: Regex::new(r"S(?P<season>\d+)E(?P<episode>\d+)").unwrap(),
            season: 1,
            alt: Some("Dub".to_string()),
            season_offset: -1,
            episode_offset: -12,
        };

        let episode = pattern
            .expand("Foo S02E14.mkv", Some(PathBuf::from("Foo S02E14.mkv")))
            .unwrap();
        assert_eq!(episode.season, 1);
        assert_eq!(episode.number, EpisodeNumber::Number(2));
        assert_eq!(episode.alt.as_deref(), Some("Dub"));

        // Offsets that would go negative drop the file.
        assert!(pattern.expand("Foo S01E03.mkv", None).is_none());
        assert!(pattern.expand("readme.txt", None).is_none());
    }

    #[test]
    fn test_episode_number_parse() {
        assert_eq!(EpisodeNumber::parse("07"), EpisodeNumber::Number(7));
        assert_eq!(
            EpisodeNumber::parse(" OVA "),
            EpisodeNumber::Special("OVA".to_string())
        );
    }
}
