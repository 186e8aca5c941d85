//! Validation and default-filling for the raw declaration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex_lite::Regex;
use tracing::warn;

use super::error::DatabaseError;
use super::raw::{RawDatabase, RawEpisode, RawPattern, RawSeason, RawShow, RawTorrent, Scalar};
use super::types::{
    Database, Directories, Episode, EpisodeNumber, EpisodePattern, EpisodeSpec, Quarter, Season,
    Show, ShowStatus, Torrent, YearQuarter,
};

static HASH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{40}$").expect("Invalid torrent hash regex"));

/// Turns a [`RawDatabase`] into a validated [`Database`].
#[derive(Debug, Clone, Default)]
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// Whether `hash` is a lowercase 40 character hex torrent hash.
    pub fn is_valid_hash(&self, hash: &str) -> bool {
        HASH_PATTERN.is_match(hash)
    }

    /// Validates the whole declaration.
    pub fn normalize(&self, raw: RawDatabase) -> Result<Database, DatabaseError> {
        let directories = raw
            .directories
            .ok_or_else(|| DatabaseError::missing("directories"))?;
        let shows = raw.shows.ok_or_else(|| DatabaseError::missing("shows"))?;
        let torrents = raw
            .torrents
            .ok_or_else(|| DatabaseError::missing("torrents"))?;

        let directories = normalize_directories(directories)?;
        let shows = normalize_shows(shows)?;

        let mut normalized = BTreeMap::new();
        for (hash, torrent) in torrents {
            let torrent = self.normalize_torrent(&hash, torrent, &shows, &directories)?;
            normalized.insert(hash, torrent);
        }

        Ok(Database {
            directories,
            shows,
            torrents: normalized,
        })
    }

    fn normalize_torrent(
        &self,
        hash: &str,
        raw: RawTorrent,
        shows: &BTreeMap<String, Show>,
        directories: &Directories,
    ) -> Result<Torrent, DatabaseError> {
        if !self.is_valid_hash(hash) {
            return Err(DatabaseError::InvalidHash {
                hash: hash.to_string(),
            });
        }

        let source = raw
            .source
            .map(|s| s.to_string())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| DatabaseError::missing(format!("torrents.{}.source", hash)))?;

        let raw_episodes = raw
            .episodes
            .ok_or_else(|| DatabaseError::missing(format!("torrents.{}.episodes", hash)))?;
        if raw_episodes.is_empty() {
            return Err(DatabaseError::invalid(
                format!("torrents.{}.episodes", hash),
                "episode list is empty",
            ));
        }

        let mut episodes = Vec::with_capacity(raw_episodes.len());
        for (i, episode) in raw_episodes.into_iter().enumerate() {
            let spec = match episode.pattern {
                Some(pattern) => normalize_pattern(hash, i, pattern, shows)?,
                None => normalize_episode(hash, i, episode, shows)?,
            };
            episodes.push(spec);
        }

        let location = raw
            .location
            .map(|l| resolve_dir(&directories.media, &l));

        Ok(Torrent {
            hash: hash.to_string(),
            source,
            location,
            archived: raw.archived,
            episodes,
        })
    }
}

fn resolve_dir(media: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        media.join(path)
    }
}

fn normalize_directories(raw: BTreeMap<String, String>) -> Result<Directories, DatabaseError> {
    let mut media = PathBuf::from(".");
    let mut named = BTreeMap::new();

    for (key, value) in raw {
        if value.trim().is_empty() {
            return Err(DatabaseError::invalid(
                format!("directories.{}", key),
                "path is empty",
            ));
        }
        if key == "media" {
            media = PathBuf::from(value);
        } else {
            named.insert(key, value);
        }
    }

    let mut dirs = Directories::with_media(&media);
    for (key, value) in named {
        let path = resolve_dir(&media, &value);
        match key.as_str() {
            "trash" => dirs.trash = path,
            "torrents" => dirs.torrents = path,
            other => match ShowStatus::from_key(other) {
                Some(ShowStatus::InProgress) => dirs.in_progress = path,
                Some(ShowStatus::Archived) => dirs.archived = path,
                Some(ShowStatus::RainyDay) => dirs.rainy_day = path,
                None => warn!("Ignoring unknown directory {:?}", other),
            },
        }
    }

    Ok(dirs)
}

fn normalize_shows(
    raw: BTreeMap<String, Vec<RawShow>>,
) -> Result<BTreeMap<String, Show>, DatabaseError> {
    let mut shows = BTreeMap::new();

    for (key, list) in raw {
        let status = ShowStatus::from_key(&key).ok_or_else(|| {
            DatabaseError::invalid(
                format!("shows.{}", key),
                "not one of in_progress, archived, rainy_day",
            )
        })?;

        for (i, show) in list.into_iter().enumerate() {
            let field = format!("shows.{}[{}]", key, i);
            let show = normalize_show(&field, status, show)?;
            if shows.contains_key(&show.title) {
                return Err(DatabaseError::DuplicateShow { title: show.title });
            }
            shows.insert(show.title.clone(), show);
        }
    }

    Ok(shows)
}

fn normalize_show(field: &str, status: ShowStatus, raw: RawShow) -> Result<Show, DatabaseError> {
    let title = raw
        .title
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| DatabaseError::missing(format!("{}.title", field)))?;
    let raw_seasons = raw
        .seasons
        .ok_or_else(|| DatabaseError::missing(format!("{}.seasons", field)))?;
    if raw_seasons.is_empty() {
        return Err(DatabaseError::invalid(
            format!("{}.seasons", field),
            format!("show {:?} needs at least one season", title),
        ));
    }

    let mut seasons = Vec::with_capacity(raw_seasons.len());
    for (i, season) in raw_seasons.into_iter().enumerate() {
        let field = format!("{}.seasons[{}]", field, i);
        seasons.push(normalize_season(&field, &title, i as u32 + 1, season)?);
    }

    Ok(Show {
        title,
        status,
        seasons,
    })
}

fn normalize_season(
    field: &str,
    show: &str,
    index: u32,
    raw: RawSeason,
) -> Result<Season, DatabaseError> {
    let year = raw
        .year
        .ok_or_else(|| DatabaseError::missing(format!("{}.year", field)))?;
    let year = year
        .as_int()
        .and_then(|y| u32::try_from(y).ok())
        .ok_or_else(|| {
            DatabaseError::invalid(format!("{}.year", field), format!("invalid year {:?}", year.to_string()))
        })?;

    let name = raw
        .season
        .ok_or_else(|| DatabaseError::missing(format!("{}.season", field)))?;
    let quarter =
        Quarter::from_season_name(&name).ok_or_else(|| DatabaseError::UnknownSeasonName {
            show: show.to_string(),
            name: name.clone(),
        })?;

    let episode_count = match raw.episodes {
        Some(count) => Some(
            count
                .as_int()
                .and_then(|c| u32::try_from(c).ok())
                .filter(|c| *c > 0)
                .ok_or_else(|| {
                    DatabaseError::invalid(
                        format!("{}.episodes", field),
                        format!("invalid episode count {:?}", count.to_string()),
                    )
                })?,
        ),
        None => None,
    };

    Ok(Season {
        index,
        title: raw.title.filter(|t| !t.trim().is_empty()),
        aired: YearQuarter::new(year, quarter),
        episode_count,
    })
}

fn season_number(field: String, value: Option<Scalar>) -> Result<u32, DatabaseError> {
    match value {
        None => Ok(1),
        Some(v) => v
            .as_int()
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n > 0)
            .ok_or_else(|| DatabaseError::invalid(field, format!("invalid season number {:?}", v.to_string()))),
    }
}

fn check_season(
    hash: &str,
    show: &str,
    season: u32,
    shows: &BTreeMap<String, Show>,
) -> Result<(), DatabaseError> {
    let declared = shows.get(show).ok_or_else(|| DatabaseError::UnknownShow {
        hash: hash.to_string(),
        show: show.to_string(),
    })?;
    if declared.season(season).is_none() {
        return Err(DatabaseError::UnknownSeason {
            hash: hash.to_string(),
            show: show.to_string(),
            season,
            available: declared.seasons.len(),
        });
    }
    Ok(())
}

fn normalize_episode(
    hash: &str,
    index: usize,
    raw: RawEpisode,
    shows: &BTreeMap<String, Show>,
) -> Result<EpisodeSpec, DatabaseError> {
    let field = format!("torrents.{}.episodes[{}]", hash, index);
    let show = raw
        .show
        .ok_or_else(|| DatabaseError::missing(format!("{}.show", field)))?;
    let season = season_number(format!("{}.season", field), raw.season)?;
    check_season(hash, &show, season, shows)?;

    let number = match raw.episode {
        None => EpisodeNumber::Number(1),
        Some(Scalar::Int(n)) => EpisodeNumber::Number(u32::try_from(n).map_err(|_| {
            DatabaseError::invalid(format!("{}.episode", field), format!("invalid episode number {}", n))
        })?),
        Some(other) => EpisodeNumber::parse(&other.to_string()),
    };

    Ok(EpisodeSpec::Single(Episode {
        show,
        season,
        number,
        alt: raw.alt.map(|a| a.to_string()),
        file: raw.file.map(PathBuf::from),
    }))
}

fn normalize_pattern(
    hash: &str,
    index: usize,
    raw: RawPattern,
    shows: &BTreeMap<String, Show>,
) -> Result<EpisodeSpec, DatabaseError> {
    let field = format!("torrents.{}.episodes[{}].pattern", hash, index);
    let source = raw
        .regex
        .ok_or_else(|| DatabaseError::missing(format!("{}.regex", field)))?;
    let regex = Regex::new(&source).map_err(|e| DatabaseError::InvalidPattern {
        hash: hash.to_string(),
        reason: e.to_string(),
    })?;
    let show = raw
        .show
        .ok_or_else(|| DatabaseError::missing(format!("{}.show", field)))?;
    let season = season_number(format!("{}.season", field), raw.season)?;
    check_season(hash, &show, season, shows)?;

    Ok(EpisodeSpec::Pattern(EpisodePattern {
        show,
        regex,
        season,
        alt: raw.alt.map(|a| a.to_string()),
        season_offset: raw.season_offset.unwrap_or(0),
        episode_offset: raw.episode_offset.unwrap_or(0),
    }))
}
