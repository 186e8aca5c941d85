//! Deterministic path derivation.
//!
//! Everything here is pure: the same declaration always yields the same
//! download buckets and link destinations.

use std::path::{Component, Path, PathBuf};

use crate::database::{Database, Directories, Episode, EpisodeNumber, Show, Torrent, YearQuarter};

/// Rendered in place of an extension that is not known yet.
pub const EXTENSION_PLACEHOLDER: &str = "$EXT$";

/// Earliest `(year, quarter)` among the seasons a torrent contributes to.
///
/// Pattern episodes count with their configured season. Returns `None` only
/// when no episode resolves to a declared season.
pub fn bucket_for(db: &Database, torrent: &Torrent) -> Option<YearQuarter> {
    torrent
        .episodes
        .iter()
        .filter_map(|spec| {
            let (title, season) = spec.anchor();
            db.show(title)?.season(season).map(|s| s.aired)
        })
        .min()
}

/// Download directory for a torrent: its override, or its bucket under the
/// torrents directory.
pub fn download_location(db: &Database, torrent: &Torrent) -> PathBuf {
    if let Some(location) = &torrent.location {
        return location.clone();
    }
    match bucket_for(db, torrent) {
        Some(bucket) => db.directories.torrents.join(bucket.to_string()),
        None => db.directories.torrents.clone(),
    }
}

/// Link path of an episode relative to its show's status directory, without
/// extension.
///
/// Layout is `Show[/Alt][/Season N[ - Title]]/Filename`; the season segment
/// only appears for multi-season shows. Returns `None` if the episode's
/// season is not declared on `show`.
pub fn link_path_for(show: &Show, episode: &Episode) -> Option<PathBuf> {
    let season = show.season(episode.season)?;
    let multi = show.is_multi_season();

    let mut path = PathBuf::from(&show.title);
    if let Some(alt) = &episode.alt {
        path.push(alt);
    }
    if multi {
        match &season.title {
            Some(title) => path.push(format!("Season {} - {}", season.index, title)),
            None => path.push(format!("Season {}", season.index)),
        }
    }

    let single_episode =
        season.episode_count == Some(1) && episode.number == EpisodeNumber::Number(1);
    let width = season
        .episode_count
        .map(|count| count.to_string().len())
        .unwrap_or(2);

    let filename = match (&season.title, multi) {
        (Some(subtitle), _) => {
            let base = format!("{} - {}", show.title, subtitle);
            match &episode.number {
                _ if single_episode => base,
                EpisodeNumber::Number(n) => format!("{} - {:0width$}", base, n, width = width),
                EpisodeNumber::Special(s) => format!("{} - {}", base, s),
            }
        }
        (None, false) => match &episode.number {
            _ if single_episode => show.title.clone(),
            EpisodeNumber::Number(n) => format!("{} - {:0width$}", show.title, n, width = width),
            EpisodeNumber::Special(s) => format!("{} - {}", show.title, s),
        },
        (None, true) => match &episode.number {
            _ if single_episode => format!("{} - s{}", show.title, season.index),
            EpisodeNumber::Number(n) => format!(
                "{} - s{}e{:0width$}",
                show.title,
                season.index,
                n,
                width = width
            ),
            EpisodeNumber::Special(s) => format!("{} - s{} {}", show.title, season.index, s),
        },
    };
    path.push(filename);

    Some(path)
}

/// Full link destination stem for an episode, relative to the media root
/// when the status directory lies under it.
pub fn link_destination(dirs: &Directories, show: &Show, episode: &Episode) -> Option<PathBuf> {
    let rel = link_path_for(show, episode)?;
    Some(dirs.relative_to_media(&dirs.status_dir(show.status).join(rel)))
}

/// Extension of a file name, if it has one.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_string())
}

/// Appends `.ext` to a stem without treating dots in the stem as an
/// existing extension.
pub fn with_extension(stem: &Path, extension: Option<&str>) -> PathBuf {
    let mut name = stem.as_os_str().to_os_string();
    name.push(".");
    name.push(extension.unwrap_or(EXTENSION_PLACEHOLDER));
    PathBuf::from(name)
}

/// Symlink target pointing at `target` from a link placed at `link`.
///
/// Both paths must be anchored the same way (both absolute, or both
/// relative to the same directory); otherwise `target` is returned as is.
pub fn relative_target(link: &Path, target: &Path) -> PathBuf {
    let parent = match link.parent() {
        Some(parent) => parent,
        None => return target.to_path_buf(),
    };
    if parent.is_absolute() != target.is_absolute() {
        return target.to_path_buf();
    }

    let from: Vec<Component> = parent
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    let to: Vec<Component> = target
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();

    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..from.len() {
        rel.push("..");
    }
    for component in &to[common..] {
        rel.push(component.as_os_str());
    }
    rel
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{
        EpisodePattern, EpisodeSpec, Quarter, Season, ShowStatus, YearQuarter,
    };
    use regex_lite::Regex;

    fn season(index: u32, title: Option<&str>, quarter: Quarter, count: Option<u32>) -> Season {
        Season {
            index,
            title: title.map(String::from),
            aired: YearQuarter::new(2019, quarter),
            episode_count: count,
        }
    }

    fn show(seasons: Vec<Season>) -> Show {
        Show {
            title: "Foo".to_string(),
            status: ShowStatus::InProgress,
            seasons,
        }
    }

    fn episode(season: u32, number: EpisodeNumber) -> Episode {
        Episode {
            show: "Foo".to_string(),
            season,
            number,
            alt: None,
            file: None,
        }
    }

    fn path(show: &Show, episode: &Episode) -> String {
        link_path_for(show, episode)
            .unwrap()
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn test_single_season_templates() {
        let single = show(vec![season(1, None, Quarter::Q1, None)]);
        assert_eq!(path(&single, &episode(1, EpisodeNumber::Number(1))), "Foo/Foo - 01");
        assert_eq!(
            path(&single, &episode(1, EpisodeNumber::Special("OVA".into()))),
            "Foo/Foo - OVA"
        );

        let movie = show(vec![season(1, None, Quarter::Q1, Some(1))]);
        assert_eq!(path(&movie, &episode(1, EpisodeNumber::Number(1))), "Foo/Foo");
    }

    #[test]
    fn test_multi_season_templates() {
        let foo = show(vec![
            season(1, None, Quarter::Q1, Some(12)),
            season(2, None, Quarter::Q3, Some(1)),
            season(3, Some("Final Arc"), Quarter::Q4, Some(100)),
        ]);

        assert_eq!(
            path(&foo, &episode(1, EpisodeNumber::Number(5))),
            "Foo/Season 1/Foo - s1e05"
        );
        assert_eq!(
            path(&foo, &episode(1, EpisodeNumber::Special("OVA".into()))),
            "Foo/Season 1/Foo - s1 OVA"
        );
        assert_eq!(path(&foo, &episode(2, EpisodeNumber::Number(1))), "Foo/Season 2/Foo - s2");
        assert_eq!(
            path(&foo, &episode(3, EpisodeNumber::Number(7))),
            "Foo/Season 3 - Final Arc/Foo - Final Arc - 007"
        );
    }

    #[test]
    fn test_subtitle_single_episode_and_alt() {
        let foo = show(vec![
            season(1, None, Quarter::Q1, None),
            season(2, Some("The Movie"), Quarter::Q2, Some(1)),
        ]);
        let mut ep = episode(2, EpisodeNumber::Number(1));
        assert_eq!(path(&foo, &ep), "Foo/Season 2 - The Movie/Foo - The Movie");

        ep.alt = Some("Dub".to_string());
        assert_eq!(path(&foo, &ep), "Foo/Dub/Season 2 - The Movie/Foo - The Movie");
    }

    #[test]
    fn test_padding_follows_declared_count() {
        let short = show(vec![season(1, None, Quarter::Q1, Some(9))]);
        assert_eq!(path(&short, &episode(1, EpisodeNumber::Number(3))), "Foo/Foo - 3");

        let long = show(vec![season(1, None, Quarter::Q1, Some(1000))]);
        assert_eq!(path(&long, &episode(1, EpisodeNumber::Number(3))), "Foo/Foo - 0003");
    }

    #[test]
    fn test_link_path_unknown_season() {
        let foo = show(vec![season(1, None, Quarter::Q1, None)]);
        assert!(link_path_for(&foo, &episode(2, EpisodeNumber::Number(1))).is_none());
    }

    #[test]
    fn test_status_only_changes_prefix() {
        let dirs = Directories::with_media("/srv/anime");
        let mut foo = show(vec![season(1, None, Quarter::Q1, None)]);
        let ep = episode(1, EpisodeNumber::Number(4));

        let in_progress = link_destination(&dirs, &foo, &ep).unwrap();
        foo.status = ShowStatus::Archived;
        let archived = link_destination(&dirs, &foo, &ep).unwrap();

        assert_eq!(in_progress, PathBuf::from("In Progress/Foo/Foo - 04"));
        assert_eq!(archived, PathBuf::from("Archived/Foo/Foo - 04"));
        assert_eq!(
            in_progress.strip_prefix("In Progress").unwrap(),
            archived.strip_prefix("Archived").unwrap()
        );
    }

    #[test]
    fn test_bucket_picks_earliest_quarter() {
        let mut db = Database::empty(Directories::with_media("/srv/anime"));
        db.shows.insert(
            "Foo".to_string(),
            show(vec![
                season(1, None, Quarter::Q3, None),
                season(2, None, Quarter::Q1, None),
            ]),
        );
        let torrent = Torrent {
            hash: "a".repeat(40),
            source: "magnet:?x".to_string(),
            location: None,
            archived: None,
            episodes: vec![
                EpisodeSpec::Single(episode(1, EpisodeNumber::Number(1))),
                EpisodeSpec::Pattern(EpisodePattern {
                    show: "Foo".to_string(),
                    regex: Regex::new(r"(?P<episode>\d+)").unwrap(),
                    season: 2,
                    alt: None,
                    season_offset: 0,
                    episode_offset: 0,
                }),
            ],
        };

        assert_eq!(
            bucket_for(&db, &torrent),
            Some(YearQuarter::new(2019, Quarter::Q1))
        );
        assert_eq!(
            download_location(&db, &torrent),
            PathBuf::from("/srv/anime/.Torrents/2019q1")
        );

        let pinned = Torrent {
            location: Some(PathBuf::from("/mnt/pinned")),
            ..torrent
        };
        assert_eq!(download_location(&db, &pinned), PathBuf::from("/mnt/pinned"));
    }

    #[test]
    fn test_with_extension_keeps_dots_in_stem() {
        assert_eq!(
            with_extension(Path::new("Foo/Foo v2.0 - 01"), Some("mkv")),
            PathBuf::from("Foo/Foo v2.0 - 01.mkv")
        );
        assert_eq!(
            with_extension(Path::new("Foo/Foo - 01"), None),
            PathBuf::from("Foo/Foo - 01.$EXT$")
        );
    }

    #[test]
    fn test_relative_target() {
        assert_eq!(
            relative_target(
                Path::new("/srv/anime/In Progress/Foo/Foo - 01.mkv"),
                Path::new("/srv/anime/.Torrents/2019q1/Foo/01.mkv")
            ),
            PathBuf::from("../../.Torrents/2019q1/Foo/01.mkv")
        );
        assert_eq!(
            relative_target(Path::new("links/a.mkv"), Path::new("data/a.mkv")),
            PathBuf::from("../data/a.mkv")
        );
        assert_eq!(
            relative_target(Path::new("/abs/a.mkv"), Path::new("rel/a.mkv")),
            PathBuf::from("rel/a.mkv")
        );
    }
}
