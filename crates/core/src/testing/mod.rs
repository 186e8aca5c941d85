//! Testing utilities and mock implementations.
//!
//! This module provides a mock torrent client and declaration fixtures,
//! allowing full reconciliation cycles to be tested against a temporary
//! directory without a running torrent client.
//!
//! # Example
//!
//! ```rust,ignore
//! use animanager_core::testing::{fixtures, MockTorrentClient};
//!
//! let client = MockTorrentClient::new();
//! client.set_name(&fixtures::hash('a'), "[Group] Foo").await;
//!
//! let yaml = fixtures::single_episode_yaml(media.path());
//! ```

mod mock_torrent_client;

pub use mock_torrent_client::{MockTorrent, MockTorrentClient};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::Path;

    /// A valid 40-character hash made of one repeated hex digit.
    pub fn hash(digit: char) -> String {
        std::iter::repeat(digit).take(40).collect()
    }

    /// Declaration with one show ("Foo", in progress, aired winter 2019) and
    /// one torrent holding its first episode.
    pub fn single_episode_yaml(media: &Path) -> String {
        format!(
            r#"
directories:
  media: {media}
shows:
  in_progress:
    - title: Foo
      seasons:
        - {{ year: 2019, season: winter, episodes: 12 }}
torrents:
  {hash}:
    source: "magnet:?x"
    episodes:
      - {{ show: Foo, season: 1, episode: 1, file: "Foo 01.mkv" }}
"#,
            media = media.display(),
            hash = hash('a'),
        )
    }

    /// Declaration with a two-season show whose episodes come from a
    /// pattern over the torrent's file list.
    pub fn pattern_yaml(media: &Path) -> String {
        format!(
            r#"
directories:
  media: {media}
shows:
  archived:
    - title: Bar
      seasons:
        - {{ year: 2018, season: fall, episodes: 12 }}
        - {{ year: 2019, season: summer, episodes: 12 }}
torrents:
  {hash}:
    source: "magnet:?y"
    episodes:
      - pattern: {{ show: Bar, season: 2, regex: 'E(?P<episode>\d+)', episode_offset: -12 }}
"#,
            media = media.display(),
            hash = hash('b'),
        )
    }
}
