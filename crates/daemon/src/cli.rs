use std::path::PathBuf;

use clap::{Parser, Subcommand};

use animanager_core::Config;

/// Keeps a torrent client and a tree of episode symlinks in sync with a
/// YAML declaration of an anime library.
#[derive(Debug, Parser)]
#[command(name = "animanager", version, about)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short = 'f', long = "config", env = "ANIMANAGER_CONFIG_FILE", global = true)]
    pub config: Option<PathBuf>,

    /// YAML declaration of the library
    #[arg(short = 'd', long, global = true)]
    pub database: Option<PathBuf>,

    /// Directory holding the applied-state cache
    #[arg(short = 'c', long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Torrent client base URL
    #[arg(short = 't', long, global = true)]
    pub client_url: Option<String>,

    /// Also write logs to this file [default: <cache-dir>/log]
    #[arg(short = 'g', long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Log level or filter directive, e.g. "debug" or "animanager_core=trace"
    #[arg(short = 'l', long, global = true)]
    pub log_level: Option<String>,

    /// Print what would change without touching anything
    #[arg(short = 'n', long, global = true)]
    pub dry_run: bool,

    /// Delete removed data instead of moving it to the trash
    #[arg(long, global = true)]
    pub no_trash: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run one reconciliation cycle
    Update,
    /// Show the actions a cycle would perform
    Plan,
    /// Reconcile, then again whenever the declaration changes
    Watch,
}

impl Cli {
    /// Flags win over the file and the environment.
    pub fn apply(&self, config: &mut Config) {
        if let Some(database) = &self.database {
            config.database = Some(database.clone());
        }
        if let Some(cache_dir) = &self.cache_dir {
            config.cache_dir = Some(cache_dir.clone());
        }
        if let Some(url) = &self.client_url {
            config.torrent_client.url = url.clone();
        }
        if let Some(file) = &self.log_file {
            config.logging.file = Some(file.clone());
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.dry_run || self.command == Command::Plan {
            config.dry_run = true;
        }
        if self.no_trash {
            config.trash = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_short_flags() {
        let cli = Cli::try_parse_from([
            "animanager",
            "-d",
            "anime.yaml",
            "-c",
            "/var/cache/animanager",
            "-t",
            "http://nas:9091",
            "-l",
            "debug",
            "-n",
            "update",
        ])
        .unwrap();

        assert_eq!(cli.command, Command::Update);
        assert_eq!(cli.database, Some(PathBuf::from("anime.yaml")));
        assert_eq!(cli.client_url.as_deref(), Some("http://nas:9091"));
        assert!(cli.dry_run);
        assert!(!cli.no_trash);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["animanager", "watch", "--no-trash", "-g", "out.log"])
            .unwrap();
        assert_eq!(cli.command, Command::Watch);
        assert!(cli.no_trash);
        assert_eq!(cli.log_file, Some(PathBuf::from("out.log")));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["animanager"]).is_err());
    }

    #[test]
    fn test_apply_overrides_config() {
        let cli = Cli::try_parse_from([
            "animanager",
            "-d",
            "anime.yaml",
            "-c",
            "cache",
            "-t",
            "http://nas:8080",
            "--no-trash",
            "update",
        ])
        .unwrap();
        let mut config = Config::default();
        cli.apply(&mut config);

        assert_eq!(config.database, Some(PathBuf::from("anime.yaml")));
        assert_eq!(config.cache_dir, Some(PathBuf::from("cache")));
        assert_eq!(config.torrent_client.url, "http://nas:8080");
        assert!(!config.trash);
        assert!(!config.dry_run);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.log_file(), Some(PathBuf::from("cache/log")));
    }

    #[test]
    fn test_plan_forces_dry_run() {
        let cli = Cli::try_parse_from(["animanager", "plan"]).unwrap();
        let mut config = Config::default();
        cli.apply(&mut config);
        assert!(config.dry_run);
    }

    #[test]
    fn test_apply_keeps_unset_values() {
        let cli = Cli::try_parse_from(["animanager", "update"]).unwrap();
        let mut config = Config {
            database: Some(PathBuf::from("from-file.yaml")),
            ..Config::default()
        };
        cli.apply(&mut config);
        assert_eq!(config.database, Some(PathBuf::from("from-file.yaml")));
        assert!(config.trash);
    }
}
