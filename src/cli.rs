use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::OutputKind;

/// Command-line arguments for the artifact-report tool.
///
/// `list` shows the artifact catalog, `run` produces a report from an
/// extracted file-system tree or ZIP container, and `init-config` writes the
/// default run configuration.
#[derive(Parser, Debug)]
#[clap(
    name = "artifact-report",
    version,
    about = "Parse mobile-device evidence into HTML, TSV, timeline, KML and SQLite reports"
)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List registered artifacts
    List(ListOpts),

    /// Run the selected artifacts against an evidence tree
    Run(RunOpts),

    /// Create a default configuration file
    InitConfig {
        /// Path to output configuration file
        #[clap(default_value = "config.yaml")]
        path: PathBuf,
    },
}

#[derive(ClapArgs, Debug)]
pub struct ListOpts {
    /// Only artifacts in this category (repeatable)
    #[clap(long = "category")]
    pub categories: Vec<String>,

    /// Only artifacts feeding this output kind (html, tsv, timeline, kml, case_db)
    #[clap(long)]
    pub output_kind: Option<OutputKind>,

    /// Print descriptors as JSON
    #[clap(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug)]
#[clap(group = clap::ArgGroup::new("selection").required(true))]
pub struct RunOpts {
    /// Evidence root: an extracted directory or a .zip container
    #[clap(short, long)]
    pub evidence: PathBuf,

    /// Report output directory
    #[clap(short, long)]
    pub output: PathBuf,

    /// Run every registered artifact
    #[clap(long, group = "selection")]
    pub all: bool,

    /// Artifact keys to run (comma-separated)
    #[clap(long, group = "selection", value_delimiter = ',')]
    pub artifacts: Vec<String>,

    /// Categories to run (comma-separated)
    #[clap(long, group = "selection", value_delimiter = ',')]
    pub categories: Vec<String>,

    /// Offset used to render timestamps, e.g. +02:00 (default: UTC)
    #[clap(long, default_value = "UTC", allow_hyphen_values = true)]
    pub timezone: String,

    /// Keep line breaks in long text cells
    #[clap(long)]
    pub wrap_text: bool,

    /// Artifacts processed concurrently
    #[clap(long)]
    pub concurrency: Option<usize>,

    /// Stop dispatching new artifacts after this many seconds
    #[clap(long)]
    pub timeout: Option<u64>,

    /// Path to configuration YAML file
    #[clap(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[clap(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_run_with_artifact_keys() {
        let args = Args::parse_from([
            "artifact-report",
            "run",
            "--evidence", "/cases/001/extraction",
            "--output", "/cases/001/report",
            "--artifacts", "adId,routinedCacheLocations",
            "--timezone", "-05:00",
            "--wrap-text",
            "--concurrency", "4",
        ]);

        match args.command {
            Commands::Run(opts) => {
                assert_eq!(opts.evidence, PathBuf::from("/cases/001/extraction"));
                assert_eq!(opts.output, PathBuf::from("/cases/001/report"));
                assert_eq!(opts.artifacts, vec!["adId", "routinedCacheLocations"]);
                assert_eq!(opts.timezone, "-05:00");
                assert!(opts.wrap_text);
                assert_eq!(opts.concurrency, Some(4));
                assert!(!opts.all);
                assert!(!opts.verbose);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_defaults() {
        let args = Args::parse_from([
            "artifact-report", "run", "-e", "ev", "-o", "out", "--all",
        ]);

        match args.command {
            Commands::Run(opts) => {
                assert!(opts.all);
                assert_eq!(opts.timezone, "UTC");
                assert_eq!(opts.timeout, None);
                assert_eq!(opts.config, None);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_requires_one_selection() {
        assert!(Args::try_parse_from(["artifact-report", "run", "-e", "ev", "-o", "out"]).is_err());
        assert!(Args::try_parse_from([
            "artifact-report", "run", "-e", "ev", "-o", "out", "--all", "--categories", "Locations",
        ])
        .is_err());
    }

    #[test]
    fn test_list_filters() {
        let args = Args::parse_from([
            "artifact-report",
            "list",
            "--category", "Locations",
            "--category", "Identifiers",
            "--output-kind", "kml",
            "--json",
        ]);

        match args.command {
            Commands::List(opts) => {
                assert_eq!(opts.categories, vec!["Locations", "Identifiers"]);
                assert_eq!(opts.output_kind, Some(OutputKind::Kml));
                assert!(opts.json);
            }
            _ => panic!("Expected List command"),
        }
    }

    #[test]
    fn test_init_config_subcommand() {
        let args = Args::parse_from(["artifact-report", "init-config"]);
        match args.command {
            Commands::InitConfig { path } => assert_eq!(path, PathBuf::from("config.yaml")),
            _ => panic!("Expected InitConfig command"),
        }
    }
}
