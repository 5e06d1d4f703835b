use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "pgaudit-relay",
    version,
    about = "Tails PostgreSQL JSON logs and ships pgaudit entries to Cloud Logging"
)]
pub struct Cli {
    /// Glob pattern selecting the log files to tail
    #[arg(long, value_name = "GLOB")]
    pub log_file: String,

    /// Path to the configuration file
    #[arg(short, long, default_value = "pgaudit-relay.yaml")]
    pub config: PathBuf,

    /// GCP project id; enables local mode and skips the Kubernetes lookup
    #[arg(long)]
    pub project_id: Option<String>,

    /// Read files present at startup from the beginning instead of the end
    #[arg(long)]
    pub from_beginning: bool,

    /// Print audit records and passthrough lines instead of shipping them
    #[arg(long)]
    pub dry_run: bool,

    /// Print the last N entries of the log file and exit
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub test_last_n: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["pgaudit-relay", "--log-file", "/var/log/pg/*.json"]).unwrap();
        assert_eq!(cli.log_file, "/var/log/pg/*.json");
        assert_eq!(cli.config, PathBuf::from("pgaudit-relay.yaml"));
        assert!(!cli.from_beginning);
        assert!(!cli.dry_run);
        assert_eq!(cli.test_last_n, None);
    }

    #[test]
    fn all_flags() {
        let cli = Cli::try_parse_from([
            "pgaudit-relay",
            "--log-file",
            "pg.json",
            "--config",
            "relay.yaml",
            "--project-id",
            "team-project",
            "--from-beginning",
            "--dry-run",
            "--test-last-n",
            "5",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("relay.yaml"));
        assert_eq!(cli.project_id.as_deref(), Some("team-project"));
        assert!(cli.from_beginning);
        assert!(cli.dry_run);
        assert_eq!(cli.test_last_n, Some(5));
    }

    #[test]
    fn log_file_is_required() {
        let err = Cli::try_parse_from(["pgaudit-relay"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_last_n_must_be_positive() {
        assert!(Cli::try_parse_from(["pgaudit-relay", "--log-file", "x", "--test-last-n", "0"]).is_err());
    }
}
