use std::path::PathBuf;

use clap::Parser;

use crate::logging::{Area, Priority};
use crate::namespace::Mode;

const DEFAULT_HISTORY: &str = ".splice_history";

#[derive(Parser, Debug)]
#[command(name = "splice")]
#[command(about = "Interactive Splice session with hot function redefinition", long_about = None)]
pub struct Cli {
    /// Enable logging for an area (repeatable)
    #[arg(long = "logging", value_enum, value_name = "AREA")]
    pub logging: Vec<Area>,

    /// Minimum priority of printed log records
    #[arg(long = "logging-priority", value_enum, default_value_t = Priority::None, value_name = "PRIORITY")]
    pub logging_priority: Priority,

    /// Reject any redefinition of an existing function
    #[arg(long)]
    pub playground: bool,

    /// Line-editor history file
    #[arg(long, value_name = "FILE", conflicts_with = "no_history")]
    pub history: Option<PathBuf>,

    /// Do not read or write a history file
    #[arg(long)]
    pub no_history: bool,
}

/// Validated session settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Config {
    pub mode: Mode,
    pub history: Option<PathBuf>,
    pub log_areas: Vec<Area>,
    pub log_priority: Priority,
}

impl Config {
    /// Settings for an in-process session with no history file.
    pub fn with_mode(mode: Mode) -> Self {
        Config {
            mode,
            ..Config::default()
        }
    }
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        let history = if cli.no_history {
            None
        } else {
            Some(cli.history.unwrap_or_else(|| PathBuf::from(DEFAULT_HISTORY)))
        };
        Config {
            mode: if cli.playground {
                Mode::Strict
            } else {
                Mode::Permissive
            },
            history,
            log_areas: cli.logging,
            log_priority: cli.logging_priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(args: &[&str]) -> Config {
        let mut argv = vec!["splice"];
        argv.extend_from_slice(args);
        Config::from(Cli::parse_from(argv))
    }

    #[test]
    fn defaults() {
        let c = config(&[]);
        assert_eq!(c.mode, Mode::Permissive);
        assert_eq!(c.history, Some(PathBuf::from(DEFAULT_HISTORY)));
        assert!(c.log_areas.is_empty());
        assert_eq!(c.log_priority, Priority::None);
    }

    #[test]
    fn playground_is_strict() {
        assert_eq!(config(&["--playground"]).mode, Mode::Strict);
    }

    #[test]
    fn logging_is_repeatable() {
        let c = config(&[
            "--logging",
            "codegen",
            "--logging",
            "jit",
            "--logging-priority",
            "debug",
        ]);
        assert_eq!(c.log_areas, vec![Area::Codegen, Area::Jit]);
        assert_eq!(c.log_priority, Priority::Debug);
    }

    #[test]
    fn history_flags() {
        assert_eq!(config(&["--no-history"]).history, None);
        assert_eq!(
            config(&["--history", "h.txt"]).history,
            Some(PathBuf::from("h.txt"))
        );
        assert!(Cli::try_parse_from(["splice", "--history", "h", "--no-history"]).is_err());
    }
}
