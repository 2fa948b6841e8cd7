//! Clap command tree definition.

use clap::{Arg, ArgAction, Command};

/// Default data directory when `--data-dir` is absent.
pub const DEFAULT_DATA_DIR: &str = ".docket";

/// Build the complete CLI command tree.
pub fn build_cli() -> Command {
    Command::new("docket")
        .about("Inspect and migrate docket stores")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .value_name("DIR")
                .help("Data directory holding docket.toml and the store files (default: .docket)")
                .global(true),
        )
        .arg(
            Arg::new("migrate")
                .long("migrate")
                .help("Allow schema migrations while opening stores")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log filter when RUST_LOG is unset (default: from docket.toml)")
                .global(true),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("JSON output mode")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(build_status())
        .subcommand(build_migrate())
}

// =========================================================================
// Subcommands
// =========================================================================

fn build_status() -> Command {
    Command::new("status").about("Open every store and report what it holds")
}

fn build_migrate() -> Command {
    Command::new("migrate").about("Open every store, migrating older data to the current schema")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let matches = build_cli()
            .try_get_matches_from(["docket", "status", "--data-dir", "/tmp/d", "--migrate"])
            .unwrap();
        assert_eq!(matches.subcommand_name(), Some("status"));
        assert_eq!(
            matches.get_one::<String>("data-dir").map(String::as_str),
            Some("/tmp/d")
        );
        assert!(matches.get_flag("migrate"));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(build_cli().try_get_matches_from(["docket"]).is_err());
    }
}
