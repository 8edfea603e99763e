// File: ./src/cli.rs
//! Command-line parsing and help text.
use anyhow::{Result, anyhow};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Command {
    #[default]
    Run,
    /// Print the configured tasks and their cursors.
    Tasks,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliArgs {
    pub command: Command,
    pub root: Option<PathBuf>,
    pub tasks: Option<PathBuf>,
    pub workbooks: Option<PathBuf>,
    pub dry_run: bool,
}

/// Parses arguments after the binary name.
pub fn parse_args(args: &[String]) -> Result<CliArgs> {
    let mut parsed = CliArgs::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .map(PathBuf::from)
                .ok_or_else(|| anyhow!("{} needs a value", flag))
        };
        match arg.as_str() {
            "-h" | "--help" | "help" => parsed.command = Command::Help,
            "tasks" => parsed.command = Command::Tasks,
            "run" => parsed.command = Command::Run,
            "-r" | "--root" => parsed.root = Some(value(arg)?),
            "-t" | "--tasks" => parsed.tasks = Some(value(arg)?),
            "-w" | "--workbooks" => parsed.workbooks = Some(value(arg)?),
            "-n" | "--dry-run" => parsed.dry_run = true,
            other => return Err(anyhow!("Unknown argument '{}'. See --help", other)),
        }
    }
    Ok(parsed)
}

pub fn print_help(binary_name: &str) {
    println!(
        "Seriesync v{} - keeps spreadsheet time-series tabs in step with scraped tables",
        env!("CARGO_PKG_VERSION")
    );
    println!();
    println!("USAGE:");
    println!("    {} [run] [OPTIONS]", binary_name);
    println!("    {} tasks [OPTIONS]", binary_name);
    println!("    {} --help", binary_name);
    println!();
    println!("OPTIONS:");
    println!("    -r, --root <path>        Use a different directory for config and data.");
    println!("    -t, --tasks <file>       Task document (default: <config>/tasks.json).");
    println!("    -w, --workbooks <dir>    Local workbook directory (default: <data>/workbooks).");
    println!("    -n, --dry-run            Log cell writes instead of applying them.");
    println!("                             Cursor commits are also kept in memory only.");
    println!("    -h, --help               Show this help message.");
    println!();
    println!("COMMANDS:");
    println!("    run      Scrape every task and reconcile its sheet region (default).");
    println!("    tasks    List tasks with their cursors and field layouts.");
    println!();
    println!("SETTINGS (config.toml):");
    println!("    [extractor] program/args   Program printing JSON rows for '<url> <max_rows>'.");
    println!("    fetch_attempts, backoff_base_ms, backoff_jitter_ms");
    println!("    single_rows, parallel_rows  Rows requested per task kind.");
    println!("    shape_policy               \"fail_fast\" (default) or \"skip\".");
    println!("    log_level, log_file");
    println!();
    println!("EXIT STATUS:");
    println!("    0 when the run completes (skipped tasks included), 1 on a fatal condition.");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults_to_run() {
        assert_eq!(parse_args(&[]).unwrap(), CliArgs::default());
    }

    #[test]
    fn test_flags() {
        let parsed = parse_args(&args(&["tasks", "--root", "/tmp/x", "-n", "-t", "t.json"])).unwrap();
        assert_eq!(parsed.command, Command::Tasks);
        assert_eq!(parsed.root, Some(PathBuf::from("/tmp/x")));
        assert_eq!(parsed.tasks, Some(PathBuf::from("t.json")));
        assert!(parsed.dry_run);
    }

    #[test]
    fn test_missing_value_and_unknown_flag() {
        assert!(parse_args(&args(&["--root"])).is_err());
        assert!(parse_args(&args(&["--frobnicate"])).is_err());
    }
}
