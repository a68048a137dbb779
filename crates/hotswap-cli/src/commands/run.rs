//! `hotswap run` command implementation
//!
//! Registers the configured units and then serves simple line commands
//! from stdin until `quit` or end of input.

use colored::Colorize;
use hotswap_kernel::Args;
use hotswap_runtime::{Hotswap, ReloadReport};
use std::io::{self, BufRead, Write};
use tracing::warn;

use super::invoke::parse_value;

/// A line command read from stdin
#[derive(Debug, PartialEq)]
pub enum Line {
    Reload(String),
    ReloadAll,
    Invoke {
        unit: String,
        operation: String,
        args: Args,
    },
    Status,
    Quit,
    Empty,
}

/// Parse one input line
pub fn parse_line(line: &str) -> Result<Line, String> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(Line::Empty);
    };
    match command {
        "reload" => match (words.next(), words.next()) {
            (Some(unit), None) => Ok(Line::Reload(unit.to_string())),
            _ => Err("usage: reload <unit>".to_string()),
        },
        "reload-all" => Ok(Line::ReloadAll),
        "invoke" => match (words.next(), words.next()) {
            (Some(unit), Some(operation)) => Ok(Line::Invoke {
                unit: unit.to_string(),
                operation: operation.to_string(),
                args: Args::positional(words.map(parse_value).collect()),
            }),
            _ => Err("usage: invoke <unit> <operation> [json args...]".to_string()),
        },
        "status" => Ok(Line::Status),
        "quit" | "exit" => Ok(Line::Quit),
        other => Err(format!("unknown command '{}'", other)),
    }
}

/// Execute the `hotswap run` command
pub fn run(hotswap: &Hotswap) -> anyhow::Result<()> {
    for failure in hotswap.register_configured() {
        warn!("Unit {} not started: {}", failure.unit, failure.error);
    }
    print_status(hotswap);

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;
        match parse_line(&line) {
            Ok(Line::Empty) => {}
            Ok(Line::Quit) => break,
            Ok(Line::Status) => print_status(hotswap),
            Ok(Line::ReloadAll) => print_report(&hotswap.reload_all()),
            Ok(Line::Reload(unit)) => match hotswap.reload(&unit) {
                Ok(report) => print_report(&report),
                Err(e) => println!("{} {}", "✗".red(), e),
            },
            Ok(Line::Invoke {
                unit,
                operation,
                args,
            }) => match hotswap.invoke(&unit, &operation, &args) {
                Ok(value) => println!("{}", value),
                Err(e) => println!("{} {}", "✗".red(), e),
            },
            Err(usage) => println!("{} {}", "✗".red(), usage),
        }
        stdout.flush()?;
    }
    Ok(())
}

fn print_status(hotswap: &Hotswap) {
    let names = hotswap.names();
    println!("{} units registered", names.len().to_string().yellow());
    for name in names {
        let Some(info) = hotswap.unit_info(&name) else {
            continue;
        };
        let worker = if hotswap.is_running(&name) {
            "running".green()
        } else {
            "idle".normal()
        };
        println!(
            "  {:<20} {:<12} {}  reloads={}  worker={}",
            name.cyan(),
            info.origin.to_string(),
            &info.hash[..info.hash.len().min(12)],
            info.reload_count,
            worker
        );
    }
}

fn print_report(report: &ReloadReport) {
    for unit in &report.reloaded {
        println!("{} reloaded {}", "✓".green(), unit.cyan());
    }
    for unit in &report.restarted {
        println!("{} restarted worker {}", "✓".green(), unit.cyan());
    }
    for failure in &report.failures {
        println!("{} {}: {}", "✗".red(), failure.unit.cyan(), failure.error);
    }
    println!("done in {:?}", report.duration);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("  "), Ok(Line::Empty));
        assert_eq!(parse_line("reload calc"), Ok(Line::Reload("calc".into())));
        assert_eq!(parse_line("reload-all"), Ok(Line::ReloadAll));
        assert_eq!(parse_line("status"), Ok(Line::Status));
        assert_eq!(parse_line("quit"), Ok(Line::Quit));
        assert_eq!(
            parse_line("invoke calc add 1 2"),
            Ok(Line::Invoke {
                unit: "calc".into(),
                operation: "add".into(),
                args: Args::positional(vec![json!(1), json!(2)]),
            })
        );
    }

    #[test]
    fn test_parse_line_errors() {
        assert!(parse_line("reload").is_err());
        assert!(parse_line("reload a b").is_err());
        assert!(parse_line("invoke calc").is_err());
        assert!(parse_line("launch").is_err());
    }
}
