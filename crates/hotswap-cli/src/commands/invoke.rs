//! `hotswap invoke` command implementation

use anyhow::{Context, bail};
use colored::Colorize;
use hotswap_kernel::{Args, Value};
use hotswap_runtime::Hotswap;

/// Execute the `hotswap invoke` command
pub fn run(
    hotswap: &Hotswap,
    unit: &str,
    operation: &str,
    args: &[String],
    kwargs: &[String],
) -> anyhow::Result<()> {
    let args = parse_args(args, kwargs)?;
    let result = hotswap.invoke(unit, operation, &args)?;
    println!(
        "{} {}.{} = {}",
        "✓".green(),
        unit.cyan(),
        operation,
        serde_json::to_string(&result)?
    );
    Ok(())
}

/// Parse a single argument as JSON, falling back to a plain string
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Build call arguments from positional and `key=value` strings
pub fn parse_args(args: &[String], kwargs: &[String]) -> anyhow::Result<Args> {
    let mut parsed = Args::positional(args.iter().map(|a| parse_value(a)).collect());
    for kwarg in kwargs {
        let (key, raw) = kwarg
            .split_once('=')
            .with_context(|| format!("keyword argument '{}' is not key=value", kwarg))?;
        if key.is_empty() {
            bail!("keyword argument '{}' has an empty key", kwarg);
        }
        parsed = parsed.with_kwarg(key, parse_value(raw));
    }
    Ok(parsed)
}
