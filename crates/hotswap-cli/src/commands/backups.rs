//! `hotswap backups` command implementation

use colored::Colorize;
use hotswap_runtime::Hotswap;

/// Execute the `hotswap backups` command
pub fn run(hotswap: &Hotswap, unit: &str) -> anyhow::Result<()> {
    let records = hotswap.backups().records(unit)?;
    if records.is_empty() {
        println!("No backups for {} in {}", unit.cyan(), hotswap.backups().dir().display());
        return Ok(());
    }

    println!("{} ({} versions)", unit.cyan().bold(), records.len());
    for record in records.iter().rev() {
        let hash = record.hash.as_deref().map_or("unreadable", |h| &h[..h.len().min(12)]);
        println!(
            "  {}  {}  {}",
            record.created_at.format("%Y-%m-%d %H:%M:%S").to_string().yellow(),
            hash,
            record.path.display()
        );
    }
    Ok(())
}
