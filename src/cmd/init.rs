//! Database initialization: `civic init`.

use anyhow::Result;
use civic_report::config::CivicToml;

pub fn cmd_init(config: &CivicToml) -> Result<()> {
    let db = super::open_db(config)?;
    let departments = db.list_departments()?;
    println!(
        "Database initialized at {} ({} departments)",
        config.database.path.display(),
        departments.len()
    );
    Ok(())
}
