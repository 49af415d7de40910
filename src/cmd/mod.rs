//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module       | Commands handled |
//! |--------------|------------------|
//! | `serve`      | `Serve`          |
//! | `init`       | `Init`           |
//! | `admin`      | `Admin`          |
//! | `department` | `Department`     |
//! | `config`     | `Config`         |

pub mod admin;
pub mod config;
pub mod department;
pub mod init;
pub mod serve;

pub use admin::cmd_admin;
pub use config::cmd_config;
pub use department::cmd_department;
pub use init::cmd_init;
pub use serve::cmd_serve;

use anyhow::{Context, Result};
use civic_report::config::CivicToml;
use civic_report::portal::db::PortalDb;

/// Open (creating if needed) the database named by the config.
pub(crate) fn open_db(config: &CivicToml) -> Result<PortalDb> {
    let path = &config.database.path;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    PortalDb::new(path)
}
