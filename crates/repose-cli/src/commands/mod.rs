pub mod import;
pub mod snapshot;

use repose_core::config::DatabaseSettings;
use repose_store::SqliteConnection;

/// Open the configured database, creating its directory if needed
pub fn open_database(
    settings: &DatabaseSettings,
) -> Result<SqliteConnection, Box<dyn std::error::Error>> {
    if let Some(parent) = settings.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(SqliteConnection::open(settings)?)
}
