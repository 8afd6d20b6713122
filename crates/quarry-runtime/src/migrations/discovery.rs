//! Finds migration scripts in a directory, in the order they run.

use std::path::{Path, PathBuf};

use quarry_core::error::{QuarryError, Result};
use quarry_core::CREATE_DATABASE_TOKEN;
use tracing::debug;

/// A migration script found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// File basename, e.g. `2020-01-02-Create-Tables.sql`. This is the name
    /// recorded in the ledger.
    pub name: String,
    /// Full path to the script.
    pub path: PathBuf,
}

impl MigrationFile {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Whether this migration creates the target database itself.
    pub fn creates_database(&self) -> bool {
        self.name.contains(CREATE_DATABASE_TOKEN)
    }
}

/// List the migration scripts in `dir` with the given extension.
///
/// Scripts are returned sorted by name, which is the order they run in. Name
/// them with a date prefix:
/// - `2020-01-01-Create-Database.sql`
/// - `2020-01-02-Create-Tables.sql`
///
/// An unreadable directory is an error; a readable one with no scripts is not.
pub fn discover(dir: &Path, extension: &str) -> Result<Vec<MigrationFile>> {
    let listing_error = |source| QuarryError::Discovery {
        path: dir.to_path_buf(),
        source,
    };

    let mut migrations = Vec::new();

    for entry in std::fs::read_dir(dir).map_err(listing_error)? {
        let entry = entry.map_err(listing_error)?;
        let path = entry.path();

        if !path.is_file() || path.extension().map(|e| e != extension).unwrap_or(true) {
            continue;
        }

        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            debug!("Skipping migration with non UTF-8 name: {:?}", path);
            continue;
        };

        migrations.push(MigrationFile::new(name, &path));
    }

    migrations.sort_by(|a, b| a.name.cmp(&b.name));

    debug!("Found {} migrations in {}", migrations.len(), dir.display());
    Ok(migrations)
}
