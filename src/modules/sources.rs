use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use std::sync::Mutex;

use crate::proxy::source_store::SourceRecord;

/// Global write lock so concurrent configuration calls cannot interleave
/// a temp-file write with a rename.
static SOURCE_WRITE_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

const DATA_DIR: &str = ".veehub";
const SOURCES_DIR: &str = "sources";

/// Get data directory path
pub fn get_data_dir() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Failed to get user home directory")?;
    let data_dir = home.join(DATA_DIR);

    if !data_dir.exists() {
        fs::create_dir_all(&data_dir)
            .map_err(|e| format!("Failed to create data directory: {}", e))?;
    }

    Ok(data_dir)
}

/// Get sources directory path under a data directory
pub fn get_sources_dir(data_dir: &Path) -> Result<PathBuf, String> {
    let sources_dir = data_dir.join(SOURCES_DIR);

    if !sources_dir.exists() {
        fs::create_dir_all(&sources_dir)
            .map_err(|e| format!("Failed to create sources directory: {}", e))?;
    }

    Ok(sources_dir)
}

/// Save a source record (atomic write: temp file + rename)
pub fn save_source(data_dir: &Path, record: &SourceRecord) -> Result<(), String> {
    let _lock = SOURCE_WRITE_LOCK
        .lock()
        .map_err(|e| format!("Failed to acquire lock: {}", e))?;

    let sources_dir = get_sources_dir(data_dir)?;
    let path = sources_dir.join(format!("{}.json", record.id));
    let temp_path = sources_dir.join(format!("{}.json.tmp", record.id));

    let content = serde_json::to_string_pretty(record)
        .map_err(|e| format!("Failed to serialize source: {}", e))?;

    fs::write(&temp_path, content)
        .map_err(|e| format!("Failed to write temporary source file: {}", e))?;

    fs::rename(&temp_path, &path).map_err(|e| format!("Failed to replace source file: {}", e))
}

/// Load every source record found under the data directory.
/// Files that fail to parse are skipped with a log line, not fatal.
pub fn load_sources(data_dir: &Path) -> Result<Vec<SourceRecord>, String> {
    let sources_dir = get_sources_dir(data_dir)?;

    let entries = fs::read_dir(&sources_dir)
        .map_err(|e| format!("Failed to read sources directory: {}", e))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("json"))
        .collect();
    paths.sort();

    let mut records = Vec::new();
    for path in paths {
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("failed to read source file {:?}: {}", path, e);
                continue;
            }
        };
        match serde_json::from_str::<SourceRecord>(&content) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!("skipping unparsable source file {:?}: {}", path, e),
        }
    }

    // Stable ordering across restarts: oldest configuration first
    records.sort_by_key(|r| r.created_at);

    Ok(records)
}

/// Delete a persisted source record (no-op when the file is already gone)
pub fn delete_source(data_dir: &Path, source_id: &str) -> Result<(), String> {
    let _lock = SOURCE_WRITE_LOCK
        .lock()
        .map_err(|e| format!("Failed to acquire lock: {}", e))?;

    let sources_dir = get_sources_dir(data_dir)?;
    let path = sources_dir.join(format!("{}.json", source_id));

    if path.exists() {
        fs::remove_file(&path).map_err(|e| format!("Failed to delete source file: {}", e))?;
    }

    Ok(())
}
