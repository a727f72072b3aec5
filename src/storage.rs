//! JSON file persistence shared by the user and task stores.
//!
//! Each table is one pretty-printed JSON array on disk. Stores read the file
//! once at startup and rewrite it whole after every change.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File, create_dir_all};
use std::io::{Read, Write};
use std::path::Path;

use crate::error::Result;

/// Create the database directory and an empty table file if missing.
pub fn init_table(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            create_dir_all(dir)?;
        }
    }

    if !path.exists() {
        let mut file = File::create(path)?;
        file.write_all(b"[]")?;
    }

    Ok(())
}

/// Read every record of a table.
pub fn load_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut file = File::open(path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&contents)?)
}

/// Replace a table's contents.
///
/// Writes to a sibling temp file first so a crash never leaves half a table.
pub fn save_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let json = serde_json::to_string_pretty(records)?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Next id for a table whose ids are allocated as max + 1.
pub fn next_id(ids: impl Iterator<Item = u32>) -> u32 {
    ids.max().unwrap_or(0) + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_table_is_created_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("users.json");

        init_table(&path).unwrap();
        let records: Vec<u32> = load_records(&path).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn save_then_load_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json");
        init_table(&path).unwrap();

        save_records(&path, &[3u32, 1, 2]).unwrap();
        let records: Vec<u32> = load_records(&path).unwrap();
        assert_eq!(records, vec![3, 1, 2]);
    }

    #[test]
    fn ids_start_at_one() {
        assert_eq!(next_id(std::iter::empty()), 1);
        assert_eq!(next_id([4, 9, 2].into_iter()), 10);
    }
}
