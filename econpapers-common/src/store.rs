//! Flat JSON document stores. Writes go to a temporary sibling and are
//! renamed into place, so readers only ever see a complete file.

use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use log::{debug, info};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};

pub fn backup_path(path: &Path) -> PathBuf {
    sibling_with_suffix(path, ".bak")
}

fn temp_path(path: &Path) -> PathBuf {
    sibling_with_suffix(path, ".tmp")
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| Error::json(path, e))
}

/// Reads a JSON document, falling back to `T::default()` when the file does
/// not exist yet. A file that exists but cannot be parsed is still an error.
pub fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        info!("No existing file found at {}, starting empty.", path.display());
        return Ok(T::default());
    }
    load_json(path)
}

pub fn to_pretty_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|e| Error::json(path, e))
}

/// Fails early if `path` could not be written later: creates missing parent
/// directories and a throwaway temporary sibling.
pub fn check_writable(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let tmp = temp_path(path);
    File::create(&tmp).map_err(|e| Error::io(&tmp, e))?;
    fs::remove_file(&tmp).map_err(|e| Error::io(&tmp, e))
}

pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let tmp = temp_path(path);
    {
        let file = File::create(&tmp).map_err(|e| Error::io(&tmp, e))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes).map_err(|e| Error::io(&tmp, e))?;
        writer.flush().map_err(|e| Error::io(&tmp, e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| Error::io(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| Error::io(path, e))?;
    debug!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = to_pretty_json(value, path)?;
    write_atomic(path, &bytes)
}

/// Copies the current file to its `.bak` sibling, then atomically replaces it.
/// After N saves the backup holds the content of save N-1.
pub fn save_with_backup(path: &Path, bytes: &[u8]) -> Result<()> {
    if path.exists() {
        let backup = backup_path(path);
        fs::copy(path, &backup).map_err(|e| Error::io(&backup, e))?;
        debug!("Created backup of {} at {}", path.display(), backup.display());
    }
    write_atomic(path, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn missing_file_loads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let map: BTreeMap<String, u32> =
            load_json_or_default(&dir.path().join("absent.json")).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn corrupt_file_is_an_error_not_an_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let result: Result<BTreeMap<String, u32>> = load_json_or_default(&path);
        assert!(matches!(result, Err(Error::Json { .. })));
    }

    #[test]
    fn write_json_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");
        write_json(&path, &vec![1, 2, 3]).unwrap();
        let back: Vec<u32> = load_json(&path).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn writability_check_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("store.json");
        check_writable(&path).unwrap();
        assert!(!path.exists());
        assert!(!temp_path(&path).exists());

        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();
        assert!(check_writable(&blocker.join("store.json")).is_err());
    }

    #[test]
    fn backup_holds_previous_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paper_details.json");
        for n in 1..=3 {
            save_with_backup(&path, format!("save {}", n).as_bytes()).unwrap();
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), "save 3");
        assert_eq!(fs::read_to_string(backup_path(&path)).unwrap(), "save 2");
    }

    #[test]
    fn first_save_creates_no_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paper_details.json");
        save_with_backup(&path, b"{}").unwrap();
        assert!(!backup_path(&path).exists());
    }
}
