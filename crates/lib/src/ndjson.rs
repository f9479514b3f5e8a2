//! Newline-delimited JSON files shared by the ledger journal and the orphan store.
//!
//! Writers take an exclusive advisory lock on the file for the duration of the append.

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// Append one JSON line per record. Creates the parent directory and the file if needed.
pub fn append_records<T: Serialize>(path: &Path, records: &[T]) -> std::io::Result<usize> {
    if records.is_empty() {
        return Ok(0);
    }
    let mut buf = Vec::new();
    for r in records {
        serde_json::to_writer(&mut buf, r)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        buf.push(b'\n');
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.lock_exclusive()?;
    let written = file.write_all(&buf).and_then(|_| file.flush());
    let unlocked = FileExt::unlock(&file);
    written?;
    unlocked?;
    Ok(records.len())
}

/// Read every parseable record. Lines that fail to parse are skipped with a warning.
/// A missing file yields an empty list.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> std::io::Result<Vec<T>> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut out = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(r) => out.push(r),
            Err(e) => log::warn!("{}:{}: skipping unreadable record: {}", path.display(), n + 1, e),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_read_skips_garbage() {
        let dir = std::env::temp_dir().join(format!("switchboard-ndjson-{}", uuid::Uuid::new_v4()));
        let path = dir.join("records.ndjson");
        assert!(read_records::<serde_json::Value>(&path).unwrap().is_empty());
        append_records(&path, &[serde_json::json!({"a": 1})]).unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut f| f.write_all(b"not json\n"))
            .unwrap();
        append_records(&path, &[serde_json::json!({"a": 2})]).unwrap();
        let back: Vec<serde_json::Value> = read_records(&path).unwrap();
        assert_eq!(back, vec![serde_json::json!({"a": 1}), serde_json::json!({"a": 2})]);
        let _ = std::fs::remove_dir_all(dir);
    }
}
