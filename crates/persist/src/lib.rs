//! kubesnap persistence: one pretty-printed JSON array per snapshot key.
//! Keep code tiny and predictable.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use kubesnap_core::{ClusterSnapshot, InstanceRecord, PersistError, TypeSnapshot};
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{debug, info, warn};

/// What [`persist`] managed to write.
#[derive(Debug)]
pub struct PersistReport {
    pub dir: PathBuf,
    /// Files written, in key order.
    pub written: Vec<PathBuf>,
    /// Records in the files that were written.
    pub records: usize,
    /// Per-key failures; the remaining keys were still written.
    pub failures: Vec<PersistError>,
}

impl PersistReport {
    pub fn is_complete(&self) -> bool { self.failures.is_empty() }
}

/// File name for a snapshot key.
pub fn file_name(key: &str) -> String { format!("{}.json", key) }

fn valid_key(key: &str) -> bool {
    !key.is_empty() && key != "." && key != ".." && !key.contains(['/', '\\', '\0'])
}

/// Rebuild objects with their keys in sorted order, independent of how the
/// underlying map orders them.
fn sorted(v: serde_json::Value) -> serde_json::Value {
    match v {
        serde_json::Value::Object(map) => {
            let mut fields: Vec<_> = map.into_iter().collect();
            fields.sort_by(|a, b| a.0.cmp(&b.0));
            serde_json::Value::Object(fields.into_iter().map(|(k, v)| (k, sorted(v))).collect())
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}

/// Render a type snapshot as a 4-space indented JSON array with sorted keys.
pub fn render(snapshot: &TypeSnapshot) -> Result<Vec<u8>, serde_json::Error> {
    let items: Vec<serde_json::Value> = snapshot.iter().map(|r| sorted(r.raw().clone())).collect();
    let mut buf = Vec::with_capacity(4096);
    let fmt = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, fmt);
    items.serialize(&mut ser)?;
    buf.push(b'\n');
    Ok(buf)
}

/// Write every key of `snapshot` to `<dir>/<key>.json`, creating `dir` first.
///
/// Existing files are overwritten. Failing to create the directory is fatal;
/// a failing key is recorded in the report and the rest are still written.
pub fn persist(snapshot: &ClusterSnapshot, dir: impl AsRef<Path>) -> Result<PersistReport, PersistError> {
    let started = std::time::Instant::now();
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir).map_err(|source| PersistError::CreateDir { path: dir.to_path_buf(), source })?;

    let mut report = PersistReport { dir: dir.to_path_buf(), written: Vec::with_capacity(snapshot.len()), records: 0, failures: Vec::new() };
    for (key, types) in snapshot.iter() {
        match write_one(dir, key, types) {
            Ok(path) => {
                debug!(key, path = %path.display(), count = types.len(), "written");
                counter!("kubesnap_persist_write_total", 1u64);
                report.written.push(path);
                report.records += types.len();
            }
            Err(e) => {
                warn!(key, error = %e, "write failed; continuing");
                counter!("kubesnap_persist_errors_total", 1u64);
                report.failures.push(e);
            }
        }
    }
    histogram!("kubesnap_persist_ms", started.elapsed().as_secs_f64() * 1000.0);
    info!(dir = %dir.display(), files = report.written.len(), records = report.records, failed = report.failures.len(), "snapshot persisted");
    Ok(report)
}

fn write_one(dir: &Path, key: &str, types: &TypeSnapshot) -> Result<PathBuf, PersistError> {
    if !valid_key(key) {
        return Err(PersistError::InvalidKey { key: key.to_string() });
    }
    let bytes = render(types).map_err(|source| PersistError::Serialize { key: key.to_string(), source })?;
    let path = dir.join(file_name(key));
    std::fs::write(&path, bytes).map_err(|source| PersistError::Write { key: key.to_string(), path: path.clone(), source })?;
    Ok(path)
}

/// Read a directory written by [`persist`] back into a snapshot.
///
/// Only `*.json` files are considered; the file stem is the key.
pub fn load(dir: impl AsRef<Path>) -> Result<ClusterSnapshot, PersistError> {
    let dir = dir.as_ref();
    let read_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| PersistError::Read { path, source }
    };
    let mut entries = Vec::new();
    for dirent in std::fs::read_dir(dir).map_err(read_err(dir))? {
        let path = dirent.map_err(read_err(dir))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(key) = path.file_stem().and_then(|s| s.to_str()).map(str::to_owned) else { continue };
        let bytes = std::fs::read(&path).map_err(read_err(&path))?;
        let items: Vec<InstanceRecord> =
            serde_json::from_slice(&bytes).map_err(|source| PersistError::Parse { path: path.clone(), source })?;
        entries.push((key, TypeSnapshot::new(items)));
    }
    Ok(ClusterSnapshot::from_entries(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_must_be_plain_file_names() {
        assert!(valid_key("pods"));
        assert!(valid_key("deployments.v1.apps"));
        assert!(!valid_key(""));
        assert!(!valid_key(".."));
        assert!(!valid_key("a/b"));
        assert!(!valid_key("a\\b"));
    }

    #[test]
    fn render_sorts_keys_and_indents() {
        let snap = TypeSnapshot::new(vec![InstanceRecord::new(json!({"metadata": {"name": "a"}, "kind": "Pod", "apiVersion": "v1"}))]);
        let out = String::from_utf8(render(&snap).unwrap()).unwrap();
        let expected = "[\n    {\n        \"apiVersion\": \"v1\",\n        \"kind\": \"Pod\",\n        \"metadata\": {\n            \"name\": \"a\"\n        }\n    }\n]\n";
        assert_eq!(out, expected);
    }

    #[test]
    fn render_is_stable() {
        let snap = TypeSnapshot::new(vec![InstanceRecord::new(json!({"b": [{"z": 1, "y": 2}], "a": null}))]);
        assert_eq!(render(&snap).unwrap(), render(&snap.clone()).unwrap());
    }
}
