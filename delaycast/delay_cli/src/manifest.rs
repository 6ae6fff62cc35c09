use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One prediction run as recorded in the JSONL manifest.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RunManifestEntry {
    pub run_id: String,
    pub command: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub input: PathBuf,
    #[serde(default)]
    pub config: Option<PathBuf>,
    pub status: String,
    #[serde(default)]
    pub input_rows: Option<usize>,
    #[serde(default)]
    pub output_rows: Option<usize>,
    #[serde(default)]
    pub error: Option<String>,
}

impl RunManifestEntry {
    pub fn new(command: &str, input: PathBuf, config: Option<PathBuf>) -> Self {
        Self {
            run_id: format!("run-{}", Uuid::new_v4()),
            command: command.into(),
            started_at: Utc::now(),
            finished_at: None,
            input,
            config,
            status: "running".into(),
            input_rows: None,
            output_rows: None,
            error: None,
        }
    }
}

#[derive(Clone, Copy)]
enum WriteMode {
    Append,
    Replace,
}

/// Writes `entries` as JSON lines, either after the existing runs or in
/// place of them.
fn write_entries<'a>(
    path: &Path,
    mode: WriteMode,
    entries: impl IntoIterator<Item = &'a RunManifestEntry>,
) -> Result<()> {
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut options = OpenOptions::new();
    match mode {
        WriteMode::Append => options.create(true).append(true),
        WriteMode::Replace => options.create(true).write(true).truncate(true),
    };
    let file = options
        .open(path)
        .with_context(|| format!("opening manifest {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for entry in entries {
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn append_manifest(path: &Path, entry: &RunManifestEntry) -> Result<()> {
    write_entries(path, WriteMode::Append, [entry])
}

/// All recorded runs in file order; a missing manifest has none.
pub fn read_manifest(path: &Path) -> Result<Vec<RunManifestEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).with_context(|| format!("opening manifest {}", path.display()))?;
    BufReader::new(file)
        .lines()
        .enumerate()
        .filter(|(_, line)| !matches!(line, Ok(text) if text.trim().is_empty()))
        .map(|(number, line)| -> Result<RunManifestEntry> {
            let line = line?;
            serde_json::from_str(&line).with_context(|| {
                format!("parsing manifest line {} in {}", number + 1, path.display())
            })
        })
        .collect()
}

/// Rewrites the manifest with `update` applied to the matching run.
pub fn update_run(
    path: &Path,
    run_id: &str,
    update: impl Fn(&mut RunManifestEntry),
) -> Result<()> {
    let mut entries = read_manifest(path)?;
    let mut matched = entries.iter_mut().filter(|entry| entry.run_id == run_id).peekable();
    if matched.peek().is_none() {
        return Ok(());
    }
    matched.for_each(update);
    write_entries(path, WriteMode::Replace, &entries)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn appends_and_updates_runs() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("logs/runs.jsonl");
        let first = RunManifestEntry::new("predict", PathBuf::from("a.csv"), None);
        let second = RunManifestEntry::new("predict", PathBuf::from("b.csv"), None);
        append_manifest(&manifest, &first).unwrap();
        append_manifest(&manifest, &second).unwrap();

        update_run(&manifest, &first.run_id, |entry| {
            entry.status = "completed".into();
            entry.output_rows = Some(3);
        })
        .unwrap();

        let entries = read_manifest(&manifest).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, "completed");
        assert_eq!(entries[0].output_rows, Some(3));
        assert_eq!(entries[1], second);
    }

    #[test]
    fn missing_manifest_reads_empty() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("none.jsonl");
        assert!(read_manifest(&manifest).unwrap().is_empty());
        update_run(&manifest, "run-x", |entry| entry.status = "failed".into()).unwrap();
        assert!(!manifest.exists());
    }

    #[test]
    fn skips_blank_lines_and_names_bad_ones() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("runs.jsonl");
        let entry = RunManifestEntry::new("predict", PathBuf::from("a.csv"), None);
        append_manifest(&manifest, &entry).unwrap();
        let mut file = OpenOptions::new().append(true).open(&manifest).unwrap();
        file.write_all(b"\n  \n").unwrap();
        assert_eq!(read_manifest(&manifest).unwrap(), vec![entry]);

        file.write_all(b"not json\n").unwrap();
        let err = read_manifest(&manifest).unwrap_err();
        assert!(format!("{err:#}").contains("line 4"));
    }
}
