//! Persistent trace artifacts
//!
//! Everything lands under one configuration directory:
//!
//! - `method_ids.txt` — the method catalog, one line per method, truncated on
//!   the first write of a run and appended to afterwards
//! - `method_calls.txt` — newline-delimited call records in execution order
//! - `traversals.txt` — object-graph traversal blocks, appended
//! - `<source-key>.bb` — per-source basic-block leader lines, always fully
//!   rewritten as the sorted union of old and new so the file stays
//!   canonical across multiple rewrite passes of the same source

use anyhow::{Context, Result};
use std::collections::{BTreeSet, HashSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const CATALOG_FILE: &str = "method_ids.txt";
pub const CALLS_FILE: &str = "method_calls.txt";
pub const TRAVERSALS_FILE: &str = "traversals.txt";

/// File-system sink for trace artifacts
#[derive(Debug)]
pub struct ArtifactStore {
    dir: PathBuf,
    catalog_started: bool,
    calls_started: bool,
    /// Leader files already created this run; keeps a second class compiled
    /// from the same source from truncating accumulated leaders
    leader_files_seen: HashSet<String>,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            catalog_started: false,
            calls_started: false,
            leader_files_seen: HashSet::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Forget per-run state (test isolation)
    pub fn reset(&mut self) {
        self.catalog_started = false;
        self.calls_started = false;
        self.leader_files_seen.clear();
    }

    /// Append catalog lines; the first write of a run truncates
    pub fn append_catalog(&mut self, lines: &[String]) -> Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        let truncate = !self.catalog_started;
        self.write_lines(CATALOG_FILE, lines, truncate)?;
        self.catalog_started = true;
        Ok(())
    }

    /// Append call records; the first write of a run truncates
    pub fn append_calls(&mut self, records: &[String]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let truncate = !self.calls_started;
        self.write_lines(CALLS_FILE, records, truncate)?;
        self.calls_started = true;
        Ok(())
    }

    /// Append traversal blocks
    pub fn append_traversals(&mut self, blocks: &[String]) -> Result<()> {
        if blocks.is_empty() {
            return Ok(());
        }
        self.write_lines(TRAVERSALS_FILE, blocks, false)
    }

    /// Create (truncate) a source's leader file once per run
    pub fn init_leader_file(&mut self, source_key: &str) -> Result<()> {
        if self.leader_files_seen.contains(source_key) {
            return Ok(());
        }
        self.leader_files_seen.insert(source_key.to_string());
        self.ensure_dir()?;
        let path = self.leader_path(source_key);
        fs::write(&path, "").with_context(|| format!("failed to create {}", path.display()))?;
        Ok(())
    }

    /// Merge leaders into a source's leader file
    ///
    /// Reads whatever the file already holds, unions in the new set, and
    /// rewrites the whole file sorted and deduplicated. Re-running on an
    /// already-canonical file is byte-identical.
    pub fn merge_leader_file(&mut self, source_key: &str, leaders: &BTreeSet<u32>) -> Result<()> {
        self.ensure_dir()?;
        let path = self.leader_path(source_key);

        let mut merged: BTreeSet<u32> = leaders.clone();
        if path.exists() {
            let existing = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            for line in existing.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let n: u32 = line
                    .parse()
                    .with_context(|| format!("bad leader line {line:?} in {}", path.display()))?;
                merged.insert(n);
            }
        }

        let mut out = String::new();
        for n in &merged {
            out.push_str(&n.to_string());
            out.push('\n');
        }
        fs::write(&path, out).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Read a source's leader file back (used by tests and replay tooling)
    pub fn read_leader_file(&self, source_key: &str) -> Result<Vec<u32>> {
        let path = self.leader_path(source_key);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| {
                l.trim()
                    .parse()
                    .with_context(|| format!("bad leader line {l:?}"))
            })
            .collect()
    }

    fn leader_path(&self, source_key: &str) -> PathBuf {
        self.dir.join(format!("{source_key}.bb"))
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))
    }

    fn write_lines(&self, file: &str, lines: &[String], truncate: bool) -> Result<()> {
        self.ensure_dir()?;
        let path = self.dir.join(file);
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(truncate)
            .append(!truncate)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        for line in lines {
            writeln!(f, "{line}").with_context(|| format!("failed to write {}", path.display()))?;
        }
        Ok(())
    }
}
