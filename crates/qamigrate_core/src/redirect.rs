use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::transform::redirect_line;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectRecord {
    pub line: String,
}

impl RedirectRecord {
    pub fn new(legacy_url: &str, remote_url: &str) -> Result<Self> {
        Ok(Self {
            line: redirect_line(legacy_url, remote_url)?,
        })
    }

    /// Legacy path the record is keyed by when logs are merged.
    pub fn legacy_path(&self) -> Option<&str> {
        parse_redirect_key(&self.line)
    }
}

/// Append-only sink for redirect records.
#[derive(Debug)]
pub struct RedirectLog {
    path: Option<PathBuf>,
    records: Vec<RedirectRecord>,
}

impl RedirectLog {
    pub fn to_file(path: &Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
            records: Vec::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: Vec::new(),
        }
    }

    pub fn append(&mut self, record: RedirectRecord) -> Result<()> {
        if let Some(path) = &self.path {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open redirect log {}", path.display()))?;
            writeln!(file, "{}", record.line)
                .with_context(|| format!("failed to append to {}", path.display()))?;
        }
        self.records.push(record);
        Ok(())
    }

    pub fn records(&self) -> &[RedirectRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub base_entries: usize,
    pub patch_entries: usize,
    pub overridden: usize,
    pub skipped_lines: usize,
    pub written_entries: usize,
    pub output: String,
}

/// Key of a well-formed `redir <path> <url> permanent` line.
fn parse_redirect_key(line: &str) -> Option<&str> {
    let tokens = line.split_whitespace().collect::<Vec<_>>();
    if tokens.len() >= 4 && tokens[0] == "redir" {
        Some(tokens[1])
    } else {
        None
    }
}

#[derive(Debug, Default)]
struct RedirectEntries {
    keys: Vec<String>,
    lines: BTreeMap<String, String>,
}

impl RedirectEntries {
    fn insert(&mut self, key: &str, line: &str) -> bool {
        let replaced = self
            .lines
            .insert(key.to_string(), line.to_string())
            .is_some();
        if !replaced {
            self.keys.push(key.to_string());
        }
        replaced
    }
}

fn read_redirect_file(path: &Path, entries: &mut RedirectEntries) -> Result<(usize, usize, usize)> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read redirect log {}", path.display()))?;
    let (mut accepted, mut replaced, mut skipped) = (0, 0, 0);
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_redirect_key(line) {
            Some(key) => {
                accepted += 1;
                if entries.insert(key, line) {
                    replaced += 1;
                }
            }
            None => {
                warn!("skipping line in file '{}': {line}", path.display());
                skipped += 1;
            }
        }
    }
    Ok((accepted, replaced, skipped))
}

/// Merge two redirect logs: the patch wins per legacy path, first-seen order is kept.
pub fn merge_redirect_logs(base: &Path, patch: &Path, output: &Path) -> Result<MergeReport> {
    let mut entries = RedirectEntries::default();
    let (base_entries, _, base_skipped) = read_redirect_file(base, &mut entries)?;
    let (patch_entries, overridden, patch_skipped) = read_redirect_file(patch, &mut entries)?;

    let mut rendered = String::new();
    for key in &entries.keys {
        if let Some(line) = entries.lines.get(key) {
            rendered.push_str(line);
            rendered.push('\n');
        }
    }
    if let Some(parent) = output.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(output, rendered)
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!(
        "merged {} redirect entries into {}",
        entries.keys.len(),
        output.display()
    );

    Ok(MergeReport {
        base_entries,
        patch_entries,
        overridden,
        skipped_lines: base_skipped + patch_skipped,
        written_entries: entries.keys.len(),
        output: output.display().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{RedirectLog, RedirectRecord, merge_redirect_logs};

    #[test]
    fn file_log_appends_lines() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("redirects.log");
        let mut log = RedirectLog::to_file(&path);
        log.append(RedirectRecord::new("https://so.example/questions/1?x=1", "https://gh/d/1").expect("record"))
            .expect("append");
        log.append(RedirectRecord::new("https://so.example/a/2#2", "https://gh/d/1#c-2").expect("record"))
            .expect("append");

        let content = fs::read_to_string(&path).expect("read log");
        assert_eq!(
            content,
            "redir /questions/1 https://gh/d/1 permanent\nredir /a/2#2 https://gh/d/1#c-2 permanent\n"
        );
        assert_eq!(log.len(), 2);
        assert_eq!(log.records()[0].legacy_path(), Some("/questions/1"));
    }

    #[test]
    fn merge_lets_patch_win_and_keeps_first_seen_order() {
        let temp = tempdir().expect("tempdir");
        let base = temp.path().join("base.log");
        let patch = temp.path().join("patch.log");
        let output = temp.path().join("out/merged.log");
        fs::write(
            &base,
            "redir /questions/1201 https://github.com/org/repo/discussions/2809 permanent\n\
             invalid_line\n\
             \n\
             redir /questions/1202 https://github.com/org/repo/discussions/2810 permanent\n",
        )
        .expect("write base");
        fs::write(
            &patch,
            "redir /a/1203 https://github.com/org/repo/discussions/3001 permanent\n\
             \tredir\t/questions/1201\thttps://github.com/org/repo/discussions/3000\tpermanent \n",
        )
        .expect("write patch");

        let report = merge_redirect_logs(&base, &patch, &output).expect("merge");
        assert_eq!(report.base_entries, 2);
        assert_eq!(report.patch_entries, 2);
        assert_eq!(report.overridden, 1);
        assert_eq!(report.skipped_lines, 1);
        assert_eq!(report.written_entries, 3);

        let merged = fs::read_to_string(&output).expect("read merged");
        assert_eq!(
            merged.lines().collect::<Vec<_>>(),
            vec![
                "redir\t/questions/1201\thttps://github.com/org/repo/discussions/3000\tpermanent",
                "redir /questions/1202 https://github.com/org/repo/discussions/2810 permanent",
                "redir /a/1203 https://github.com/org/repo/discussions/3001 permanent",
            ]
        );
    }

    #[test]
    fn merge_fails_on_missing_input() {
        let temp = tempdir().expect("tempdir");
        let error = merge_redirect_logs(
            &temp.path().join("missing.log"),
            &temp.path().join("patch.log"),
            &temp.path().join("out.log"),
        )
        .expect_err("must fail");
        assert!(format!("{error:#}").contains("missing.log"));
    }
}
