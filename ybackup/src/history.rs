//! Append-only JSON-lines invocation log: one line per run, written via
//! `serde_json::to_writer` against a file opened for append, never truncated.

use std::fs::OpenOptions;
use std::io::Write;

use camino::Utf8Path;
use chrono::Utc;
use serde::Serialize;

#[derive(Serialize)]
pub struct HistoryEntry<'a> {
    pub command: &'a str,
    pub args: Vec<String>,
    pub started_at: String,
    pub finished_at: String,
    pub result: HistoryResult,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryResult {
    Success,
    Failure { error: String },
}

pub fn append(path: &Utf8Path, command: &str, args: Vec<String>, started_at: chrono::DateTime<Utc>, result: HistoryResult) -> std::io::Result<()> {
    let entry = HistoryEntry {
        command,
        args,
        started_at: started_at.to_rfc3339(),
        finished_at: Utc::now().to_rfc3339(),
        result,
    };
    let mut file = OpenOptions::new().append(true).create(true).open(path)?;
    serde_json::to_writer(&mut file, &entry)?;
    writeln!(file)?;
    Ok(())
}
