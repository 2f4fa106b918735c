//! Checksum command construction and in-process comparison.
//!
//! `checksum_file`/`checksum_dir` still build [`remote_exec::Command`]s,
//! because the hashing has to happen on whatever host holds the file. But
//! comparing two already-downloaded `.sha256` files is pure string work, so
//! it runs in this process instead of through another shelled-out `sed`/`test`
//! pipeline.

use remote_exec::Command;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChecksumError {
    #[error("malformed checksum line {0:?}, expected '<hex>  <basename>'")]
    MalformedLine(String),
    #[error("checksum mismatch: {ours} for {ours_name:?} vs {theirs} for {theirs_name:?}")]
    Mismatch {
        ours: String,
        ours_name: String,
        theirs: String,
        theirs_name: String,
    },
    #[error("checksum files have different entry counts: {0} vs {1}")]
    EntryCountMismatch(usize, usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumEntry {
    pub hex: String,
    pub basename: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumFile(pub Vec<ChecksumEntry>);

impl ChecksumFile {
    /// Parses the `sha256sum`-style format: `<hex>  <basename>` per line,
    /// tolerant of the single or double space `sha256sum` emits depending on
    /// whether it ran in text or binary mode.
    pub fn parse(contents: &str) -> Result<Self, ChecksumError> {
        let mut entries = Vec::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(2, char::is_whitespace);
            let hex = parts.next().unwrap_or_default();
            let basename = parts.next().unwrap_or_default().trim_start();
            if hex.is_empty() || basename.is_empty() {
                return Err(ChecksumError::MalformedLine(line.to_string()));
            }
            entries.push(ChecksumEntry { hex: hex.to_string(), basename: basename.to_string() });
        }
        Ok(Self(entries))
    }
}

/// Builds the command that hashes a single file into `<path>.sha256`.
pub fn checksum_file(path: &str) -> Command {
    Command::new("sh")
        .arg("-c")
        .arg(format!("sha256sum {path} > {path}.sha256"))
}

/// Builds the command that hashes every non-index file directly under `dir`
/// into `<dir>.sha256`. "Index files" are entries whose basename starts with
/// `i`, matching the data directory's own naming convention.
pub fn checksum_dir(dir: &str) -> Command {
    Command::new("sh").arg("-c").arg(format!(
        "cd {dir} && find . -maxdepth 1 -type f ! -name 'i*' -exec sha256sum {{}} + > {dir}.sha256"
    ))
}

/// Builds the command that prints a `.sha256` file's contents to stdout, so
/// the caller can parse it with [`ChecksumFile::parse`] without a separate
/// download/read-back round trip through local disk.
pub fn cat_file(path: &str) -> Command {
    Command::new("cat").arg(path)
}

/// Compares two parsed checksum files entry-by-entry, ignoring basenames and
/// comparing only the hex digest at each position - mirrors the original
/// `sed 's/ .*\///' | diff` pipeline's "any mismatch is a failure" semantics,
/// but as a direct in-process comparison.
pub fn compare(ours: &ChecksumFile, theirs: &ChecksumFile) -> Result<(), ChecksumError> {
    if ours.0.len() != theirs.0.len() {
        return Err(ChecksumError::EntryCountMismatch(ours.0.len(), theirs.0.len()));
    }
    for (a, b) in ours.0.iter().zip(theirs.0.iter()) {
        if a.hex != b.hex {
            return Err(ChecksumError::Mismatch {
                ours: a.hex.clone(),
                ours_name: a.basename.clone(),
                theirs: b.hex.clone(),
                theirs_name: b.basename.clone(),
            });
        }
    }
    Ok(())
}
