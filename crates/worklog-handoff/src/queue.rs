use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use worklog_core::WorklogError;

use crate::document::{HandoffDocument, claimed_path};
use crate::retry::StatementExecutor;

const FILE_STAMP: &str = "%Y%m%dT%H%M%S%3fZ";
const CLAIMED_SUFFIX: &str = ".md.claimed";
const DONE_SUFFIX: &str = ".done";

/// A directory of pending handoff files, replayed oldest first.
#[derive(Debug, Clone)]
pub struct HandoffQueue {
    dir: PathBuf,
    host: String,
}

/// A handoff file this process has renamed out of the pending set.
#[derive(Debug)]
pub struct ClaimedHandoff {
    original: PathBuf,
    claimed: PathBuf,
}

impl ClaimedHandoff {
    pub fn path(&self) -> &Path {
        &self.claimed
    }

    pub fn read(&self) -> worklog_core::Result<HandoffDocument> {
        let content = std::fs::read_to_string(&self.claimed)?;
        HandoffDocument::parse(&content, &self.original)
    }

    /// The write was applied; drop the file. When it cannot be removed it is
    /// renamed to `.done` so stale-claim recovery never queues it again.
    pub fn complete(self) -> worklog_core::Result<()> {
        match std::fs::remove_file(&self.claimed) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(remove_err) => {
                let mut done = self.original.into_os_string();
                done.push(DONE_SUFFIX);
                let done = PathBuf::from(done);
                match std::fs::rename(&self.claimed, &done) {
                    Ok(()) => {
                        warn!(?done, error = %remove_err, "applied handoff kept as done marker");
                        Ok(())
                    }
                    Err(rename_err) => Err(WorklogError::HandoffFailed {
                        reason: format!(
                            "applied handoff {} could not be removed ({remove_err}) \
                             or marked done ({rename_err})",
                            self.claimed.display()
                        ),
                    }),
                }
            }
        }
    }

    /// Put the file back for a later attempt.
    pub fn release(self) -> worklog_core::Result<()> {
        std::fs::rename(&self.claimed, &self.original)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessReport {
    pub applied: usize,
    pub failed: usize,
    /// Claimed by another process first.
    pub skipped: usize,
    pub errors: Vec<(PathBuf, String)>,
    /// The run stopped on a retryable failure; the database is still busy.
    pub stalled: bool,
}

impl ProcessReport {
    pub fn merge(&mut self, other: ProcessReport) {
        self.applied += other.applied;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.errors.extend(other.errors);
        self.stalled = other.stalled;
    }
}

impl HandoffQueue {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_host(dir, hostname())
    }

    pub fn with_host(dir: impl Into<PathBuf>, host: impl AsRef<str>) -> Self {
        Self {
            dir: dir.into(),
            host: sanitize_host(host.as_ref()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a new handoff file named `{host}-{timestamp}.md`. The document is
    /// written and synced under a temporary name, then moved into place without
    /// replacing an existing file; on a name collision the timestamp moves on
    /// by 1 ms. Readers never see a partial file.
    pub fn create(&self, document: &HandoffDocument) -> worklog_core::Result<PathBuf> {
        let failed = |what: &str, e: std::io::Error| WorklogError::HandoffFailed {
            reason: format!("{what} in {}: {e}", self.dir.display()),
        };
        std::fs::create_dir_all(&self.dir).map_err(|e| failed("cannot create handoff directory", e))?;
        let body = document.render()?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".handoff-")
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(|e| failed("cannot create temporary handoff", e))?;
        tmp.write_all(body.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| failed("cannot write handoff", e))?;

        let mut stamp = Utc::now();
        for _ in 0..1000 {
            let path = self.dir.join(format!(
                "{}-{}.md",
                self.host,
                stamp.format(FILE_STAMP)
            ));
            match tmp.persist_noclobber(&path) {
                Ok(_) => {
                    info!(?path, title = %document.title, "write deferred to handoff");
                    return Ok(path);
                }
                Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                    tmp = e.file;
                    stamp += chrono::Duration::milliseconds(1);
                }
                Err(e) => return Err(failed("cannot publish handoff", e.error)),
            }
        }
        Err(WorklogError::HandoffFailed {
            reason: format!("no free handoff file name in {}", self.dir.display()),
        })
    }

    /// Pending handoff files, oldest first by the timestamp in the name.
    pub fn pending(&self) -> worklog_core::Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files: Vec<(String, String, PathBuf)> = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
                continue;
            };
            if !name.ends_with(".md") || !path.is_file() {
                continue;
            }
            files.push((sort_key(&name), name, path));
        }
        files.sort();
        Ok(files.into_iter().map(|(_, _, path)| path).collect())
    }

    /// Files currently claimed by some process.
    pub fn claimed(&self) -> worklog_core::Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(CLAIMED_SUFFIX))
            {
                out.push(path);
            }
        }
        out.sort();
        Ok(out)
    }

    /// Claim a pending file by renaming it. `None` means another process got
    /// there first.
    pub fn claim(&self, path: &Path) -> worklog_core::Result<Option<ClaimedHandoff>> {
        let claimed = claimed_path(path);
        match std::fs::rename(path, &claimed) {
            Ok(()) => {
                // Stamp the claim time so stale claims can be found.
                if let Err(e) = OpenOptions::new()
                    .write(true)
                    .open(&claimed)
                    .and_then(|f| f.set_modified(SystemTime::now()))
                {
                    debug!(?claimed, error = %e, "could not stamp claim time");
                }
                Ok(Some(ClaimedHandoff {
                    original: path.to_path_buf(),
                    claimed,
                }))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Release claims older than `max_age`, left behind by a process that died
    /// mid-replay. Returns how many were released.
    pub fn recover_stale(&self, max_age: Duration) -> worklog_core::Result<usize> {
        let now = SystemTime::now();
        let mut released = 0;
        for claimed in self.claimed()? {
            let modified = match std::fs::metadata(&claimed).and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age < max_age {
                continue;
            }
            let name = claimed.to_string_lossy();
            let original = PathBuf::from(name.trim_end_matches(".claimed"));
            match std::fs::rename(&claimed, &original) {
                Ok(()) => {
                    warn!(?original, ?age, "released stale handoff claim");
                    released += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(released)
    }

    /// Replay pending handoffs in order. Applied files are deleted. A file that
    /// fails stays for a later run; a retryable failure (the database is still
    /// busy) stops the run so later writes never overtake earlier ones.
    pub fn process<E: StatementExecutor + ?Sized>(
        &self,
        executor: &E,
    ) -> worklog_core::Result<ProcessReport> {
        let mut report = ProcessReport::default();
        for path in self.pending()? {
            let Some(claim) = self.claim(&path)? else {
                report.skipped += 1;
                continue;
            };
            let document = match claim.read() {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(?path, error = %e, "unreadable handoff left in place");
                    claim.release()?;
                    report.failed += 1;
                    report.errors.push((path, e.to_string()));
                    continue;
                }
            };
            match executor.execute(document.statement()) {
                Ok(_) => {
                    report.applied += 1;
                    debug!(?path, title = %document.title, "handoff applied");
                    if let Err(e) = claim.complete() {
                        error!(?path, error = %e, "applied handoff left behind, remove it by hand");
                        report.errors.push((path, e.to_string()));
                    }
                }
                Err(e) => {
                    claim.release()?;
                    report.failed += 1;
                    let stop = e.is_retryable();
                    warn!(?path, error = %e, "handoff replay failed");
                    report.errors.push((path, e.to_string()));
                    if stop {
                        report.stalled = true;
                        break;
                    }
                }
            }
        }
        if report.applied > 0 || report.failed > 0 {
            info!(
                applied = report.applied,
                failed = report.failed,
                skipped = report.skipped,
                "handoff queue processed"
            );
        }
        Ok(report)
    }
}

/// Ordering key: the timestamp part of `{host}-{stamp}.md`, or the whole name
/// when it does not follow that pattern.
fn sort_key(name: &str) -> String {
    let stem = name.trim_end_matches(".md");
    match stem.rsplit_once('-') {
        Some((_, stamp)) if is_stamp(stamp) => stamp.to_string(),
        _ => format!("~{stem}"),
    }
}

/// `YYYYMMDDTHHMMSSmmmZ`; fixed width, so it sorts as text.
fn is_stamp(stamp: &str) -> bool {
    let b = stamp.as_bytes();
    b.len() == 19
        && b[8] == b'T'
        && b[18] == b'Z'
        && b.iter()
            .enumerate()
            .all(|(i, c)| i == 8 || i == 18 || c.is_ascii_digit())
}

fn sanitize_host(host: &str) -> String {
    let cleaned: String = host
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".into()
    } else {
        cleaned
    }
}

/// This machine's host name.
pub fn hostname() -> String {
    std::process::Command::new("hostname")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .unwrap_or_else(|| "unknown".into())
}
