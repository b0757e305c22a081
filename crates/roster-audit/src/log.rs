use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AuditError, AuditResult};
use crate::event::MergeEvent;
use crate::schema::MergeEventSchema;

/// Destination for merge events.
///
/// The merge engine records through this trait so that the file-backed log
/// can be swapped for another sink without touching the engine.
pub trait AuditSink: Send + Sync {
    /// Validate and durably record one event.
    fn record(&self, event: &MergeEvent) -> AuditResult<()>;
}

/// Flush strategy for the audit log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` after every event.
    EveryWrite,
    /// Rely on OS page-cache buffering.
    #[default]
    OsDefault,
}

/// A schema violation or parse failure found while verifying the log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidLine {
    /// 1-based line number.
    pub line: usize,
    pub reason: String,
}

/// Result of re-validating every line of the log.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuditVerification {
    pub valid: usize,
    pub invalid: Vec<InvalidLine>,
}

impl AuditVerification {
    pub fn is_clean(&self) -> bool {
        self.invalid.is_empty()
    }
}

/// Append-only JSON-lines audit log.
///
/// Each event is validated against [`MergeEventSchema`] and written as a
/// single `write` of one line, so concurrent appenders never interleave
/// partial lines. The parent directory is created on first append; reading
/// a log that does not exist yet yields no events.
pub struct AuditLog {
    path: PathBuf,
    schema: MergeEventSchema,
    sync_mode: SyncMode,
    append_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>, sync_mode: SyncMode) -> AuditResult<Self> {
        Ok(Self {
            path: path.into(),
            schema: MergeEventSchema::new()?,
            sync_mode,
            append_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Validate and append one event.
    pub fn append(&self, event: &MergeEvent) -> AuditResult<()> {
        let value = self.schema.validate_event(event)?;
        let mut line = serde_json::to_string(&value)?;
        line.push('\n');

        let _guard = self.append_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| AuditError::io(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| AuditError::io(&self.path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| AuditError::io(&self.path, e))?;
        if self.sync_mode == SyncMode::EveryWrite {
            file.sync_all().map_err(|e| AuditError::io(&self.path, e))?;
        }

        debug!(
            path = %self.path.display(),
            primary = %event.primary_id,
            merged = event.merged_ids.len(),
            "audit event appended"
        );
        Ok(())
    }

    /// Read every event, failing on the first malformed line.
    pub fn read_events(&self) -> AuditResult<Vec<MergeEvent>> {
        let mut events = Vec::new();
        for (index, line) in self.lines()?.into_iter().enumerate() {
            let value: serde_json::Value = serde_json::from_str(&line)?;
            self.schema.validate_value(&value).map_err(|e| {
                warn!(line = index + 1, error = %e, "invalid audit line");
                e
            })?;
            events.push(serde_json::from_value(value)?);
        }
        Ok(events)
    }

    /// Re-validate every line against the schema and report the bad ones.
    pub fn verify(&self) -> AuditResult<AuditVerification> {
        let mut report = AuditVerification::default();
        for (index, line) in self.lines()?.into_iter().enumerate() {
            let outcome = serde_json::from_str::<serde_json::Value>(&line)
                .map_err(AuditError::from)
                .and_then(|value| self.schema.validate_value(&value));
            match outcome {
                Ok(()) => report.valid += 1,
                Err(e) => report.invalid.push(InvalidLine {
                    line: index + 1,
                    reason: e.to_string(),
                }),
            }
        }
        debug!(valid = report.valid, invalid = report.invalid.len(), "audit log verified");
        Ok(report)
    }

    /// Non-empty lines of the log; a missing file has none.
    fn lines(&self) -> AuditResult<Vec<String>> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AuditError::io(&self.path, e)),
        };
        let mut lines = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| AuditError::io(&self.path, e))?;
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }
        Ok(lines)
    }
}

impl AuditSink for AuditLog {
    fn record(&self, event: &MergeEvent) -> AuditResult<()> {
        self.append(event)
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("path", &self.path)
            .field("sync_mode", &self.sync_mode)
            .finish()
    }
}
