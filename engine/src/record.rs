//! Trial result records, result sinks and the status snapshot.
//!
//! A record is a flat string-keyed map so new columns can be appended
//! without breaking readers. Sinks receive each record exactly once, in
//! trial order.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Immutable result of one trial.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct TrialRecord {
    fields: BTreeMap<String, Value>,
}

impl TrialRecord {
    pub(crate) fn from_fields(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Single-line JSON encoding.
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.fields)?)
    }
}

// ── Sinks ───────────────────────────────────────────────────

/// Destination for finished trial records.
pub trait ResultSink {
    fn emit(&mut self, record: &TrialRecord) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// In-memory sink. Clones share the same storage, so a test can keep a
/// handle while the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<TrialRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TrialRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultSink for MemorySink {
    fn emit(&mut self, record: &TrialRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W: Write> {
    writer: W,
    written: usize,
}

impl JsonLinesSink<BufWriter<File>> {
    /// Create (truncating) a results file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ResultSink for JsonLinesSink<W> {
    fn emit(&mut self, record: &TrialRecord) -> Result<()> {
        let line = record.to_json_line()?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

// ── Status ──────────────────────────────────────────────────

/// Read-only view of engine progress for a monitoring collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub block_index: Option<usize>,
    pub block_name: Option<String>,
    /// Unit index within the current block.
    pub trial_index: Option<usize>,
    /// Trials that ran to their end.
    pub trials_completed: usize,
    pub trials_aborted: usize,
    pub phase: String,
    pub elapsed_ms: f64,
    pub tracking_lost: bool,
    pub calibrated: bool,
    pub finished: bool,
}

impl StatusSnapshot {
    pub fn status_sexp(&self) -> String {
        let opt_num = |v: Option<usize>| v.map_or_else(|| "nil".to_string(), |n| n.to_string());
        format!(
            "(:block {} :block-name {} :trial {} :completed {} :aborted {} :phase :{} :elapsed-ms {:.0} :tracking-lost {} :calibrated {} :finished {})",
            opt_num(self.block_index),
            match &self.block_name {
                Some(n) => format!("\"{}\"", n),
                None => "nil".to_string(),
            },
            opt_num(self.trial_index),
            self.trials_completed,
            self.trials_aborted,
            self.phase,
            self.elapsed_ms,
            if self.tracking_lost { "t" } else { "nil" },
            if self.calibrated { "t" } else { "nil" },
            if self.finished { "t" } else { "nil" },
        )
    }
}
