//! Time-series store sink.
//!
//! Each signal becomes one record `(device, timestamp_ms, [measurement],
//! [value])` with a backtick-quoted measurement and a stringified value.
//! Writes are synchronous, one per signal, with no buffering or retry.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use sigrelay_core::coercion::{quote_measurement, store_value_string};
use sigrelay_core::{Signal, StoreWriteError};
use tracing::{debug, info};

/// Direct-write time-series store.
pub trait SeriesStore: Send + Sync {
    /// Insert one record of string values.
    fn insert_str_record(
        &self,
        device_id: &str,
        timestamp_ms: i64,
        measurements: &[String],
        values: &[String],
    ) -> Result<(), StoreWriteError>;

    /// Release the store. Idempotent.
    fn close(&self) -> Result<(), StoreWriteError>;
}

/// Write one signal, applying measurement quoting and value coercion.
pub fn write_signal(
    store: &dyn SeriesStore,
    device_id: &str,
    signal: &Signal,
) -> Result<(), StoreWriteError> {
    let value = store_value_string(&signal.name, &signal.value)?;
    let measurement = quote_measurement(&signal.name);
    debug!(name = %signal.name, %value, timestamp_ms = signal.timestamp_ms, "store write");
    store.insert_str_record(device_id, signal.timestamp_ms, &[measurement], &[value])
}

#[derive(Serialize)]
struct StoreRecord<'a> {
    device: &'a str,
    timestamp: i64,
    measurements: &'a [String],
    values: &'a [String],
}

type Sink = BufWriter<Box<dyn Write + Send>>;

/// Store that appends one JSON object per record, flushed per write.
pub struct JsonlStore {
    writer: Mutex<Option<Sink>>,
    records: AtomicU64,
}

impl JsonlStore {
    /// Open `path` for appending, or stdout when `None`.
    pub fn open(path: Option<&Path>) -> Result<Self, StoreWriteError> {
        let sink: Box<dyn Write + Send> = match path {
            Some(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                info!(path = %path.display(), "writing store records");
                Box::new(file)
            }
            None => Box::new(std::io::stdout()),
        };
        Ok(Self::from_writer(sink))
    }

    /// Wrap an arbitrary writer.
    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(Some(BufWriter::new(writer))),
            records: AtomicU64::new(0),
        }
    }

    /// Records written so far.
    pub fn records_written(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }
}

impl SeriesStore for JsonlStore {
    fn insert_str_record(
        &self,
        device_id: &str,
        timestamp_ms: i64,
        measurements: &[String],
        values: &[String],
    ) -> Result<(), StoreWriteError> {
        if measurements.len() != values.len() {
            return Err(StoreWriteError::Rejected(format!(
                "{} measurements but {} values",
                measurements.len(),
                values.len()
            )));
        }

        let line = serde_json::to_string(&StoreRecord {
            device: device_id,
            timestamp: timestamp_ms,
            measurements,
            values,
        })
        .map_err(|e| StoreWriteError::Rejected(e.to_string()))?;

        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(StoreWriteError::Closed)?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        let _ = self.records.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close(&self) -> Result<(), StoreWriteError> {
        let Some(mut writer) = self.writer.lock().take() else {
            return Ok(());
        };
        writer.flush()?;
        info!(records = self.records_written(), "store closed");
        Ok(())
    }
}
