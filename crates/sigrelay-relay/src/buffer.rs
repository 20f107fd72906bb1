//! Latest-value-wins signal buffer shared by the producer and the relay loop.
//!
//! The producer (subscription callback, on a source-owned OS thread) upserts;
//! the relay loop (a tokio task) drains. Both sides take the same
//! `parking_lot::Mutex` for a short, non-awaiting critical section, so the
//! one primitive is safe from either execution context.

use std::collections::HashMap;

use parking_lot::Mutex;
use sigrelay_core::{Signal, SignalValue};

/// One entry of a drained batch.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchEntry {
    /// Dotted-path signal name.
    pub name: String,
    /// Most recent value seen for the name.
    pub value: SignalValue,
    /// Timestamp of that value in ms.
    pub timestamp_ms: i64,
}

/// A non-empty snapshot taken by [`SignalBuffer::drain`], ordered by name.
#[derive(Clone, Debug, PartialEq)]
pub struct RelayBatch {
    entries: Vec<BatchEntry>,
}

impl RelayBatch {
    /// Build a batch; `None` when `entries` is empty.
    pub fn from_entries(entries: Vec<BatchEntry>) -> Option<Self> {
        (!entries.is_empty()).then_some(Self { entries })
    }

    /// Entries in batch order.
    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    /// Number of entries (always at least one).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false`; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug)]
struct Latest {
    value: SignalValue,
    timestamp_ms: i64,
}

/// Mapping from signal name to its latest `(value, timestamp)` since the last drain.
#[derive(Debug, Default)]
pub struct SignalBuffer {
    entries: Mutex<HashMap<String, Latest>>,
}

impl SignalBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `name`.
    pub fn upsert(&self, name: impl Into<String>, value: SignalValue, timestamp_ms: i64) {
        let _ = self.entries.lock().insert(
            name.into(),
            Latest {
                value,
                timestamp_ms,
            },
        );
    }

    /// Insert or overwrite from a relay [`Signal`].
    pub fn upsert_signal(&self, signal: Signal) {
        self.upsert(signal.name, signal.value, signal.timestamp_ms);
    }

    /// Atomically take every pending entry and leave the buffer empty.
    ///
    /// Returns `None` without blocking beyond lock acquisition when nothing
    /// is pending.
    pub fn drain(&self) -> Option<RelayBatch> {
        let taken = std::mem::take(&mut *self.entries.lock());
        if taken.is_empty() {
            return None;
        }

        let mut entries: Vec<BatchEntry> = taken
            .into_iter()
            .map(|(name, latest)| BatchEntry {
                name,
                value: latest.value,
                timestamp_ms: latest.timestamp_ms,
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        RelayBatch::from_entries(entries)
    }

    /// Number of names currently pending.
    pub fn pending(&self) -> usize {
        self.entries.lock().len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn drain_empty_returns_none() {
        let buffer = SignalBuffer::new();
        assert!(buffer.drain().is_none());
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn drain_clears_buffer() {
        let buffer = SignalBuffer::new();
        buffer.upsert("a.b", SignalValue::Int(1), 10);
        let batch = buffer.drain().unwrap();
        assert_eq!(batch.len(), 1);
        assert!(buffer.drain().is_none());
    }

    #[test]
    fn repeated_upserts_collapse_to_latest() {
        let buffer = SignalBuffer::new();
        for i in 0..1000 {
            buffer.upsert("Vehicle.Speed", SignalValue::Int(i), i);
        }
        let batch = buffer.drain().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.entries()[0].value, SignalValue::Int(999));
        assert_eq!(batch.entries()[0].timestamp_ms, 999);
    }

    #[test]
    fn batch_is_sorted_by_name() {
        let buffer = SignalBuffer::new();
        buffer.upsert("a.c", SignalValue::Int(2), 1);
        buffer.upsert("a.a", SignalValue::Int(0), 1);
        buffer.upsert("a.b", SignalValue::Int(1), 1);
        let names: Vec<_> = buffer
            .drain()
            .unwrap()
            .entries()
            .iter()
            .map(|e| e.name.clone())
            .collect();
        assert_eq!(names, ["a.a", "a.b", "a.c"]);
    }

    #[test]
    fn upsert_signal_uses_millis() {
        let buffer = SignalBuffer::new();
        buffer.upsert_signal(sigrelay_core::SourceSignal::new("a.b", true, 2_000_500).into_signal());
        let batch = buffer.drain().unwrap();
        assert_eq!(batch.entries()[0].timestamp_ms, 2000);
    }

    #[test]
    fn empty_batch_cannot_be_built() {
        assert!(RelayBatch::from_entries(Vec::new()).is_none());
    }

    #[test]
    fn concurrent_producer_never_loses_or_duplicates() {
        const NAMES: usize = 8;
        const ROUNDS: i64 = 20_000;

        let buffer = Arc::new(SignalBuffer::new());
        let done = Arc::new(AtomicBool::new(false));

        let producer = {
            let buffer = buffer.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                for round in 0..ROUNDS {
                    for n in 0..NAMES {
                        buffer.upsert(format!("a.s{n}"), SignalValue::Int(round), round);
                    }
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let mut last_seen: HashMap<String, i64> = HashMap::new();
        loop {
            let finished = done.load(Ordering::SeqCst);
            if let Some(batch) = buffer.drain() {
                for entry in batch.entries() {
                    let SignalValue::Int(v) = entry.value else {
                        panic!("unexpected value type");
                    };
                    if let Some(prev) = last_seen.insert(entry.name.clone(), v) {
                        assert!(v > prev, "{} delivered {v} after {prev}", entry.name);
                    }
                }
            }
            if finished && buffer.pending() == 0 {
                break;
            }
        }
        producer.join().unwrap();

        assert_eq!(last_seen.len(), NAMES);
        assert!(last_seen.values().all(|v| *v == ROUNDS - 1));
    }

    #[derive(Clone, Debug)]
    enum Op {
        Upsert(u8, i64),
        Drain,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (0u8..5, any::<i64>()).prop_map(|(n, v)| Op::Upsert(n, v)),
            1 => Just(Op::Drain),
        ]
    }

    proptest! {
        #[test]
        fn drains_reflect_last_upsert_per_name(ops in proptest::collection::vec(op_strategy(), 0..200)) {
            let buffer = SignalBuffer::new();
            let mut model: HashMap<String, i64> = HashMap::new();

            for op in ops.into_iter().chain(std::iter::once(Op::Drain)) {
                match op {
                    Op::Upsert(n, v) => {
                        let name = format!("s.n{n}");
                        buffer.upsert(name.clone(), SignalValue::Int(v), v);
                        let _ = model.insert(name, v);
                    }
                    Op::Drain => {
                        let drained: HashMap<String, i64> = buffer
                            .drain()
                            .map(|b| {
                                b.entries()
                                    .iter()
                                    .map(|e| match e.value {
                                        SignalValue::Int(v) => (e.name.clone(), v),
                                        _ => unreachable!(),
                                    })
                                    .collect()
                            })
                            .unwrap_or_default();
                        prop_assert_eq!(&drained, &model);
                        model.clear();
                    }
                }
            }
        }
    }
}
