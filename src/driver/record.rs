//! Records and statement results.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::error::{DriverError, DriverResult};
use super::handlers::{RunSummary, StreamingState};
use super::message::Metadata;
use super::signal::Signal;
use super::types::Value;

// ============================================================================
// Record
// ============================================================================

/// A single result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    keys: Arc<Vec<String>>,
    values: Vec<Value>,
    key_index: Arc<HashMap<String, usize>>,
}

impl Record {
    /// Record from shared keys and one row of values.
    pub fn new(
        keys: Arc<Vec<String>>,
        values: Vec<Value>,
        key_index: Arc<HashMap<String, usize>>,
    ) -> Self {
        Self {
            keys,
            values,
            key_index,
        }
    }

    /// Column names, in result order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Values, in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value by column name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.key_index.get(key).and_then(|&i| self.values.get(i))
    }

    /// Value by column position.
    pub fn get_by_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value by column name, converted to a concrete type.
    pub fn get_as<T>(&self, key: &str) -> DriverResult<T>
    where
        T: TryFrom<Value, Error = DriverError>,
    {
        let value = self
            .get(key)
            .ok_or_else(|| DriverError::client_usage(format!("No such key: {}", key)))?;
        T::try_from(value.clone())
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the record has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ============================================================================
// QueryResult
// ============================================================================

/// A fully consumed statement result.
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Column names
    pub keys: Vec<String>,
    /// All result rows
    pub records: Vec<Record>,
    /// Metadata of the terminating success (bookmark, counters, ...)
    pub metadata: Metadata,
}

impl QueryResult {
    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the result has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over the records.
    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    /// The single record of a one-row result.
    pub fn single(&self) -> DriverResult<&Record> {
        match self.records.as_slice() {
            [record] => Ok(record),
            other => Err(DriverError::client_usage(format!(
                "Expected exactly one record, got {}",
                other.len()
            ))),
        }
    }
}

impl IntoIterator for QueryResult {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a QueryResult {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

// ============================================================================
// PendingResult
// ============================================================================

/// A statement whose responses may still be in flight.
///
/// The RUN half resolves first and carries the result keys; the PULL half
/// resolves when streaming terminates and carries any failure.
#[derive(Debug)]
pub struct PendingResult {
    summary: Arc<Mutex<RunSummary>>,
    run_done: Signal,
    stream: Arc<Mutex<StreamingState>>,
    stream_done: Signal,
}

impl PendingResult {
    pub(crate) fn new(
        summary: Arc<Mutex<RunSummary>>,
        run_done: Signal,
        stream: Arc<Mutex<StreamingState>>,
        stream_done: Signal,
    ) -> Self {
        Self {
            summary,
            run_done,
            stream,
            stream_done,
        }
    }

    /// Result keys, available as soon as RUN completes.
    ///
    /// Never fails: if RUN failed, the keys are empty and the failure is
    /// surfaced by [`consume`](Self::consume).
    pub async fn keys(&self) -> Vec<String> {
        // run handlers always resolve successfully
        let _ = self.run_done.wait().await;
        self.summary.lock().statement_keys.clone()
    }

    /// Server-reported time until the first result, `-1` if unknown.
    pub fn result_available_after(&self) -> i64 {
        self.summary.lock().result_available_after
    }

    /// Signal resolving when streaming terminates.
    pub fn stream_completed(&self) -> Signal {
        self.stream_done.clone()
    }

    /// Wait for the result to terminate and materialize it.
    pub async fn consume(self) -> DriverResult<QueryResult> {
        self.stream_done.wait().await?;
        let _ = self.run_done.wait().await;

        let keys = Arc::new(self.summary.lock().statement_keys.clone());
        let key_index: Arc<HashMap<String, usize>> = Arc::new(
            keys.iter()
                .enumerate()
                .map(|(i, k)| (k.clone(), i))
                .collect(),
        );

        let mut stream = self.stream.lock();
        let records = stream
            .records
            .drain(..)
            .map(|values| Record::new(Arc::clone(&keys), values, Arc::clone(&key_index)))
            .collect();
        Ok(QueryResult {
            keys: keys.as_ref().clone(),
            records,
            metadata: std::mem::take(&mut stream.metadata),
        })
    }
}
