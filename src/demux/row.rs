//! Backend rows, row streams, and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::query::value::Value;
use crate::types::{MuxError, Result};

/// One flat backend row addressed by column position.
///
/// Cloning is cheap; the column array is shared.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    values: Arc<[Value]>,
}

impl Row {
    /// Creates a row from its column values.
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values: values.into(),
        }
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.values.len()
    }

    /// Column value, if the column exists.
    pub fn get(&self, column: usize) -> Option<&Value> {
        self.values.get(column)
    }

    /// All column values.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub(crate) fn column(&self, column: usize) -> Result<&Value> {
        self.values.get(column).ok_or_else(|| {
            MuxError::Structural(format!(
                "column {column} out of range for row of width {}",
                self.values.len()
            ))
        })
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

/// Ordered pull source of backend rows.
///
/// Rows must be group-contiguous at every nesting level of the result shape
/// they are read with.
pub trait RowStream {
    /// Returns the next row, or `None` once the source is drained.
    fn try_next(&mut self) -> Result<Option<Row>>;
}

impl<S: RowStream + ?Sized> RowStream for Box<S> {
    fn try_next(&mut self) -> Result<Option<Row>> {
        (**self).try_next()
    }
}

/// Row stream over rows already held in memory.
#[derive(Debug)]
pub struct VecRowStream {
    rows: std::vec::IntoIter<Row>,
}

impl VecRowStream {
    /// Creates a stream yielding `rows` in order.
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl RowStream for VecRowStream {
    fn try_next(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.next())
    }
}

/// Adapts any fallible row iterator into a [`RowStream`].
#[derive(Debug)]
pub struct IterRowStream<I> {
    inner: I,
}

impl<I> IterRowStream<I>
where
    I: Iterator<Item = Result<Row>>,
{
    /// Wraps `inner`.
    pub fn new(inner: I) -> Self {
        Self { inner }
    }
}

impl<I> RowStream for IterRowStream<I>
where
    I: Iterator<Item = Result<Row>>,
{
    fn try_next(&mut self) -> Result<Option<Row>> {
        self.inner.next().transpose()
    }
}

/// Shared cancellation flag checked before every row fetch.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing flag, e.g. one owned by a request handler.
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
