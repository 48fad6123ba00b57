//! Single fetch point shared by every nesting level of one consumption.

use tracing::{debug, warn};

use crate::demux::row::{CancelToken, Row, RowStream};
use crate::types::{MuxError, Result};

/// Owns the backend row stream for one result consumption.
///
/// All levels read through the same cursor, so the end-of-stream flag is
/// global: once any level drains the source, every level observes it.
pub struct RowCursor<S> {
    source: S,
    cancel: Option<CancelToken>,
    exhausted: bool,
    fetched: u64,
}

impl<S: RowStream> RowCursor<S> {
    /// Creates a cursor over `source`.
    pub fn new(source: S, cancel: Option<CancelToken>) -> Self {
        Self {
            source,
            cancel,
            exhausted: false,
            fetched: 0,
        }
    }

    /// Installs a cancellation token.
    pub fn set_cancel(&mut self, cancel: CancelToken) {
        self.cancel = Some(cancel);
    }

    /// Fails with [`MuxError::Cancelled`] once cancellation was requested.
    pub fn check_cancel(&self) -> Result<()> {
        if let Some(token) = &self.cancel {
            if token.is_cancelled() {
                return Err(MuxError::Cancelled);
            }
        }
        Ok(())
    }

    /// Pulls the next row from the backend.
    pub fn fetch(&mut self) -> Result<Option<Row>> {
        self.check_cancel()?;
        if self.exhausted {
            return Ok(None);
        }
        match self.source.try_next()? {
            Some(row) => {
                self.fetched += 1;
                Ok(Some(row))
            }
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    /// Whether the backend reported the end of the stream.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Number of rows pulled so far.
    pub fn rows_fetched(&self) -> u64 {
        self.fetched
    }

    /// Logs the error that ended a consumption by `consumer`.
    pub(crate) fn report_abort(&self, consumer: &'static str, err: &MuxError) {
        let fetched = self.fetched;
        match err {
            MuxError::Cancelled => debug!(consumer, fetched, "demux.cancelled"),
            MuxError::RowOrder(_) | MuxError::Structural(_) => {
                warn!(consumer, fetched, error = %err, "demux.row_order.violation")
            }
            _ => debug!(consumer, fetched, error = %err, "demux.aborted"),
        }
    }
}
