//! Object materializer: turns flat rows into fully built root entries.
//!
//! The materializer holds at most one root group plus one lookahead row, so
//! memory grows with the rows of the widest root entity rather than with the
//! nesting depth alone. `DemuxOptions::max_group_rows` caps that group.
//! Nested levels never copy rows; they partition read-only slices of the
//! root-owned buffer into runs of equal identity and recurse.

use std::ops::Range;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::config::DemuxOptions;
use crate::demux::cursor::RowCursor;
use crate::demux::entry::{Entry, NavigationValue};
use crate::demux::factory::{NavigationKind, NodeIndex, ResultShape, ShapeNode};
use crate::demux::row::{CancelToken, Row, RowStream};
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::skip_token::SkipToken;
use crate::query::value::Value;
use crate::types::{MuxError, Result};

/// Pull consumer yielding one [`Entry`] per root entity.
pub struct ObjectMaterializer<S> {
    shape: Arc<ResultShape>,
    cursor: RowCursor<S>,
    buffer: Vec<Row>,
    high_water: usize,
    max_group_rows: usize,
    page_size: Option<usize>,
    produced: usize,
    finished: bool,
    skip_token: Option<SkipToken>,
}

impl<S: RowStream> ObjectMaterializer<S> {
    /// Creates a materializer reading `source` with `shape`.
    pub fn new(shape: Arc<ResultShape>, source: S) -> Self {
        Self {
            shape,
            cursor: RowCursor::new(source, None),
            buffer: Vec::new(),
            high_water: 0,
            max_group_rows: DemuxOptions::default().max_group_rows,
            page_size: None,
            produced: 0,
            finished: false,
            skip_token: None,
        }
    }

    /// Checks `token` before every fetch and at the start of every call.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cursor.set_cancel(token);
        self
    }

    /// Applies demultiplexing options.
    pub fn with_options(mut self, options: &DemuxOptions) -> Self {
        self.max_group_rows = options.max_group_rows;
        self
    }

    /// Stops after `size` root entries and issues a continuation token.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Builds the next root entry, or returns `None` once the stream or the
    /// page is exhausted.
    ///
    /// Any error ends the consumption; later calls return `Ok(None)`.
    pub fn next_entry(&mut self) -> Result<Option<Entry>> {
        let result = self.advance();
        if let Err(err) = &result {
            self.cursor.report_abort("materializer", err);
            self.finished = true;
            self.buffer.clear();
        }
        result
    }

    /// Continuation token issued when the page filled up.
    pub fn skip_token(&self) -> Option<&SkipToken> {
        self.skip_token.as_ref()
    }

    /// Rows currently held, including the lookahead row.
    pub fn buffered_rows(&self) -> usize {
        self.buffer.len()
    }

    /// Largest number of rows held at once.
    pub fn buffer_high_water(&self) -> usize {
        self.high_water
    }

    /// Rows pulled from the backend so far.
    pub fn rows_fetched(&self) -> u64 {
        self.cursor.rows_fetched()
    }

    /// Root entries yielded so far.
    pub fn entries_produced(&self) -> usize {
        self.produced
    }

    fn advance(&mut self) -> Result<Option<Entry>> {
        if self.finished {
            return Ok(None);
        }
        self.cursor.check_cancel()?;
        if self.page_size.is_some_and(|limit| self.produced >= limit) {
            self.finished = true;
            return Ok(None);
        }

        let timer = profile_timer();
        let group_len = self.fill_group()?;
        if group_len == 0 {
            self.finished = true;
            return Ok(None);
        }
        let group = &self.buffer[..group_len];
        let mut entry = build_entry(&self.shape, 0, group)?;
        self.produced += 1;

        if self.page_size.is_some_and(|limit| self.produced >= limit) {
            self.skip_token = reconstruct_skip_token(&self.shape, &mut entry, group)?;
            debug!(
                produced = self.produced,
                token = self.skip_token.is_some(),
                "demux.materialize.page_full"
            );
            self.finished = true;
        }

        trace!(rows = group_len, "demux.materialize.entry");
        self.clear_buffer(group_len);
        record_profile_timer(QueryProfileKind::Materialize, timer);
        Ok(Some(entry))
    }

    /// Reads rows until the current root group is complete.
    ///
    /// Returns the number of rows in the group; a row past that count is the
    /// lookahead for the next group.
    fn fill_group(&mut self) -> Result<usize> {
        if self.buffer.is_empty() {
            match self.cursor.fetch()? {
                Some(row) => self.push(row),
                None => return Ok(0),
            }
        }
        let shape = Arc::clone(&self.shape);
        let root = shape.root();
        if !root.is_present(&self.buffer[0])? {
            return Err(MuxError::Structural(
                "row carries no root entity".to_owned(),
            ));
        }
        loop {
            let Some(row) = self.cursor.fetch()? else {
                return Ok(self.buffer.len());
            };
            let same = root.same_entity(&self.buffer[0], &row)?;
            if !same {
                self.push(row);
                return Ok(self.buffer.len() - 1);
            }
            if self.buffer.len() >= self.max_group_rows {
                return Err(MuxError::GroupTooLarge {
                    limit: self.max_group_rows,
                });
            }
            self.push(row);
        }
    }

    fn push(&mut self, row: Row) {
        self.buffer.push(row);
        self.high_water = self.high_water.max(self.buffer.len());
    }

    /// Drops the consumed group and keeps the lookahead row, if any.
    fn clear_buffer(&mut self, group_len: usize) {
        self.buffer.drain(..group_len);
    }
}

impl<S: RowStream> Iterator for ObjectMaterializer<S> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

fn build_entry(shape: &ResultShape, index: NodeIndex, rows: &[Row]) -> Result<Entry> {
    let node = shape.node(index);
    let first = &rows[0];
    let mut entry = Entry::with_capacity(node.properties.len(), node.children.len());
    for accessor in &node.properties {
        entry.push_property(accessor.name.clone(), first.column(accessor.column)?.clone());
    }
    for &child_index in &node.children {
        let child = shape.node(child_index);
        let runs = entity_runs(child, rows)?;
        let value = match child.kind {
            Some(NavigationKind::Single) => {
                if runs.len() > 1 {
                    return Err(MuxError::Structural(format!(
                        "single-valued navigation '{}' yielded {} entities",
                        child.label(),
                        runs.len()
                    )));
                }
                let nested = match runs.into_iter().next() {
                    Some(run) => Some(Box::new(build_entry(shape, child_index, &rows[run])?)),
                    None => None,
                };
                NavigationValue::Single(nested)
            }
            _ => NavigationValue::Collection(
                runs.into_iter()
                    .map(|run| build_entry(shape, child_index, &rows[run]))
                    .collect::<Result<Vec<_>>>()?,
            ),
        };
        entry.push_navigation(child.label().to_owned(), value);
    }
    Ok(entry)
}

/// Splits `rows` into contiguous runs carrying one entity of `node` each.
///
/// Rows where the level is absent separate runs and belong to none. A keyed
/// entity that reappears after a different one breaks group contiguity. A row
/// carrying a level below `node` without `node` itself is an orphan.
fn entity_runs(node: &ShapeNode, rows: &[Row]) -> Result<Vec<Range<usize>>> {
    let mut runs: Vec<Range<usize>> = Vec::new();
    let mut open: Option<usize> = None;
    for (i, row) in rows.iter().enumerate() {
        if !node.is_present(row)? {
            if node.subtree_present(row)? {
                return Err(MuxError::Structural(format!(
                    "row carries descendants of '{}' without its entity",
                    node.label()
                )));
            }
            if let Some(start) = open.take() {
                runs.push(start..i);
            }
            continue;
        }
        match open {
            Some(start) if node.same_entity(&rows[start], row)? => continue,
            Some(start) => runs.push(start..i),
            None => {}
        }
        open = Some(i);
        if node.has_key(row)? {
            for run in &runs {
                if node.same_entity(&rows[run.start], row)? {
                    return Err(MuxError::RowOrder(format!(
                        "entity of '{}' reappeared after a different entity",
                        node.label()
                    )));
                }
            }
        }
    }
    if let Some(start) = open {
        runs.push(start..rows.len());
    }
    Ok(runs)
}

/// Copies continuation values of the last entry on a page into that entry
/// and returns the token built from them.
///
/// Each component comes from the last row of the group carrying a non-null
/// value in its column; rows of a sibling branch leave it null.
fn reconstruct_skip_token(
    shape: &ResultShape,
    entry: &mut Entry,
    group: &[Row],
) -> Result<Option<SkipToken>> {
    let accessors = shape.skip_token_accessors();
    if accessors.is_empty() {
        return Ok(None);
    }
    let mut components = Vec::with_capacity(accessors.len());
    for accessor in accessors {
        let value = last_non_null(group, accessor.column)?;
        entry.set_path(&accessor.path, value.clone());
        components.push((accessor.property.clone(), value));
    }
    Ok(Some(SkipToken::new(components)))
}

fn last_non_null(group: &[Row], column: usize) -> Result<Value> {
    for row in group.iter().rev() {
        let value = row.column(column)?;
        if !value.is_null() {
            return Ok(value.clone());
        }
    }
    Ok(Value::Null)
}
