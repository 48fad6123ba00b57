//! Event-stream reader for streaming serializers.
//!
//! The reader turns rows into a well-nested event sequence:
//!
//! ```text
//! stream   := element* EndOfRows
//! element  := StartElement resource* EndElement
//! resource := StartResource element* EndResource
//! ```
//!
//! An element is one entity; a resource is the container of one expanded
//! navigation. Every navigation of an element produces exactly one resource,
//! in declaration order, even when no row carried an entity for it.
//!
//! No table of root-to-leaf paths is built. Each row descends the open
//! element stack and picks, per level, the first child navigation whose
//! subtree columns are non-null; the walk is bounded by the shape depth
//! times the sibling count.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::demux::cursor::RowCursor;
use crate::demux::factory::{NavigationKind, NodeIndex, ResultShape};
use crate::demux::row::{CancelToken, Row, RowStream};
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::value::Value;
use crate::types::{MuxError, Result};

/// One reader event.
#[derive(Clone, Debug, PartialEq)]
pub enum DemuxEvent {
    /// An entity begins; carries its scalar properties.
    StartElement {
        /// Shape node of the entity.
        node: NodeIndex,
        /// Scalar properties in declaration order.
        properties: Vec<(String, Value)>,
    },
    /// A navigation container begins.
    StartResource {
        /// Shape node the navigation leads to.
        node: NodeIndex,
    },
    /// A navigation container ends.
    EndResource {
        /// Shape node the navigation leads to.
        node: NodeIndex,
    },
    /// An entity ends.
    EndElement {
        /// Shape node of the entity.
        node: NodeIndex,
    },
    /// All rows were consumed.
    EndOfRows,
}

impl DemuxEvent {
    /// Shape node the event refers to.
    pub fn node(&self) -> Option<NodeIndex> {
        match self {
            DemuxEvent::StartElement { node, .. }
            | DemuxEvent::StartResource { node }
            | DemuxEvent::EndResource { node }
            | DemuxEvent::EndElement { node } => Some(*node),
            DemuxEvent::EndOfRows => None,
        }
    }
}

struct OpenElement {
    node: NodeIndex,
    row: Row,
    /// Position of the next navigation to open among the node's children.
    nav_cursor: usize,
    /// Whether the navigation at `nav_cursor` is currently open.
    nav_open: bool,
}

/// Pull reader yielding [`DemuxEvent`]s.
pub struct EventReader<S> {
    shape: Arc<ResultShape>,
    cursor: RowCursor<S>,
    stack: Vec<OpenElement>,
    pending: VecDeque<DemuxEvent>,
    drained: bool,
    delivered_end: bool,
    failed: bool,
    current: Option<NodeIndex>,
}

impl<S: RowStream> EventReader<S> {
    /// Creates a reader over `source` with `shape`.
    pub fn new(shape: Arc<ResultShape>, source: S) -> Self {
        Self {
            shape,
            cursor: RowCursor::new(source, None),
            stack: Vec::new(),
            pending: VecDeque::new(),
            drained: false,
            delivered_end: false,
            failed: false,
            current: None,
        }
    }

    /// Checks `token` on every read and before every fetch.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cursor.set_cancel(token);
        self
    }

    /// Returns the next event.
    ///
    /// After [`DemuxEvent::EndOfRows`] every call returns `EndOfRows` again.
    /// After an error the reader is unusable.
    pub fn read(&mut self) -> Result<DemuxEvent> {
        if self.failed {
            return Err(MuxError::Invalid("event reader used after a failure"));
        }
        let result = self.read_inner();
        if let Err(err) = &result {
            self.cursor.report_abort("events", err);
            self.failed = true;
            self.pending.clear();
        }
        result
    }

    /// Node of the most recently returned event.
    pub fn current_node(&self) -> Option<NodeIndex> {
        self.current
    }

    /// The shape this reader follows.
    pub fn shape(&self) -> &Arc<ResultShape> {
        &self.shape
    }

    /// Rows pulled from the backend so far.
    pub fn rows_fetched(&self) -> u64 {
        self.cursor.rows_fetched()
    }

    fn read_inner(&mut self) -> Result<DemuxEvent> {
        self.cursor.check_cancel()?;
        loop {
            if let Some(event) = self.pending.pop_front() {
                self.current = event.node();
                if event == DemuxEvent::EndOfRows {
                    self.delivered_end = true;
                }
                return Ok(event);
            }
            if self.drained {
                self.current = None;
                return Ok(DemuxEvent::EndOfRows);
            }
            match self.cursor.fetch()? {
                Some(row) => {
                    let timer = profile_timer();
                    self.on_row(row)?;
                    record_profile_timer(QueryProfileKind::Events, timer);
                }
                None => {
                    self.close_to(0);
                    self.pending.push_back(DemuxEvent::EndOfRows);
                    self.drained = true;
                }
            }
        }
    }

    fn on_row(&mut self, row: Row) -> Result<()> {
        let shape = Arc::clone(&self.shape);
        let root = shape.root();
        if !root.is_present(&row)? {
            return Err(MuxError::Structural(
                "row carries no root entity".to_owned(),
            ));
        }
        let same_root = match self.stack.first() {
            Some(open) => root.same_entity(&open.row, &row)?,
            None => false,
        };
        if !same_root {
            self.close_to(0);
            self.open_element(0, &row)?;
        }

        let mut depth = 0;
        loop {
            let node = shape.node(self.stack[depth].node);
            let mut active = None;
            for (position, &child) in node.children.iter().enumerate() {
                if shape.node(child).subtree_present(&row)? {
                    active = Some(position);
                    break;
                }
            }
            let Some(position) = active else {
                break;
            };
            let child_index = node.children[position];
            let child = shape.node(child_index);
            if !child.is_present(&row)? {
                return Err(MuxError::Structural(format!(
                    "row carries descendants of '{}' without its entity",
                    child.label()
                )));
            }

            let (nav_cursor, nav_open) = {
                let frame = &self.stack[depth];
                (frame.nav_cursor, frame.nav_open)
            };
            if position < nav_cursor {
                return Err(MuxError::RowOrder(format!(
                    "navigation '{}' resumed after it was closed",
                    child.label()
                )));
            }

            if nav_open && position == nav_cursor {
                if let Some(open) = self.stack.get(depth + 1) {
                    if child.same_entity(&open.row, &row)? {
                        depth += 1;
                        continue;
                    }
                    if child.kind == Some(NavigationKind::Single) {
                        return Err(MuxError::Structural(format!(
                            "single-valued navigation '{}' yielded a second entity",
                            child.label()
                        )));
                    }
                }
                self.close_to(depth + 1);
            } else {
                self.close_navigation(depth);
                self.skip_navigations(depth, position);
                self.pending
                    .push_back(DemuxEvent::StartResource { node: child_index });
                self.stack[depth].nav_open = true;
            }
            self.open_element(child_index, &row)?;
            depth += 1;
        }
        Ok(())
    }

    fn open_element(&mut self, index: NodeIndex, row: &Row) -> Result<()> {
        let node = self.shape.node(index);
        let mut properties = Vec::with_capacity(node.properties.len());
        for accessor in &node.properties {
            properties.push((accessor.name.clone(), row.column(accessor.column)?.clone()));
        }
        self.pending.push_back(DemuxEvent::StartElement {
            node: index,
            properties,
        });
        self.stack.push(OpenElement {
            node: index,
            row: row.clone(),
            nav_cursor: 0,
            nav_open: false,
        });
        Ok(())
    }

    /// Closes the open navigation of the element at `depth`, if any.
    fn close_navigation(&mut self, depth: usize) {
        self.close_to(depth + 1);
        let frame = &mut self.stack[depth];
        if frame.nav_open {
            let child = self.shape.node(frame.node).children[frame.nav_cursor];
            self.pending.push_back(DemuxEvent::EndResource { node: child });
            frame.nav_open = false;
            frame.nav_cursor += 1;
        }
    }

    /// Emits empty resources for navigations before `position`.
    fn skip_navigations(&mut self, depth: usize, position: usize) {
        let frame = &mut self.stack[depth];
        let node = self.shape.node(frame.node);
        while frame.nav_cursor < position {
            let child = node.children[frame.nav_cursor];
            self.pending.push_back(DemuxEvent::StartResource { node: child });
            self.pending.push_back(DemuxEvent::EndResource { node: child });
            frame.nav_cursor += 1;
        }
    }

    /// Closes elements until the stack holds `len` frames.
    fn close_to(&mut self, len: usize) {
        while self.stack.len() > len {
            let depth = self.stack.len() - 1;
            self.close_navigation(depth);
            let children = self.shape.node(self.stack[depth].node).children.len();
            self.skip_navigations(depth, children);
            if let Some(frame) = self.stack.pop() {
                self.pending
                    .push_back(DemuxEvent::EndElement { node: frame.node });
            }
        }
    }
}

impl<S: RowStream> Iterator for EventReader<S> {
    type Item = Result<DemuxEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.delivered_end || self.failed {
            return None;
        }
        Some(self.read())
    }
}
