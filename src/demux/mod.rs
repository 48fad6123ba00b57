//! Hierarchical row demultiplexing.
//!
//! Backend plans return flat rows in which each nesting level of the result
//! occupies its own columns. Two consumers rebuild the hierarchy from such
//! rows: [`ObjectMaterializer`] yields whole root entries, and
//! [`EventReader`] yields a nested event stream for streaming serializers.
//! Both pull rows through one [`RowCursor`] and honor a [`CancelToken`].

pub mod cursor;
pub mod entry;
pub mod events;
pub mod factory;
pub mod materializer;
pub mod row;

pub use cursor::RowCursor;
pub use entry::{Entry, NavigationValue};
pub use events::{DemuxEvent, EventReader};
pub use factory::{
    EntryFactory, NavigationKind, NodeIndex, PropertyAccessor, ResultShape, ShapeNode,
    SkipTokenAccessor,
};
pub use materializer::ObjectMaterializer;
pub use row::{CancelToken, IterRowStream, Row, RowStream, VecRowStream};
