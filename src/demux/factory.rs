//! Result-shape description used by both demultiplexing consumers.
//!
//! A backend plan describes its output with a tree of [`EntryFactory`]
//! builders. [`ResultShape::new`] validates the tree and flattens it into a
//! depth-first arena of [`ShapeNode`]s with precomputed column sets, so the
//! per-row work in the consumers is plain index arithmetic.
//!
//! Row layout contract:
//!
//! * each level owns a disjoint set of columns (its key and property
//!   columns);
//! * a level is present on a row iff at least one of its columns is
//!   non-null;
//! * sibling navigations use a union layout: a row carries at most one
//!   sibling branch, and branches appear in declaration order within the
//!   parent entity.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::demux::row::Row;
use crate::types::{MuxError, Result};

/// Index of a node inside a [`ResultShape`] arena; the root is `0`.
pub type NodeIndex = usize;

/// Whether a navigation yields at most one entity or a collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NavigationKind {
    /// At most one entity per parent.
    Single,
    /// Zero or more entities per parent.
    Collection,
}

/// Maps one scalar property to its row column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyAccessor {
    /// Property name in the materialized entry.
    pub name: String,
    /// Column position in the backend row.
    pub column: usize,
}

/// Reads one continuation-token component from the row.
///
/// `path` names the navigations from the root followed by the property the
/// component is written back to; a single-element path addresses a root
/// property.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipTokenAccessor {
    /// Component name inside the token (the order-by property).
    pub property: String,
    /// Navigation names then the property name.
    pub path: Vec<String>,
    /// Column holding the component value.
    pub column: usize,
}

/// Builder-style description of one result level.
#[derive(Clone, Debug, Default)]
pub struct EntryFactory {
    properties: Vec<PropertyAccessor>,
    key_columns: Vec<usize>,
    navigations: Vec<(String, NavigationKind, EntryFactory)>,
    skip_token: Vec<SkipTokenAccessor>,
}

impl EntryFactory {
    /// Creates an empty level.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a scalar property read from `column`.
    pub fn property(mut self, name: &str, column: usize) -> Self {
        self.properties.push(PropertyAccessor {
            name: name.to_owned(),
            column,
        });
        self
    }

    /// Adds a property that is also part of the level's key.
    pub fn key(mut self, name: &str, column: usize) -> Self {
        self.key_columns.push(column);
        self.property(name, column)
    }

    /// Declares a key column that is not materialized as a property.
    pub fn hidden_key(mut self, column: usize) -> Self {
        self.key_columns.push(column);
        self
    }

    /// Adds a navigation whose entities are described by `child`.
    pub fn navigation(mut self, name: &str, kind: NavigationKind, child: EntryFactory) -> Self {
        self.navigations.push((name.to_owned(), kind, child));
        self
    }

    /// Adds a continuation-token component read from `column`.
    ///
    /// Only accessors declared on the root level are used.
    pub fn skip_token<I, S>(mut self, property: &str, path: I, column: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_token.push(SkipTokenAccessor {
            property: property.to_owned(),
            path: path.into_iter().map(Into::into).collect(),
            column,
        });
        self
    }
}

/// One flattened level of a [`ResultShape`].
#[derive(Clone, Debug)]
pub struct ShapeNode {
    /// Navigation name; `None` for the root.
    pub name: Option<String>,
    /// Navigation cardinality; `None` for the root.
    pub kind: Option<NavigationKind>,
    /// Scalar properties in declaration order.
    pub properties: Vec<PropertyAccessor>,
    /// Columns forming the identity of an entity at this level.
    pub key_columns: Vec<usize>,
    /// Every column owned by this level, sorted.
    pub level_columns: Vec<usize>,
    /// Columns owned by this level or any descendant, sorted.
    pub subtree_columns: Vec<usize>,
    /// Parent node; `None` for the root.
    pub parent: Option<NodeIndex>,
    /// Child nodes in navigation declaration order.
    pub children: Vec<NodeIndex>,
    /// Distance from the root.
    pub depth: usize,
}

impl ShapeNode {
    /// Display name used in diagnostics.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("$root")
    }

    /// Whether `row` carries an entity at this level.
    pub fn is_present(&self, row: &Row) -> Result<bool> {
        any_non_null(row, &self.level_columns)
    }

    /// Whether `row` carries this level or any level below it.
    pub fn subtree_present(&self, row: &Row) -> Result<bool> {
        any_non_null(row, &self.subtree_columns)
    }

    /// Whether two rows carry the same entity at this level.
    ///
    /// Identity is the key columns. When a row's key columns are all null,
    /// or the level declares none, every column of the level is compared
    /// instead.
    pub fn same_entity(&self, a: &Row, b: &Row) -> Result<bool> {
        let a_keyed = self.has_key(a)?;
        if a_keyed != self.has_key(b)? {
            return Ok(false);
        }
        let columns = if a_keyed {
            &self.key_columns
        } else {
            &self.level_columns
        };
        for &column in columns {
            if !a.column(column)?.same_as(b.column(column)?) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether `row` identifies this level's entity by key.
    pub fn has_key(&self, row: &Row) -> Result<bool> {
        any_non_null(row, &self.key_columns)
    }
}

fn any_non_null(row: &Row, columns: &[usize]) -> Result<bool> {
    for &column in columns {
        if !row.column(column)?.is_null() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Validated, flattened result shape shared by every consumption of a plan.
#[derive(Clone, Debug)]
pub struct ResultShape {
    nodes: Vec<ShapeNode>,
    skip_token: Vec<SkipTokenAccessor>,
    width: usize,
}

impl ResultShape {
    /// Validates `root` and flattens it.
    ///
    /// Fails when a level owns no columns, when two levels share a column,
    /// when sibling navigations share a name, or when a continuation
    /// accessor has an empty path.
    pub fn new(root: EntryFactory) -> Result<Self> {
        let mut builder = ShapeBuilder {
            nodes: Vec::new(),
            owned: FxHashSet::default(),
        };
        let skip_token = root.skip_token.clone();
        builder.push(root, None, None, None, 0)?;
        for accessor in &skip_token {
            if accessor.path.is_empty() {
                return Err(MuxError::InvalidOwned(format!(
                    "skip token accessor '{}' has an empty path",
                    accessor.property
                )));
            }
        }
        let width = builder
            .nodes
            .iter()
            .flat_map(|node| node.level_columns.iter().copied())
            .chain(skip_token.iter().map(|accessor| accessor.column))
            .max()
            .map_or(0, |max| max + 1);
        Ok(Self {
            nodes: builder.nodes,
            skip_token,
            width,
        })
    }

    /// The root level.
    pub fn root(&self) -> &ShapeNode {
        &self.nodes[0]
    }

    /// Node at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` did not come from this shape.
    pub fn node(&self, index: NodeIndex) -> &ShapeNode {
        &self.nodes[index]
    }

    /// All nodes in depth-first order.
    pub fn nodes(&self) -> &[ShapeNode] {
        &self.nodes
    }

    /// Continuation accessors declared on the root.
    pub fn skip_token_accessors(&self) -> &[SkipTokenAccessor] {
        &self.skip_token
    }

    /// Minimum row width the shape reads from.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Navigation names from the root down to `index`.
    pub fn navigation_path(&self, index: NodeIndex) -> Vec<&str> {
        let mut path = Vec::new();
        let mut current = Some(index);
        while let Some(idx) = current {
            let node = &self.nodes[idx];
            if let Some(name) = &node.name {
                path.push(name.as_str());
            }
            current = node.parent;
        }
        path.reverse();
        path
    }
}

struct ShapeBuilder {
    nodes: Vec<ShapeNode>,
    owned: FxHashSet<usize>,
}

impl ShapeBuilder {
    fn push(
        &mut self,
        factory: EntryFactory,
        name: Option<String>,
        kind: Option<NavigationKind>,
        parent: Option<NodeIndex>,
        depth: usize,
    ) -> Result<Vec<usize>> {
        let label = name.clone().unwrap_or_else(|| "$root".to_owned());
        let mut level_columns: Vec<usize> = factory
            .properties
            .iter()
            .map(|accessor| accessor.column)
            .chain(factory.key_columns.iter().copied())
            .collect();
        level_columns.sort_unstable();
        level_columns.dedup();
        if level_columns.is_empty() {
            return Err(MuxError::InvalidOwned(format!(
                "level '{label}' owns no columns"
            )));
        }
        for &column in &level_columns {
            if !self.owned.insert(column) {
                return Err(MuxError::InvalidOwned(format!(
                    "column {column} of level '{label}' is owned by another level"
                )));
            }
        }
        let mut seen = FxHashSet::default();
        for (nav, _, _) in &factory.navigations {
            if !seen.insert(nav.as_str()) {
                return Err(MuxError::InvalidOwned(format!(
                    "navigation '{nav}' declared twice under '{label}'"
                )));
            }
        }

        let index = self.nodes.len();
        self.nodes.push(ShapeNode {
            name,
            kind,
            properties: factory.properties,
            key_columns: factory.key_columns,
            level_columns: level_columns.clone(),
            subtree_columns: Vec::new(),
            parent,
            children: Vec::new(),
            depth,
        });

        let mut subtree = level_columns;
        for (nav, nav_kind, child) in factory.navigations {
            let child_index = self.nodes.len();
            let child_columns = self.push(child, Some(nav), Some(nav_kind), Some(index), depth + 1)?;
            subtree.extend(child_columns);
            self.nodes[index].children.push(child_index);
        }
        subtree.sort_unstable();
        self.nodes[index].subtree_columns = subtree.clone();
        Ok(subtree)
    }
}
