//! Parameter slots extracted from request literals and the per-request values
//! bound to them.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::query::value::{Value, ValueType};

/// Reference to a parameter slot as it appears inside a normalized AST.
///
/// Structural comparison looks only at `ty`; `name` is assigned in visit
/// order and therefore agrees between any two equal shapes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParamRef {
    /// Synthetic slot name (`__p0`, `__p1`, ...).
    pub name: String,
    /// Declared type of the literal the slot replaced.
    pub ty: ValueType,
}

/// Where in the request a slot originated.
///
/// Paging values and skip-token components do not come from an expression
/// tree, so backends look them up by this key rather than by position.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotOrigin {
    /// Key predicate literal in the resource path.
    Key,
    /// Filter literal for the navigation path (empty = root).
    Filter {
        /// Navigation path of the expand level.
        navigation: Vec<String>,
    },
    /// Literal inside an `$apply` transformation.
    Apply,
    /// Literal inside an order-by expression.
    OrderBy {
        /// Navigation path of the expand level.
        navigation: Vec<String>,
    },
    /// `$skip` count for the navigation path.
    Skip {
        /// Navigation path of the expand level.
        navigation: Vec<String>,
    },
    /// `$top` count for the navigation path.
    Top {
        /// Navigation path of the expand level.
        navigation: Vec<String>,
    },
    /// Page size for the navigation path.
    PageSize {
        /// Navigation path of the expand level.
        navigation: Vec<String>,
    },
    /// Skip-token component for an order-by property.
    SkipToken {
        /// Property the component belongs to.
        property: String,
    },
}

impl SlotOrigin {
    fn is_side_channel(&self) -> bool {
        matches!(
            self,
            SlotOrigin::Skip { .. }
                | SlotOrigin::Top { .. }
                | SlotOrigin::PageSize { .. }
                | SlotOrigin::SkipToken { .. }
        )
    }
}

/// Declared parameter slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSlot {
    /// Synthetic slot name.
    pub name: String,
    /// Declared value type.
    pub ty: ValueType,
    /// Position tag.
    pub origin: SlotOrigin,
}

/// Literal values extracted from one request, in slot order.
#[derive(Clone, Debug, Default)]
pub struct ParameterValues {
    slots: Vec<ParameterSlot>,
    values: Vec<Value>,
    by_name: FxHashMap<String, usize>,
    side_channel: FxHashMap<SlotOrigin, usize>,
}

impl ParameterValues {
    /// Creates an empty parameter table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a literal and returns the reference that replaces it.
    pub fn push(&mut self, origin: SlotOrigin, value: Value) -> ParamRef {
        let idx = self.slots.len();
        let name = format!("__p{idx}");
        let ty = value.value_type();
        if origin.is_side_channel() {
            self.side_channel.insert(origin.clone(), idx);
        }
        self.by_name.insert(name.clone(), idx);
        self.slots.push(ParameterSlot {
            name: name.clone(),
            ty,
            origin,
        });
        self.values.push(value);
        ParamRef { name, ty }
    }

    /// Number of extracted values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` when the request carried no literals.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Declared slots in extraction order.
    pub fn slots(&self) -> &[ParameterSlot] {
        &self.slots
    }

    /// Values in extraction order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Iterates `(slot, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&ParameterSlot, &Value)> {
        self.slots.iter().zip(self.values.iter())
    }

    /// Looks up a value by synthetic slot name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.by_name.get(name).map(|&idx| &self.values[idx])
    }

    /// Looks up a side-channel value by origin.
    pub fn by_origin(&self, origin: &SlotOrigin) -> Option<&Value> {
        self.side_channel.get(origin).map(|&idx| &self.values[idx])
    }

    /// `$skip` for the navigation path (empty = root).
    pub fn skip(&self, navigation: &[String]) -> Option<i64> {
        self.by_origin(&SlotOrigin::Skip {
            navigation: navigation.to_vec(),
        })
        .and_then(Value::as_int)
    }

    /// `$top` for the navigation path (empty = root).
    pub fn top(&self, navigation: &[String]) -> Option<i64> {
        self.by_origin(&SlotOrigin::Top {
            navigation: navigation.to_vec(),
        })
        .and_then(Value::as_int)
    }

    /// Page size for the navigation path (empty = root).
    pub fn page_size(&self, navigation: &[String]) -> Option<i64> {
        self.by_origin(&SlotOrigin::PageSize {
            navigation: navigation.to_vec(),
        })
        .and_then(Value::as_int)
    }

    /// Skip-token component for `property`.
    pub fn skip_token(&self, property: &str) -> Option<&Value> {
        self.by_origin(&SlotOrigin::SkipToken {
            property: property.to_owned(),
        })
    }
}
