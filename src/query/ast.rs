//! Abstract syntax tree for parsed data-query requests.
//!
//! A request addresses a resource path and carries the usual query options:
//! filter, apply (group/aggregate/compute), select/expand, order-by, paging
//! and a continuation token. Literals may appear anywhere an expression is
//! allowed; the normalizer lifts each of them into a [`ParamRef`].

use serde::{Deserialize, Serialize};

use crate::query::params::ParamRef;
use crate::query::value::Value;

/// Dotted property path such as `Customer/Address/City`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyPath(pub Vec<String>);

impl PropertyPath {
    /// Creates a path from `/`-separated text.
    pub fn parse(text: &str) -> Self {
        Self(
            text.split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        )
    }

    /// Returns the path segments.
    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl From<&str> for PropertyPath {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

/// Resource path segment preceding the query options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PathSegment {
    /// Entity set addressed by name.
    EntitySet(String),
    /// Key predicate, one expression per key property.
    Key(Vec<(String, Expr)>),
    /// Navigation to a related collection or entity.
    Navigation(String),
    /// Structural property access.
    Property(String),
    /// Type cast segment.
    Cast(String),
    /// `$count` segment.
    Count,
    /// Segment kind the parser could not classify.
    Opaque(String),
}

impl PathSegment {
    /// Identifier used when hashing the first and last path segments.
    pub(crate) fn identifier(&self) -> &str {
        match self {
            PathSegment::EntitySet(name)
            | PathSegment::Navigation(name)
            | PathSegment::Property(name)
            | PathSegment::Cast(name)
            | PathSegment::Opaque(name) => name,
            PathSegment::Key(_) => "$key",
            PathSegment::Count => "$count",
        }
    }
}

/// Binary operators.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    /// `eq`
    Eq,
    /// `ne`
    Ne,
    /// `lt`
    Lt,
    /// `le`
    Le,
    /// `gt`
    Gt,
    /// `ge`
    Ge,
    /// `and`
    And,
    /// `or`
    Or,
    /// `add`
    Add,
    /// `sub`
    Sub,
    /// `mul`
    Mul,
    /// `div`
    Div,
    /// `mod`
    Mod,
    /// `has`
    Has,
}

/// Unary operators.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Logical negation.
    Not,
    /// Arithmetic negation.
    Negate,
}

/// Lambda quantifier over a collection.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum LambdaKind {
    /// `any(x: ...)`
    Any,
    /// `all(x: ...)`
    All,
}

/// Expression tree used by filters, order-by, compute, and key segments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Literal value.
    Literal(Value),
    /// Parameter slot produced by normalization.
    Parameter(ParamRef),
    /// Property access, possibly through single-valued navigations.
    Property(PropertyPath),
    /// Binary operator application.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Unary operator application.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expr>,
    },
    /// Function call such as `contains(Name, 'a')`.
    Call {
        /// Function name.
        function: String,
        /// Arguments in call order.
        args: Vec<Expr>,
    },
    /// `any`/`all` lambda over a collection navigation.
    Lambda {
        /// Quantifier.
        kind: LambdaKind,
        /// Collection being quantified.
        source: PropertyPath,
        /// Range variable name.
        variable: String,
        /// Lambda body.
        body: Box<Expr>,
    },
    /// `operand in (item, ...)`.
    In {
        /// Tested operand.
        operand: Box<Expr>,
        /// Candidate list.
        items: Vec<Expr>,
    },
    /// Node kind the parser produced but this layer does not model.
    Opaque(String),
}

impl Expr {
    /// Literal expression.
    pub fn lit<V: Into<Value>>(value: V) -> Self {
        Expr::Literal(value.into())
    }

    /// Property access expression.
    pub fn prop(path: &str) -> Self {
        Expr::Property(PropertyPath::parse(path))
    }

    /// Binary expression.
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// `left eq right`
    pub fn eq(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOp::Eq, left, right)
    }

    /// `left gt right`
    pub fn gt(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOp::Gt, left, right)
    }

    /// `left lt right`
    pub fn lt(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOp::Lt, left, right)
    }

    /// `left and right`
    pub fn and(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOp::And, left, right)
    }

    /// `left or right`
    pub fn or(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOp::Or, left, right)
    }

    /// `not operand`
    pub fn not(operand: Expr) -> Self {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(operand),
        }
    }

    /// Function call expression.
    pub fn call<I>(function: &str, args: I) -> Self
    where
        I: IntoIterator<Item = Expr>,
    {
        Expr::Call {
            function: function.to_owned(),
            args: args.into_iter().collect(),
        }
    }
}

/// Sort direction.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum OrderDirection {
    /// Ascending order.
    #[default]
    Asc,
    /// Descending order.
    Desc,
}

/// Single order-by item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Sort key.
    pub expr: Expr,
    /// Sort direction.
    pub direction: OrderDirection,
}

/// Aggregation method used by `aggregate(...)`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum AggregateMethod {
    /// `sum`
    Sum,
    /// `min`
    Min,
    /// `max`
    Max,
    /// `average`
    Average,
    /// `countdistinct`
    CountDistinct,
    /// `$count`
    Count,
}

/// `expr with method as alias`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregateExpr {
    /// Aggregated expression (ignored for `Count`).
    pub expr: Expr,
    /// Aggregation method.
    pub method: AggregateMethod,
    /// Output alias.
    pub alias: String,
}

/// `expr as alias` inside `compute(...)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComputeExpr {
    /// Computed expression.
    pub expr: Expr,
    /// Output alias.
    pub alias: String,
}

/// Step of an `$apply` pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Transformation {
    /// `filter(...)`
    Filter(Expr),
    /// `groupby((props), nested)`
    GroupBy {
        /// Grouping properties.
        properties: Vec<PropertyPath>,
        /// Transformations applied to every group.
        then: Vec<Transformation>,
    },
    /// `aggregate(...)`
    Aggregate(Vec<AggregateExpr>),
    /// `compute(...)`
    Compute(Vec<ComputeExpr>),
}

/// Options attached to an expanded navigation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpandOptions {
    /// Nested `$filter`.
    pub filter: Option<Expr>,
    /// Nested `$orderby`.
    pub order_by: Vec<OrderBy>,
    /// Nested `$select`/`$expand`.
    pub select_expand: SelectExpand,
    /// Nested `$skip`.
    pub skip: Option<Expr>,
    /// Nested `$top`.
    pub top: Option<Expr>,
    /// Nested `$count`.
    pub count: bool,
    /// `$levels` for recursive expansion.
    pub levels: Option<u32>,
    /// Server-driven page size for this navigation.
    pub page_size: Option<Expr>,
    /// Whether the navigation is written with a streaming next-link.
    pub next_link: bool,
}

/// Expanded navigation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExpandItem {
    /// Navigation being expanded.
    pub navigation: PropertyPath,
    /// Nested query options.
    pub options: ExpandOptions,
}

/// Select or expand item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SelectItem {
    /// `*`
    Wildcard,
    /// Selected structural property.
    Property(PropertyPath),
    /// Expanded navigation.
    Expand(ExpandItem),
}

/// `$select`/`$expand` clause.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectExpand {
    /// Items in request order.
    pub items: Vec<SelectItem>,
}

impl SelectExpand {
    /// Returns `true` when no items are selected or expanded.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Decoded `$skiptoken`: ordered (property, value) components.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SkipTokenClause {
    /// Token components keyed by order-by property.
    pub components: Vec<(String, Expr)>,
}

/// Top-level AST handed over by the request parser.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryAst {
    /// Resource path segments, entity set first.
    pub path: Vec<PathSegment>,
    /// `$filter`
    pub filter: Option<Expr>,
    /// `$apply` pipeline.
    pub apply: Vec<Transformation>,
    /// `$select`/`$expand`
    pub select_expand: SelectExpand,
    /// `$orderby`
    pub order_by: Vec<OrderBy>,
    /// `$skip`
    pub skip: Option<Expr>,
    /// `$top`
    pub top: Option<Expr>,
    /// `$skiptoken`
    pub skip_token: Option<SkipTokenClause>,
    /// `$count=true`
    pub count: bool,
    /// Server-driven page size for the root collection.
    pub page_size: Option<Expr>,
}
