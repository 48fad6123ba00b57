//! Literal-free request shape used as the plan-cache key.

use std::hash::{Hash, Hasher};

use xxhash_rust::xxh64::Xxh64;

use crate::query::ast::{
    ExpandOptions, Expr, OrderBy, PathSegment, QueryAst, SelectExpand, SelectItem,
    Transformation,
};
use crate::query::compare;

const SKIP_TOKEN_SENTINEL: u64 = 0x5eed_70ce_4e5e_ed01;
const ABSENT: u8 = 0xff;

/// Request with every literal replaced by a parameter slot.
///
/// Equality is a node-by-node structural comparison of the ASTs; the
/// hash is computed once at construction and only pre-filters buckets.
/// Shapes that are not cacheable never compare equal, not even to
/// themselves, so they can never produce a cache hit.
#[derive(Clone, Debug)]
pub struct QueryShape {
    ast: QueryAst,
    hash: u64,
    cacheable: bool,
}

impl QueryShape {
    pub(crate) fn new(ast: QueryAst, cacheable: bool) -> Self {
        let hash = structural_hash(&ast);
        Self {
            ast,
            hash,
            cacheable,
        }
    }

    /// Normalized AST. Literals appear as [`Expr::Parameter`].
    pub fn ast(&self) -> &QueryAst {
        &self.ast
    }

    /// Precomputed structural hash.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Whether the shape may be stored in or served from the cache.
    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }
}

impl PartialEq for QueryShape {
    fn eq(&self, other: &Self) -> bool {
        self.cacheable
            && other.cacheable
            && self.hash == other.hash
            && compare::query_equal(&self.ast, &other.ast)
    }
}

// Reflexivity holds only for cacheable shapes. `ShapeCache` refuses to store
// or look up uncacheable ones, so no map ever compares such a key.
impl Eq for QueryShape {}

impl Hash for QueryShape {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

fn structural_hash(ast: &QueryAst) -> u64 {
    let mut hasher = Xxh64::new(0);
    hasher.write_u64(ast.path.len() as u64);
    if let Some(first) = ast.path.first() {
        first.identifier().hash(&mut hasher);
    }
    if let Some(last) = ast.path.last() {
        last.identifier().hash(&mut hasher);
    }
    for segment in &ast.path {
        if let PathSegment::Key(parts) = segment {
            hasher.write_u64(parts.len() as u64);
            for (name, expr) in parts {
                name.hash(&mut hasher);
                hash_expr(expr, &mut hasher);
            }
        }
    }
    match &ast.filter {
        Some(expr) => hash_expr(expr, &mut hasher),
        None => hasher.write_u8(ABSENT),
    }
    hasher.write_u64(ast.apply.len() as u64);
    for step in &ast.apply {
        hash_transformation(step, &mut hasher);
    }
    hash_select_expand(&ast.select_expand, &mut hasher);
    hash_order_by(&ast.order_by, &mut hasher);
    if let Some(token) = &ast.skip_token {
        hasher.write_u64(SKIP_TOKEN_SENTINEL);
        for (property, _) in &token.components {
            property.hash(&mut hasher);
        }
    }
    hasher.write_u8(ast.count as u8);
    hash_presence(&ast.skip, &mut hasher);
    hash_presence(&ast.top, &mut hasher);
    hash_presence(&ast.page_size, &mut hasher);
    hasher.finish()
}

fn hash_presence(expr: &Option<Expr>, hasher: &mut Xxh64) {
    hasher.write_u8(expr.is_some() as u8);
}

fn hash_expr(expr: &Expr, hasher: &mut Xxh64) {
    match expr {
        Expr::Literal(value) => {
            hasher.write_u8(0);
            hasher.write_u8(value.value_type().tag());
        }
        Expr::Parameter(slot) => {
            hasher.write_u8(1);
            hasher.write_u8(slot.ty.tag());
        }
        Expr::Property(path) => {
            hasher.write_u8(2);
            path.hash(hasher);
        }
        Expr::Binary { op, left, right } => {
            hasher.write_u8(3);
            op.hash(hasher);
            hash_expr(left, hasher);
            hash_expr(right, hasher);
        }
        Expr::Unary { op, operand } => {
            hasher.write_u8(4);
            op.hash(hasher);
            hash_expr(operand, hasher);
        }
        Expr::Call { function, args } => {
            hasher.write_u8(5);
            function.hash(hasher);
            hasher.write_u64(args.len() as u64);
            for arg in args {
                hash_expr(arg, hasher);
            }
        }
        Expr::Lambda {
            kind,
            source,
            variable,
            body,
        } => {
            hasher.write_u8(6);
            kind.hash(hasher);
            source.hash(hasher);
            variable.hash(hasher);
            hash_expr(body, hasher);
        }
        Expr::In { operand, items } => {
            hasher.write_u8(7);
            hash_expr(operand, hasher);
            hasher.write_u64(items.len() as u64);
            for item in items {
                hash_expr(item, hasher);
            }
        }
        Expr::Opaque(text) => {
            hasher.write_u8(8);
            text.hash(hasher);
        }
    }
}

fn hash_transformation(step: &Transformation, hasher: &mut Xxh64) {
    match step {
        Transformation::Filter(expr) => {
            hasher.write_u8(0x10);
            hash_expr(expr, hasher);
        }
        Transformation::GroupBy { properties, then } => {
            hasher.write_u8(0x11);
            properties.hash(hasher);
            hasher.write_u64(then.len() as u64);
            for nested in then {
                hash_transformation(nested, hasher);
            }
        }
        Transformation::Aggregate(items) => {
            hasher.write_u8(0x12);
            for item in items {
                item.method.hash(hasher);
                item.alias.hash(hasher);
                hash_expr(&item.expr, hasher);
            }
        }
        Transformation::Compute(items) => {
            hasher.write_u8(0x13);
            for item in items {
                item.alias.hash(hasher);
                hash_expr(&item.expr, hasher);
            }
        }
    }
}

fn hash_select_expand(select_expand: &SelectExpand, hasher: &mut Xxh64) {
    hasher.write_u64(select_expand.items.len() as u64);
    for item in &select_expand.items {
        match item {
            SelectItem::Wildcard => hasher.write_u8(0x20),
            SelectItem::Property(path) => {
                hasher.write_u8(0x21);
                path.hash(hasher);
            }
            SelectItem::Expand(expand) => {
                hasher.write_u8(0x22);
                expand.navigation.hash(hasher);
                hash_expand_options(&expand.options, hasher);
            }
        }
    }
}

fn hash_expand_options(options: &ExpandOptions, hasher: &mut Xxh64) {
    match &options.filter {
        Some(expr) => hash_expr(expr, hasher),
        None => hasher.write_u8(ABSENT),
    }
    hash_order_by(&options.order_by, hasher);
    hash_select_expand(&options.select_expand, hasher);
    hash_presence(&options.skip, hasher);
    hash_presence(&options.top, hasher);
    hash_presence(&options.page_size, hasher);
    hasher.write_u8(options.count as u8);
    hasher.write_u8(options.next_link as u8);
    options.levels.hash(hasher);
}

fn hash_order_by(order_by: &[OrderBy], hasher: &mut Xxh64) {
    hasher.write_u64(order_by.len() as u64);
    for item in order_by {
        item.direction.hash(hasher);
        hash_expr(&item.expr, hasher);
    }
}
