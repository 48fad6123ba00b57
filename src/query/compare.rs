//! Structural comparison of normalized request ASTs.
//!
//! Two shapes match only when every clause agrees node for node. Parameter
//! slots compare by declared type alone. Any node kind without an explicit
//! rule here (literals that escaped normalization, opaque parser nodes, or a
//! variant mismatch) compares unequal, so an unknown construct can only cause
//! a cache miss, never a false hit.

use crate::query::ast::{
    AggregateExpr, ComputeExpr, ExpandItem, ExpandOptions, Expr, OrderBy, PathSegment, QueryAst,
    SelectExpand, SelectItem, SkipTokenClause, Transformation,
};

/// Deep structural equality of two normalized ASTs.
pub(crate) fn query_equal(a: &QueryAst, b: &QueryAst) -> bool {
    slice_equal(&a.path, &b.path, segment_equal)
        && option_equal(&a.filter, &b.filter, expr_equal)
        && slice_equal(&a.apply, &b.apply, transformation_equal)
        && select_expand_equal(&a.select_expand, &b.select_expand)
        && slice_equal(&a.order_by, &b.order_by, order_by_equal)
        && option_equal(&a.skip, &b.skip, expr_equal)
        && option_equal(&a.top, &b.top, expr_equal)
        && option_equal(&a.skip_token, &b.skip_token, skip_token_equal)
        && a.count == b.count
        && option_equal(&a.page_size, &b.page_size, expr_equal)
}

fn slice_equal<T>(a: &[T], b: &[T], eq: impl Fn(&T, &T) -> bool) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| eq(x, y))
}

fn option_equal<T>(a: &Option<T>, b: &Option<T>, eq: impl Fn(&T, &T) -> bool) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => eq(x, y),
        _ => false,
    }
}

fn segment_equal(a: &PathSegment, b: &PathSegment) -> bool {
    match (a, b) {
        (PathSegment::EntitySet(x), PathSegment::EntitySet(y))
        | (PathSegment::Navigation(x), PathSegment::Navigation(y))
        | (PathSegment::Property(x), PathSegment::Property(y))
        | (PathSegment::Cast(x), PathSegment::Cast(y)) => x == y,
        (PathSegment::Key(x), PathSegment::Key(y)) => slice_equal(x, y, |(xn, xe), (yn, ye)| {
            xn == yn && expr_equal(xe, ye)
        }),
        (PathSegment::Count, PathSegment::Count) => true,
        _ => false,
    }
}

pub(crate) fn expr_equal(a: &Expr, b: &Expr) -> bool {
    match (a, b) {
        (Expr::Parameter(x), Expr::Parameter(y)) => x.ty == y.ty,
        (Expr::Property(x), Expr::Property(y)) => x == y,
        (
            Expr::Binary {
                op: xo,
                left: xl,
                right: xr,
            },
            Expr::Binary {
                op: yo,
                left: yl,
                right: yr,
            },
        ) => xo == yo && expr_equal(xl, yl) && expr_equal(xr, yr),
        (
            Expr::Unary {
                op: xo,
                operand: xe,
            },
            Expr::Unary {
                op: yo,
                operand: ye,
            },
        ) => xo == yo && expr_equal(xe, ye),
        (
            Expr::Call {
                function: xf,
                args: xa,
            },
            Expr::Call {
                function: yf,
                args: ya,
            },
        ) => xf == yf && slice_equal(xa, ya, expr_equal),
        (
            Expr::Lambda {
                kind: xk,
                source: xs,
                variable: xv,
                body: xb,
            },
            Expr::Lambda {
                kind: yk,
                source: ys,
                variable: yv,
                body: yb,
            },
        ) => xk == yk && xs == ys && xv == yv && expr_equal(xb, yb),
        (
            Expr::In {
                operand: xo,
                items: xi,
            },
            Expr::In {
                operand: yo,
                items: yi,
            },
        ) => expr_equal(xo, yo) && slice_equal(xi, yi, expr_equal),
        _ => false,
    }
}

fn order_by_equal(a: &OrderBy, b: &OrderBy) -> bool {
    a.direction == b.direction && expr_equal(&a.expr, &b.expr)
}

fn transformation_equal(a: &Transformation, b: &Transformation) -> bool {
    match (a, b) {
        (Transformation::Filter(x), Transformation::Filter(y)) => expr_equal(x, y),
        (
            Transformation::GroupBy {
                properties: xp,
                then: xt,
            },
            Transformation::GroupBy {
                properties: yp,
                then: yt,
            },
        ) => xp == yp && slice_equal(xt, yt, transformation_equal),
        (Transformation::Aggregate(x), Transformation::Aggregate(y)) => {
            slice_equal(x, y, aggregate_equal)
        }
        (Transformation::Compute(x), Transformation::Compute(y)) => {
            slice_equal(x, y, compute_equal)
        }
        _ => false,
    }
}

fn aggregate_equal(a: &AggregateExpr, b: &AggregateExpr) -> bool {
    a.method == b.method && a.alias == b.alias && expr_equal(&a.expr, &b.expr)
}

fn compute_equal(a: &ComputeExpr, b: &ComputeExpr) -> bool {
    a.alias == b.alias && expr_equal(&a.expr, &b.expr)
}

fn select_expand_equal(a: &SelectExpand, b: &SelectExpand) -> bool {
    slice_equal(&a.items, &b.items, select_item_equal)
}

fn select_item_equal(a: &SelectItem, b: &SelectItem) -> bool {
    match (a, b) {
        (SelectItem::Wildcard, SelectItem::Wildcard) => true,
        (SelectItem::Property(x), SelectItem::Property(y)) => x == y,
        (SelectItem::Expand(x), SelectItem::Expand(y)) => expand_equal(x, y),
        _ => false,
    }
}

fn expand_equal(a: &ExpandItem, b: &ExpandItem) -> bool {
    a.navigation == b.navigation && expand_options_equal(&a.options, &b.options)
}

fn expand_options_equal(a: &ExpandOptions, b: &ExpandOptions) -> bool {
    option_equal(&a.filter, &b.filter, expr_equal)
        && slice_equal(&a.order_by, &b.order_by, order_by_equal)
        && select_expand_equal(&a.select_expand, &b.select_expand)
        && option_equal(&a.skip, &b.skip, expr_equal)
        && option_equal(&a.top, &b.top, expr_equal)
        && a.count == b.count
        && a.levels == b.levels
        && option_equal(&a.page_size, &b.page_size, expr_equal)
        && a.next_link == b.next_link
}

fn skip_token_equal(a: &SkipTokenClause, b: &SkipTokenClause) -> bool {
    slice_equal(&a.components, &b.components, |(xn, xe), (yn, ye)| {
        xn == yn && expr_equal(xe, ye)
    })
}
