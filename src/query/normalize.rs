//! Shape normalization: lifts every literal of a request into a parameter
//! slot so structurally identical requests share one cache key.

use tracing::debug;

use crate::query::ast::{
    Expr, ExpandOptions, OrderBy, PathSegment, QueryAst, SelectExpand, SelectItem, Transformation,
};
use crate::query::params::{ParameterValues, SlotOrigin};
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::shape::QueryShape;
use crate::query::value::Value;
use crate::types::{MuxError, Result};

/// Output of [`normalize`]: the cache key and the literals it erased.
#[derive(Clone, Debug)]
pub struct Normalized {
    /// Literal-free request shape.
    pub shape: QueryShape,
    /// Values extracted from the request, in slot order.
    pub parameters: ParameterValues,
}

/// Normalizes `ast` into a [`QueryShape`] plus its parameter values.
pub fn normalize(ast: &QueryAst) -> Result<Normalized> {
    ShapeNormalizer::new().normalize(ast)
}

/// Walks a request AST and replaces literals with parameter references.
///
/// Visit order is fixed (path, filter, apply, select/expand depth-first,
/// order-by, skip, top, skip-token, page size), so two equal shapes always
/// assign the same slot names.
#[derive(Debug, Default)]
pub struct ShapeNormalizer {
    params: ParameterValues,
    navigation: Vec<String>,
    cacheable: bool,
}

impl ShapeNormalizer {
    /// Creates a normalizer for one request.
    pub fn new() -> Self {
        Self {
            params: ParameterValues::new(),
            navigation: Vec::new(),
            cacheable: true,
        }
    }

    /// Consumes the normalizer and produces the shape of `ast`.
    pub fn normalize(mut self, ast: &QueryAst) -> Result<Normalized> {
        let timer = profile_timer();
        let mut shape_ast = ast.clone();

        for segment in &mut shape_ast.path {
            self.visit_segment(segment)?;
        }
        if let Some(filter) = shape_ast.filter.as_mut() {
            let origin = SlotOrigin::Filter {
                navigation: Vec::new(),
            };
            self.visit_expr(filter, &origin)?;
        }
        for step in &mut shape_ast.apply {
            self.visit_transformation(step)?;
        }
        self.visit_select_expand(&mut shape_ast.select_expand)?;
        self.visit_order_by(&mut shape_ast.order_by)?;
        self.visit_count(&mut shape_ast.skip, SlotKind::Skip)?;
        self.visit_count(&mut shape_ast.top, SlotKind::Top)?;
        if let Some(token) = shape_ast.skip_token.as_mut() {
            if token.components.is_empty() {
                return Err(MuxError::Invalid("skip token carries no components"));
            }
            for (property, expr) in &mut token.components {
                let origin = SlotOrigin::SkipToken {
                    property: property.clone(),
                };
                self.lift_literal(expr, origin)?;
            }
        }
        self.visit_count(&mut shape_ast.page_size, SlotKind::PageSize)?;

        if !self.cacheable {
            debug!(params = self.params.len(), "shape.normalize.uncacheable");
        }
        let shape = QueryShape::new(shape_ast, self.cacheable);
        record_profile_timer(QueryProfileKind::Normalize, timer);
        Ok(Normalized {
            shape,
            parameters: self.params,
        })
    }

    fn visit_segment(&mut self, segment: &mut PathSegment) -> Result<()> {
        match segment {
            PathSegment::Key(parts) => {
                for (_, expr) in parts {
                    self.visit_expr(expr, &SlotOrigin::Key)?;
                }
            }
            PathSegment::Opaque(_) => self.cacheable = false,
            PathSegment::EntitySet(_)
            | PathSegment::Navigation(_)
            | PathSegment::Property(_)
            | PathSegment::Cast(_)
            | PathSegment::Count => {}
        }
        Ok(())
    }

    fn visit_expr(&mut self, expr: &mut Expr, origin: &SlotOrigin) -> Result<()> {
        match expr {
            Expr::Literal(_) => {
                self.lift_literal(expr, origin.clone())?;
            }
            Expr::Parameter(_) => {
                return Err(MuxError::Invalid(
                    "request already contains parameter slots",
                ))
            }
            Expr::Property(_) => {}
            Expr::Binary { left, right, .. } => {
                self.visit_expr(left, origin)?;
                self.visit_expr(right, origin)?;
            }
            Expr::Unary { operand, .. } => self.visit_expr(operand, origin)?,
            Expr::Call { args, .. } => {
                for arg in args {
                    self.visit_expr(arg, origin)?;
                }
            }
            Expr::Lambda { body, .. } => self.visit_expr(body, origin)?,
            Expr::In { operand, items } => {
                self.visit_expr(operand, origin)?;
                for item in items {
                    self.visit_expr(item, origin)?;
                }
            }
            Expr::Opaque(_) => self.cacheable = false,
        }
        Ok(())
    }

    fn visit_transformation(&mut self, step: &mut Transformation) -> Result<()> {
        match step {
            Transformation::Filter(expr) => self.visit_expr(expr, &SlotOrigin::Apply)?,
            Transformation::GroupBy { then, .. } => {
                for nested in then {
                    self.visit_transformation(nested)?;
                }
            }
            Transformation::Aggregate(items) => {
                for item in items {
                    self.visit_expr(&mut item.expr, &SlotOrigin::Apply)?;
                }
            }
            Transformation::Compute(items) => {
                for item in items {
                    self.visit_expr(&mut item.expr, &SlotOrigin::Apply)?;
                }
            }
        }
        Ok(())
    }

    fn visit_select_expand(&mut self, select_expand: &mut SelectExpand) -> Result<()> {
        for item in &mut select_expand.items {
            let SelectItem::Expand(expand) = item else {
                continue;
            };
            let depth = self.navigation.len();
            self.navigation
                .extend(expand.navigation.segments().iter().cloned());
            let result = self.visit_expand_options(&mut expand.options);
            self.navigation.truncate(depth);
            result?;
        }
        Ok(())
    }

    fn visit_expand_options(&mut self, options: &mut ExpandOptions) -> Result<()> {
        if let Some(filter) = options.filter.as_mut() {
            let origin = SlotOrigin::Filter {
                navigation: self.navigation.clone(),
            };
            self.visit_expr(filter, &origin)?;
        }
        self.visit_order_by(&mut options.order_by)?;
        self.visit_select_expand(&mut options.select_expand)?;
        self.visit_count(&mut options.skip, SlotKind::Skip)?;
        self.visit_count(&mut options.top, SlotKind::Top)?;
        self.visit_count(&mut options.page_size, SlotKind::PageSize)
    }

    fn visit_order_by(&mut self, order_by: &mut [OrderBy]) -> Result<()> {
        let origin = SlotOrigin::OrderBy {
            navigation: self.navigation.clone(),
        };
        for item in order_by {
            self.visit_expr(&mut item.expr, &origin)?;
        }
        Ok(())
    }

    fn visit_count(&mut self, count: &mut Option<Expr>, kind: SlotKind) -> Result<()> {
        let Some(expr) = count.as_mut() else {
            return Ok(());
        };
        match expr {
            Expr::Literal(Value::Int(n)) if *n >= 0 => {}
            Expr::Literal(_) => {
                return Err(MuxError::InvalidOwned(format!(
                    "{} must be a non-negative integer",
                    kind.clause()
                )))
            }
            _ => {
                return Err(MuxError::InvalidOwned(format!(
                    "{} must be a literal",
                    kind.clause()
                )))
            }
        }
        let navigation = self.navigation.clone();
        let origin = match kind {
            SlotKind::Skip => SlotOrigin::Skip { navigation },
            SlotKind::Top => SlotOrigin::Top { navigation },
            SlotKind::PageSize => SlotOrigin::PageSize { navigation },
        };
        self.lift_literal(expr, origin)
    }

    fn lift_literal(&mut self, expr: &mut Expr, origin: SlotOrigin) -> Result<()> {
        match expr {
            Expr::Literal(value) => {
                let value = std::mem::replace(value, Value::Null);
                let slot = self.params.push(origin, value);
                *expr = Expr::Parameter(slot);
                Ok(())
            }
            Expr::Opaque(_) => {
                self.cacheable = false;
                Ok(())
            }
            _ => Err(MuxError::Invalid("expected a literal value")),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum SlotKind {
    Skip,
    Top,
    PageSize,
}

impl SlotKind {
    fn clause(self) -> &'static str {
        match self {
            SlotKind::Skip => "$skip",
            SlotKind::Top => "$top",
            SlotKind::PageSize => "page size",
        }
    }
}
