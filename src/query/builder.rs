//! Fluent request builder.

use crate::query::ast::{
    ExpandItem, ExpandOptions, Expr, OrderBy, OrderDirection, PathSegment, PropertyPath, QueryAst,
    SelectItem, Transformation,
};
use crate::query::skip_token::SkipToken;
use crate::query::value::Value;
use crate::types::{MuxError, Result};

/// Fluent builder producing a [`QueryAst`].
#[derive(Default)]
pub struct QueryBuilder {
    ast: QueryAst,
    error: Option<MuxError>,
}

impl QueryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            ast: QueryAst::default(),
            error: None,
        }
    }

    /// Addresses an entity set; must come first.
    pub fn entity_set(mut self, name: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        if !self.ast.path.is_empty() {
            self.error = Some(MuxError::Invalid("entity set must be the first path segment"));
            return self;
        }
        self.ast.path.push(PathSegment::EntitySet(name.to_owned()));
        self
    }

    /// Appends a single-property key predicate.
    pub fn key<V: Into<Value>>(self, property: &str, value: V) -> Self {
        self.key_parts([(property, value.into())])
    }

    /// Appends a composite key predicate.
    pub fn key_parts<'a, I>(mut self, parts: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        if self.error.is_some() {
            return self;
        }
        if self.ast.path.is_empty() {
            self.error = Some(MuxError::Invalid("key predicate requires a preceding segment"));
            return self;
        }
        let parts: Vec<(String, Expr)> = parts
            .into_iter()
            .map(|(name, value)| (name.to_owned(), Expr::Literal(value)))
            .collect();
        if parts.is_empty() {
            self.error = Some(MuxError::Invalid("key predicate requires at least one part"));
            return self;
        }
        self.ast.path.push(PathSegment::Key(parts));
        self
    }

    /// Appends a navigation segment.
    pub fn navigate(mut self, navigation: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        if self.ast.path.is_empty() {
            self.error = Some(MuxError::Invalid("navigation requires a preceding segment"));
            return self;
        }
        self.ast
            .path
            .push(PathSegment::Navigation(navigation.to_owned()));
        self
    }

    /// Appends an arbitrary path segment.
    pub fn segment(mut self, segment: PathSegment) -> Self {
        if self.error.is_none() {
            self.ast.path.push(segment);
        }
        self
    }

    /// Adds a filter; repeated calls are combined with `and`.
    pub fn filter(mut self, expr: Expr) -> Self {
        if self.error.is_some() {
            return self;
        }
        self.ast.filter = Some(match self.ast.filter.take() {
            Some(existing) => Expr::and(existing, expr),
            None => expr,
        });
        self
    }

    /// Appends an `$apply` step.
    pub fn apply(mut self, step: Transformation) -> Self {
        if self.error.is_none() {
            self.ast.apply.push(step);
        }
        self
    }

    /// Selects structural properties.
    pub fn select<I, P>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PropertyPath>,
    {
        if self.error.is_some() {
            return self;
        }
        self.ast.select_expand.items.extend(
            fields
                .into_iter()
                .map(|field| SelectItem::Property(field.into())),
        );
        self
    }

    /// Expands a navigation described by a prepared item.
    pub fn expand(mut self, item: ExpandItem) -> Self {
        if self.error.is_none() {
            self.ast.select_expand.items.push(SelectItem::Expand(item));
        }
        self
    }

    /// Expands a navigation and configures its nested options.
    pub fn expand_with<F>(mut self, navigation: &str, build: F) -> Self
    where
        F: FnOnce(&mut ExpandBuilder),
    {
        if self.error.is_some() {
            return self;
        }
        match ExpandBuilder::build_item(navigation, build) {
            Ok(item) => self.ast.select_expand.items.push(SelectItem::Expand(item)),
            Err(err) => self.error = Some(err),
        }
        self
    }

    /// Orders by a property path.
    pub fn order_by(self, property: &str, direction: OrderDirection) -> Self {
        self.order_by_expr(Expr::prop(property), direction)
    }

    /// Orders by an arbitrary expression.
    pub fn order_by_expr(mut self, expr: Expr, direction: OrderDirection) -> Self {
        if self.error.is_none() {
            self.ast.order_by.push(OrderBy { expr, direction });
        }
        self
    }

    /// Sets `$skip`.
    pub fn skip(mut self, count: i64) -> Self {
        if self.error.is_none() {
            match paging_literal(count, "$skip must be non-negative") {
                Ok(expr) => self.ast.skip = Some(expr),
                Err(err) => self.error = Some(err),
            }
        }
        self
    }

    /// Sets `$top`.
    pub fn top(mut self, count: i64) -> Self {
        if self.error.is_none() {
            match paging_literal(count, "$top must be non-negative") {
                Ok(expr) => self.ast.top = Some(expr),
                Err(err) => self.error = Some(err),
            }
        }
        self
    }

    /// Sets the server-driven page size.
    pub fn page_size(mut self, size: i64) -> Self {
        if self.error.is_none() {
            match paging_literal(size, "page size must be non-negative") {
                Ok(expr) => self.ast.page_size = Some(expr),
                Err(err) => self.error = Some(err),
            }
        }
        self
    }

    /// Requests `$count=true`.
    pub fn count(mut self) -> Self {
        self.ast.count = true;
        self
    }

    /// Resumes after a previously issued continuation token.
    pub fn skip_token(mut self, token: SkipToken) -> Self {
        if self.error.is_some() {
            return self;
        }
        if token.components.is_empty() {
            self.error = Some(MuxError::Invalid("skip token carries no components"));
            return self;
        }
        self.ast.skip_token = Some(token.into_clause());
        self
    }

    /// Builds the AST.
    pub fn build(self) -> Result<QueryAst> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.ast.path.is_empty() {
            return Err(MuxError::Invalid("query requires a resource path"));
        }
        Ok(self.ast)
    }
}

/// Builder for the nested options of one expanded navigation.
pub struct ExpandBuilder {
    navigation: PropertyPath,
    options: ExpandOptions,
    error: Option<MuxError>,
}

impl ExpandBuilder {
    fn build_item<F>(navigation: &str, build: F) -> Result<ExpandItem>
    where
        F: FnOnce(&mut ExpandBuilder),
    {
        let navigation = PropertyPath::parse(navigation);
        if navigation.segments().is_empty() {
            return Err(MuxError::Invalid("expand requires a navigation path"));
        }
        let mut builder = ExpandBuilder {
            navigation,
            options: ExpandOptions::default(),
            error: None,
        };
        build(&mut builder);
        if let Some(err) = builder.error {
            return Err(err);
        }
        Ok(ExpandItem {
            navigation: builder.navigation,
            options: builder.options,
        })
    }

    fn record_error(&mut self, err: MuxError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    /// Adds a nested filter; repeated calls are combined with `and`.
    pub fn filter(&mut self, expr: Expr) -> &mut Self {
        self.options.filter = Some(match self.options.filter.take() {
            Some(existing) => Expr::and(existing, expr),
            None => expr,
        });
        self
    }

    /// Selects nested structural properties.
    pub fn select<I, P>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PropertyPath>,
    {
        self.options.select_expand.items.extend(
            fields
                .into_iter()
                .map(|field| SelectItem::Property(field.into())),
        );
        self
    }

    /// Expands a nested navigation.
    pub fn expand_with<F>(&mut self, navigation: &str, build: F) -> &mut Self
    where
        F: FnOnce(&mut ExpandBuilder),
    {
        match ExpandBuilder::build_item(navigation, build) {
            Ok(item) => self
                .options
                .select_expand
                .items
                .push(SelectItem::Expand(item)),
            Err(err) => self.record_error(err),
        }
        self
    }

    /// Orders the nested collection.
    pub fn order_by(&mut self, property: &str, direction: OrderDirection) -> &mut Self {
        self.options.order_by.push(OrderBy {
            expr: Expr::prop(property),
            direction,
        });
        self
    }

    /// Sets nested `$skip`.
    pub fn skip(&mut self, count: i64) -> &mut Self {
        match paging_literal(count, "$skip must be non-negative") {
            Ok(expr) => self.options.skip = Some(expr),
            Err(err) => self.record_error(err),
        }
        self
    }

    /// Sets nested `$top`.
    pub fn top(&mut self, count: i64) -> &mut Self {
        match paging_literal(count, "$top must be non-negative") {
            Ok(expr) => self.options.top = Some(expr),
            Err(err) => self.record_error(err),
        }
        self
    }

    /// Sets the nested page size and requests a streaming next-link.
    pub fn page_size(&mut self, size: i64) -> &mut Self {
        match paging_literal(size, "page size must be non-negative") {
            Ok(expr) => {
                self.options.page_size = Some(expr);
                self.options.next_link = true;
            }
            Err(err) => self.record_error(err),
        }
        self
    }

    /// Requests nested `$count=true`.
    pub fn count(&mut self) -> &mut Self {
        self.options.count = true;
        self
    }

    /// Sets `$levels`.
    pub fn levels(&mut self, levels: u32) -> &mut Self {
        self.options.levels = Some(levels);
        self
    }
}

fn paging_literal(value: i64, message: &'static str) -> Result<Expr> {
    if value < 0 {
        return Err(MuxError::Invalid(message));
    }
    Ok(Expr::Literal(Value::Int(value)))
}
