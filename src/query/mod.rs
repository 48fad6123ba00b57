#![forbid(unsafe_code)]

//! Query-shape normalization and plan caching.
//!
//! A request AST is normalized into a literal-free [`QueryShape`] plus the
//! [`ParameterValues`] it carried. The shape keys a concurrent cache of
//! compiled backend plans, so structurally identical requests compile once.

/// Request abstract syntax tree.
pub mod ast;

/// Fluent request builder.
pub mod builder;

/// Shape-keyed plan cache.
pub mod cache;

mod compare;

/// Request preparation entry point.
pub mod engine;

/// Literal lifting.
pub mod normalize;

/// Parameter slots and bound values.
pub mod params;

/// Backend compilation seam and cached plan entries.
pub mod plan;

/// Performance profiling for shape and demultiplexing phases.
///
/// Collects timing and count statistics when `SHAPEMUX_PROFILE` is set.
pub mod profile;

/// Cache key type.
pub mod shape;

/// Continuation tokens.
pub mod skip_token;

/// Scalar values.
pub mod value;

pub use builder::{ExpandBuilder, QueryBuilder};
pub use cache::{CacheStats, ShapeCache};
pub use engine::{PreparedQuery, QueryEngine};
pub use normalize::{normalize, Normalized};
pub use params::{ParamRef, ParameterSlot, ParameterValues, SlotOrigin};
pub use plan::{BoundPlan, CompiledPlan, CompiledPlanEntry, PlanCompiler};
pub use shape::QueryShape;
pub use skip_token::SkipToken;
pub use value::{Value, ValueType};
