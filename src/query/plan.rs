//! Backend plan compilation seam and the cached plan entry.

use std::sync::Arc;

use crate::demux::factory::{ResultShape, SkipTokenAccessor};
use crate::query::params::{ParameterSlot, ParameterValues};
use crate::query::shape::QueryShape;
use crate::query::value::Value;
use crate::types::{MuxError, Result};

/// Compiles a normalized request shape into a backend-specific plan.
///
/// Implementations must not depend on the literal values of a request: the
/// compiled plan is reused for every request of the same shape and receives
/// its values through [`CompiledPlanEntry::bind`].
pub trait PlanCompiler: Send + Sync {
    /// Backend plan type.
    type Plan: Send + Sync + 'static;

    /// Compiles `shape`, whose literals were lifted into `slots`.
    fn compile(&self, shape: &QueryShape, slots: &[ParameterSlot])
        -> Result<CompiledPlan<Self::Plan>>;
}

/// Output of [`PlanCompiler::compile`].
pub struct CompiledPlan<P> {
    /// Main row-producing plan.
    pub plan: P,
    /// Plan answering `$count`, when requested.
    pub count_plan: Option<P>,
    /// Description of the rows `plan` produces.
    pub result_shape: ResultShape,
}

/// Immutable cache value: the compiled plans plus everything needed to bind
/// and read them.
pub struct CompiledPlanEntry<P> {
    plan: P,
    count_plan: Option<P>,
    result_shape: Arc<ResultShape>,
    slots: Vec<ParameterSlot>,
    shape_hash: u64,
}

impl<P> CompiledPlanEntry<P> {
    /// Wraps compiler output for the shape it was compiled from.
    pub fn new(compiled: CompiledPlan<P>, slots: Vec<ParameterSlot>, shape_hash: u64) -> Self {
        Self {
            plan: compiled.plan,
            count_plan: compiled.count_plan,
            result_shape: Arc::new(compiled.result_shape),
            slots,
            shape_hash,
        }
    }

    /// Main plan.
    pub fn plan(&self) -> &P {
        &self.plan
    }

    /// Count plan, if compiled.
    pub fn count_plan(&self) -> Option<&P> {
        self.count_plan.as_ref()
    }

    /// Result shape shared by every consumption of this plan.
    pub fn result_shape(&self) -> &Arc<ResultShape> {
        &self.result_shape
    }

    /// Declared parameter slots.
    pub fn slots(&self) -> &[ParameterSlot] {
        &self.slots
    }

    /// Structural hash of the shape this entry was compiled from.
    pub fn shape_hash(&self) -> u64 {
        self.shape_hash
    }

    /// Continuation accessors used to build skip tokens.
    pub fn paging_accessors(&self) -> &[SkipTokenAccessor] {
        self.result_shape.skip_token_accessors()
    }

    /// Checks `values` against the declared slots.
    ///
    /// Every slot needs a value of its declared type and no extra values may
    /// be offered.
    pub fn bind<'a>(&'a self, values: &'a ParameterValues) -> Result<BoundPlan<'a, P>> {
        for slot in &self.slots {
            let value = values
                .get(&slot.name)
                .ok_or_else(|| MuxError::MissingParameter(slot.name.clone()))?;
            let found = value.value_type();
            if found != slot.ty {
                return Err(MuxError::ParameterMismatch {
                    name: slot.name.clone(),
                    expected: slot.ty,
                    found,
                });
            }
        }
        if values.len() != self.slots.len() {
            return Err(MuxError::InvalidOwned(format!(
                "{} values offered for {} parameter slots",
                values.len(),
                self.slots.len()
            )));
        }
        Ok(BoundPlan {
            entry: self,
            values,
        })
    }
}

/// A cached plan paired with one request's parameter values.
pub struct BoundPlan<'a, P> {
    entry: &'a CompiledPlanEntry<P>,
    values: &'a ParameterValues,
}

impl<'a, P> BoundPlan<'a, P> {
    /// Main plan.
    pub fn plan(&self) -> &'a P {
        &self.entry.plan
    }

    /// Count plan, if compiled.
    pub fn count_plan(&self) -> Option<&'a P> {
        self.entry.count_plan.as_ref()
    }

    /// Bound value of the slot named `name`.
    pub fn value(&self, name: &str) -> Option<&'a Value> {
        self.values.get(name)
    }

    /// All bound values.
    pub fn parameters(&self) -> &'a ParameterValues {
        self.values
    }

    /// The entry this binding refers to.
    pub fn entry(&self) -> &'a CompiledPlanEntry<P> {
        self.entry
    }
}
