//! Request preparation: normalize, look up or compile, then hand out
//! consumers for the backend rows.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{DemuxOptions, EngineOptions};
use crate::demux::events::EventReader;
use crate::demux::materializer::ObjectMaterializer;
use crate::demux::row::RowStream;
use crate::query::ast::QueryAst;
use crate::query::cache::ShapeCache;
use crate::query::normalize::{normalize, Normalized};
use crate::query::params::ParameterValues;
use crate::query::plan::{BoundPlan, CompiledPlanEntry, PlanCompiler};
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::shape::QueryShape;
use crate::types::Result;

/// Front door for request execution.
///
/// Share one engine across threads (e.g. behind an [`Arc`]); the cache is
/// internally synchronized.
pub struct QueryEngine<C: PlanCompiler> {
    compiler: C,
    cache: ShapeCache<C::Plan>,
    options: EngineOptions,
}

impl<C: PlanCompiler> QueryEngine<C> {
    /// Creates an engine compiling with `compiler`.
    pub fn new(compiler: C, options: EngineOptions) -> Self {
        let cache = ShapeCache::new(&options.cache);
        Self {
            compiler,
            cache,
            options,
        }
    }

    /// Normalizes `ast` and returns the plan entry for its shape together
    /// with the request's parameter values.
    pub fn prepare(&self, ast: &QueryAst) -> Result<PreparedQuery<C::Plan>> {
        let Normalized { shape, parameters } = normalize(ast)?;
        let hash = shape.hash();

        if !shape.is_cacheable() || !self.cache.is_enabled() {
            debug!(hash, cacheable = shape.is_cacheable(), "shape.cache.bypass");
            let entry = Arc::new(self.compile(&shape, &parameters)?);
            return Ok(self.prepared(entry, parameters, false));
        }

        if let Some(entry) = self.cache.get(&shape) {
            debug!(hash, "shape.cache.hit");
            return Ok(self.prepared(entry, parameters, true));
        }
        debug!(hash, params = parameters.len(), "shape.cache.miss");
        let compiled = Arc::new(self.compile(&shape, &parameters)?);
        let entry = self.cache.insert(shape, compiled);
        debug!(hash, "shape.cache.insert");
        Ok(self.prepared(entry, parameters, false))
    }

    /// The plan cache.
    pub fn cache(&self) -> &ShapeCache<C::Plan> {
        &self.cache
    }

    /// The backend compiler.
    pub fn compiler(&self) -> &C {
        &self.compiler
    }

    /// Options the engine was created with.
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    fn compile(
        &self,
        shape: &QueryShape,
        parameters: &ParameterValues,
    ) -> Result<CompiledPlanEntry<C::Plan>> {
        let timer = profile_timer();
        let compiled = self
            .compiler
            .compile(shape, parameters.slots())
            .inspect_err(|err| warn!(hash = shape.hash(), error = %err, "shape.compile.failed"))?;
        record_profile_timer(QueryProfileKind::Compile, timer);
        Ok(CompiledPlanEntry::new(
            compiled,
            parameters.slots().to_vec(),
            shape.hash(),
        ))
    }

    fn prepared(
        &self,
        entry: Arc<CompiledPlanEntry<C::Plan>>,
        parameters: ParameterValues,
        cache_hit: bool,
    ) -> PreparedQuery<C::Plan> {
        PreparedQuery {
            entry,
            parameters,
            cache_hit,
            demux: self.options.demux.clone(),
        }
    }
}

/// A request matched to its compiled plan.
pub struct PreparedQuery<P> {
    entry: Arc<CompiledPlanEntry<P>>,
    parameters: ParameterValues,
    cache_hit: bool,
    demux: DemuxOptions,
}

impl<P> PreparedQuery<P> {
    /// Shared plan entry.
    pub fn entry(&self) -> &Arc<CompiledPlanEntry<P>> {
        &self.entry
    }

    /// Values extracted from this request.
    pub fn parameters(&self) -> &ParameterValues {
        &self.parameters
    }

    /// Whether the entry came from the cache.
    pub fn cache_hit(&self) -> bool {
        self.cache_hit
    }

    /// Binds this request's values to the plan.
    pub fn bind(&self) -> Result<BoundPlan<'_, P>> {
        self.entry.bind(&self.parameters)
    }

    /// Root page size requested by the client, if any.
    pub fn page_size(&self) -> Option<usize> {
        self.parameters
            .page_size(&[])
            .and_then(|size| usize::try_from(size).ok())
    }

    /// Object materializer over `rows`, honoring the root page size.
    pub fn materializer<S: RowStream>(&self, rows: S) -> ObjectMaterializer<S> {
        let materializer = ObjectMaterializer::new(Arc::clone(self.entry.result_shape()), rows)
            .with_options(&self.demux);
        match self.page_size() {
            Some(size) => materializer.with_page_size(size),
            None => materializer,
        }
    }

    /// Event reader over `rows`.
    pub fn event_reader<S: RowStream>(&self, rows: S) -> EventReader<S> {
        EventReader::new(Arc::clone(self.entry.result_shape()), rows)
    }
}
