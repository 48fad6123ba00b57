use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// A snapshot of shape and demultiplexing profiling metrics.
///
/// Profiling is enabled via the `SHAPEMUX_PROFILE` environment variable and
/// tracks time spent in each phase of answering a request.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryProfileSnapshot {
    /// Total nanoseconds spent normalizing requests into shapes.
    pub normalize_ns: u64,
    /// Number of normalizations.
    pub normalize_count: u64,
    /// Total nanoseconds spent in backend plan compilation.
    pub compile_ns: u64,
    /// Number of plan compilations.
    pub compile_count: u64,
    /// Total nanoseconds spent materializing root results.
    pub materialize_ns: u64,
    /// Number of materialized root results.
    pub materialize_count: u64,
    /// Total nanoseconds spent turning rows into reader events.
    pub events_ns: u64,
    /// Number of rows processed by event readers.
    pub events_count: u64,
}

#[derive(Default)]
struct QueryProfileCounters {
    normalize_ns: AtomicU64,
    normalize_count: AtomicU64,
    compile_ns: AtomicU64,
    compile_count: AtomicU64,
    materialize_ns: AtomicU64,
    materialize_count: AtomicU64,
    events_ns: AtomicU64,
    events_count: AtomicU64,
}

static PROFILE_ENABLED: OnceLock<bool> = OnceLock::new();
static PROFILE_COUNTERS: OnceLock<QueryProfileCounters> = OnceLock::new();

fn profiling_enabled() -> bool {
    *PROFILE_ENABLED.get_or_init(|| std::env::var_os("SHAPEMUX_PROFILE").is_some())
}

fn counters() -> Option<&'static QueryProfileCounters> {
    profiling_enabled().then(|| PROFILE_COUNTERS.get_or_init(QueryProfileCounters::default))
}

pub(crate) fn profile_timer() -> Option<Instant> {
    profiling_enabled().then(Instant::now)
}

pub(crate) enum QueryProfileKind {
    /// Request normalization.
    Normalize,
    /// Backend plan compilation on a cache miss.
    Compile,
    /// One root result built by the object materializer.
    Materialize,
    /// One row consumed by the event reader.
    Events,
}

pub(crate) fn record_profile_timer(kind: QueryProfileKind, start: Option<Instant>) {
    let Some(start) = start else {
        return;
    };
    let Some(counters) = counters() else {
        return;
    };
    let nanos = start.elapsed().as_nanos().min(u64::MAX as u128) as u64;
    let (ns, count) = match kind {
        QueryProfileKind::Normalize => (&counters.normalize_ns, &counters.normalize_count),
        QueryProfileKind::Compile => (&counters.compile_ns, &counters.compile_count),
        QueryProfileKind::Materialize => (&counters.materialize_ns, &counters.materialize_count),
        QueryProfileKind::Events => (&counters.events_ns, &counters.events_count),
    };
    ns.fetch_add(nanos, Ordering::Relaxed);
    count.fetch_add(1, Ordering::Relaxed);
}

/// Retrieves a snapshot of current profiling metrics.
///
/// Returns `None` unless `SHAPEMUX_PROFILE` is set. When `reset` is `true`
/// the counters are zeroed after being read.
///
/// ```no_run
/// use shapemux::query::profile::profile_snapshot;
///
/// if let Some(snapshot) = profile_snapshot(false) {
///     println!("compiles: {}", snapshot.compile_count);
/// }
/// ```
pub fn profile_snapshot(reset: bool) -> Option<QueryProfileSnapshot> {
    let counters = counters()?;
    let load = |counter: &AtomicU64| {
        if reset {
            counter.swap(0, Ordering::Relaxed)
        } else {
            counter.load(Ordering::Relaxed)
        }
    };
    Some(QueryProfileSnapshot {
        normalize_ns: load(&counters.normalize_ns),
        normalize_count: load(&counters.normalize_count),
        compile_ns: load(&counters.compile_ns),
        compile_count: load(&counters.compile_count),
        materialize_ns: load(&counters.materialize_ns),
        materialize_count: load(&counters.materialize_count),
        events_ns: load(&counters.events_ns),
        events_count: load(&counters.events_count),
    })
}
