#![allow(missing_docs)]

mod support;

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use shapemux::demux::Entry;
use shapemux::query::ast::{Expr, OrderDirection, QueryAst};
use shapemux::query::{normalize, QueryBuilder, QueryEngine, SkipToken, Value};
use shapemux::{EngineOptions, MuxError, Result};

use support::{dataset, execute, init_tracing, ReferenceCompiler};

fn engine() -> QueryEngine<ReferenceCompiler> {
    init_tracing();
    QueryEngine::new(ReferenceCompiler::default(), EngineOptions::default())
}

fn customers_older_than(age: i64) -> Result<QueryAst> {
    QueryBuilder::new()
        .entity_set("Customers")
        .filter(Expr::gt(Expr::prop("Age"), Expr::lit(age)))
        .expand_with("Orders", |orders| {
            orders.expand_with("Items", |_| {});
        })
        .build()
}

fn run(engine: &QueryEngine<ReferenceCompiler>, ast: &QueryAst) -> Result<Vec<Entry>> {
    let prepared = engine.prepare(ast)?;
    let rows = execute(&prepared.bind()?, &dataset())?;
    prepared.materializer(rows).collect()
}

fn ids(entries: &[Entry]) -> Vec<i64> {
    entries
        .iter()
        .filter_map(|entry| entry.get("Id").and_then(Value::as_int))
        .collect()
}

#[test]
fn literal_only_differences_share_one_plan() -> Result<()> {
    let engine = engine();
    let first = engine.prepare(&customers_older_than(30)?)?;
    let second = engine.prepare(&customers_older_than(40)?)?;

    assert!(!first.cache_hit());
    assert!(second.cache_hit());
    assert!(Arc::ptr_eq(first.entry(), second.entry()));
    assert_eq!(engine.compiler().compile_count(), 1);
    assert_eq!(first.parameters().values(), [Value::Int(30)]);
    assert_eq!(second.parameters().values(), [Value::Int(40)]);

    let stats = engine.cache().stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.inserts, 1);
    Ok(())
}

#[test]
fn shared_plan_binds_each_request_values() -> Result<()> {
    let engine = engine();
    assert_eq!(ids(&run(&engine, &customers_older_than(30)?)?), [2, 3, 4]);
    assert_eq!(ids(&run(&engine, &customers_older_than(40)?)?), [3, 4]);
    assert_eq!(ids(&run(&engine, &customers_older_than(99)?)?), Vec::<i64>::new());
    assert_eq!(engine.compiler().compile_count(), 1);
    Ok(())
}

#[test]
fn structural_differences_compile_separately() -> Result<()> {
    let engine = engine();
    let base = customers_older_than(30)?;

    let other_operator = QueryBuilder::new()
        .entity_set("Customers")
        .filter(Expr::lt(Expr::prop("Age"), Expr::lit(30)))
        .expand_with("Orders", |orders| {
            orders.expand_with("Items", |_| {});
        })
        .build()?;
    let other_property = QueryBuilder::new()
        .entity_set("Customers")
        .filter(Expr::gt(Expr::prop("Id"), Expr::lit(30)))
        .expand_with("Orders", |orders| {
            orders.expand_with("Items", |_| {});
        })
        .build()?;
    let no_expand = QueryBuilder::new()
        .entity_set("Customers")
        .filter(Expr::gt(Expr::prop("Age"), Expr::lit(30)))
        .build()?;
    let other_type = QueryBuilder::new()
        .entity_set("Customers")
        .filter(Expr::gt(Expr::prop("Age"), Expr::lit("30")))
        .expand_with("Orders", |orders| {
            orders.expand_with("Items", |_| {});
        })
        .build()?;
    let ordered = QueryBuilder::new()
        .entity_set("Customers")
        .filter(Expr::gt(Expr::prop("Age"), Expr::lit(30)))
        .expand_with("Orders", |orders| {
            orders.expand_with("Items", |_| {});
        })
        .order_by("Name", OrderDirection::Desc)
        .build()?;
    let counted = QueryBuilder::new()
        .entity_set("Customers")
        .filter(Expr::gt(Expr::prop("Age"), Expr::lit(30)))
        .expand_with("Orders", |orders| {
            orders.expand_with("Items", |_| {});
        })
        .count()
        .build()?;
    let nested_count = QueryBuilder::new()
        .entity_set("Customers")
        .filter(Expr::gt(Expr::prop("Age"), Expr::lit(30)))
        .expand_with("Orders", |orders| {
            orders.count().expand_with("Items", |_| {});
        })
        .build()?;

    let base_entry = Arc::clone(engine.prepare(&base)?.entry());
    assert!(base_entry.count_plan().is_none());
    let variants = [
        &other_operator,
        &other_property,
        &no_expand,
        &other_type,
        &ordered,
        &counted,
        &nested_count,
    ];
    let mut seen = vec![base_entry];
    for ast in variants {
        let prepared = engine.prepare(ast)?;
        assert!(!prepared.cache_hit());
        for earlier in &seen {
            assert!(!Arc::ptr_eq(earlier, prepared.entry()));
        }
        let wants_count = std::ptr::eq(ast, &counted);
        assert_eq!(prepared.entry().count_plan().is_some(), wants_count);
        assert_eq!(prepared.bind()?.count_plan().is_some(), wants_count);
        seen.push(Arc::clone(prepared.entry()));
    }
    assert_eq!(engine.compiler().compile_count(), 8);
    assert_eq!(engine.cache().len(), 8);

    let counted_again = QueryBuilder::new()
        .entity_set("Customers")
        .filter(Expr::gt(Expr::prop("Age"), Expr::lit(70)))
        .expand_with("Orders", |orders| {
            orders.expand_with("Items", |_| {});
        })
        .count()
        .build()?;
    let prepared = engine.prepare(&counted_again)?;
    assert!(prepared.cache_hit());
    assert!(prepared.entry().count_plan().is_some());
    Ok(())
}

#[test]
fn concurrent_lookups_converge_on_one_entry() -> Result<()> {
    init_tracing();
    const THREADS: usize = 8;
    let engine = QueryEngine::new(
        ReferenceCompiler::with_delay(Duration::from_millis(20)),
        EngineOptions::default(),
    );
    let barrier = Barrier::new(THREADS);

    let entries = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|idx| {
                let engine = &engine;
                let barrier = &barrier;
                scope.spawn(move || -> Result<_> {
                    let ast = customers_older_than(20 + idx as i64)?;
                    barrier.wait();
                    let prepared = engine.prepare(&ast)?;
                    Ok(Arc::clone(prepared.entry()))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("worker panicked"))
            .collect::<Result<Vec<_>>>()
    })?;

    for entry in &entries[1..] {
        assert!(Arc::ptr_eq(&entries[0], entry));
    }
    assert_eq!(engine.cache().len(), 1);
    let stats = engine.cache().stats();
    assert_eq!(stats.inserts, 1);
    assert_eq!(
        stats.races_lost as usize + stats.hits as usize + 1,
        THREADS,
        "every thread either inserted, lost the race, or hit"
    );
    Ok(())
}

#[test]
fn uncacheable_requests_bypass_the_cache() -> Result<()> {
    let engine = engine();
    let ast = QueryBuilder::new()
        .entity_set("Customers")
        .filter(Expr::Opaque("geo.distance(Location, @here) lt 5".into()))
        .build()?;
    assert!(!normalize(&ast)?.shape.is_cacheable());

    let first = engine.prepare(&ast)?;
    let second = engine.prepare(&ast)?;
    assert!(!first.cache_hit() && !second.cache_hit());
    assert!(!Arc::ptr_eq(first.entry(), second.entry()));
    assert!(engine.cache().is_empty());
    assert_eq!(engine.compiler().compile_count(), 2);
    Ok(())
}

#[test]
fn disabled_cache_compiles_every_request() -> Result<()> {
    init_tracing();
    let engine = QueryEngine::new(
        ReferenceCompiler::default(),
        EngineOptions::default().without_cache(),
    );
    engine.prepare(&customers_older_than(30)?)?;
    engine.prepare(&customers_older_than(30)?)?;
    assert_eq!(engine.compiler().compile_count(), 2);
    assert!(engine.cache().is_empty());
    Ok(())
}

#[test]
fn compile_failures_are_not_cached() -> Result<()> {
    let engine = engine();
    let ast = QueryBuilder::new().entity_set("Suppliers").build()?;
    assert!(matches!(engine.prepare(&ast), Err(MuxError::Compile(_))));
    assert!(matches!(engine.prepare(&ast), Err(MuxError::Compile(_))));
    assert_eq!(engine.compiler().compile_count(), 2);
    assert!(engine.cache().is_empty());
    Ok(())
}

#[test]
fn binding_foreign_values_is_rejected() -> Result<()> {
    let engine = engine();
    let filtered = engine.prepare(&customers_older_than(30)?)?;
    let plain = engine.prepare(&QueryBuilder::new().entity_set("Customers").build()?)?;
    assert!(matches!(
        filtered.entry().bind(plain.parameters()),
        Err(MuxError::MissingParameter(_))
    ));
    Ok(())
}

#[test]
fn paging_round_trips_through_skip_tokens() -> Result<()> {
    let engine = engine();
    let first_page = QueryBuilder::new()
        .entity_set("Customers")
        .page_size(2)
        .build()?;
    let prepared = engine.prepare(&first_page)?;
    let mut materializer = prepared.materializer(execute(&prepared.bind()?, &dataset())?);
    let page: Vec<Entry> = materializer.by_ref().collect::<Result<_>>()?;
    assert_eq!(ids(&page), [1, 2]);
    let token = materializer.skip_token().cloned().expect("page is full");
    assert_eq!(token.get("Id"), Some(&Value::Int(2)));

    let text = token.encode()?;
    let resume = |text: &str| -> Result<Vec<Entry>> {
        let ast = QueryBuilder::new()
            .entity_set("Customers")
            .page_size(2)
            .skip_token(SkipToken::decode(text)?)
            .build()?;
        run(&engine, &ast)
    };
    assert_eq!(ids(&resume(&text)?), [3, 4]);
    let compiles = engine.compiler().compile_count();

    let later = SkipToken::new(vec![("Id".to_owned(), Value::Int(3))]).encode()?;
    assert_eq!(ids(&resume(&later)?), [4]);
    assert_eq!(
        engine.compiler().compile_count(),
        compiles,
        "continuation requests share a shape"
    );
    Ok(())
}

#[test]
fn cleared_cache_recompiles() -> Result<()> {
    let engine = engine();
    let held = Arc::clone(engine.prepare(&customers_older_than(30)?)?.entry());
    engine.cache().clear();
    let fresh = engine.prepare(&customers_older_than(30)?)?;
    assert!(!fresh.cache_hit());
    assert!(!Arc::ptr_eq(&held, fresh.entry()));
    assert_eq!(engine.compiler().compile_count(), 2);
    Ok(())
}
