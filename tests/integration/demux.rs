#![allow(missing_docs)]

mod support;

use std::sync::Arc;

use shapemux::demux::{
    CancelToken, DemuxEvent, Entry, EntryFactory, EventReader, IterRowStream, NavigationKind,
    NavigationValue, ObjectMaterializer, ResultShape, Row, RowStream, VecRowStream,
};
use shapemux::query::Value;
use shapemux::{MuxError, Result};

use support::init_tracing;

/// Customers(Id) -> Orders(Id, Total) -> Items(Id, Qty), union-free chain.
fn chain_shape() -> Result<Arc<ResultShape>> {
    init_tracing();
    let shape = ResultShape::new(
        EntryFactory::new().key("Id", 0).navigation(
            "Orders",
            NavigationKind::Collection,
            EntryFactory::new().key("Id", 1).property("Total", 2).navigation(
                "Items",
                NavigationKind::Collection,
                EntryFactory::new().key("Id", 3).property("Qty", 4),
            ),
        ),
    )?;
    Ok(Arc::new(shape))
}

fn int(v: i64) -> Value {
    Value::Int(v)
}

/// One customer, three orders, two items per order.
fn one_by_three_by_two() -> Vec<Row> {
    let mut rows = Vec::new();
    for order in 0..3 {
        for item in 0..2 {
            rows.push(Row::new(vec![
                int(1),
                int(10 + order),
                int(100 * (order + 1)),
                int(100 + order * 10 + item),
                int(item + 1),
            ]));
        }
    }
    rows
}

fn id(entry: &Entry) -> Option<i64> {
    entry.get("Id").and_then(Value::as_int)
}

#[test]
fn materializer_rebuilds_nested_collections() -> Result<()> {
    let shape = chain_shape()?;
    let entries: Vec<Entry> =
        ObjectMaterializer::new(shape, VecRowStream::new(one_by_three_by_two()))
            .collect::<Result<_>>()?;

    assert_eq!(entries.len(), 1);
    let orders = entries[0].children("Orders");
    assert_eq!(orders.iter().map(id).collect::<Vec<_>>(), [Some(10), Some(11), Some(12)]);
    for (order_idx, order) in orders.iter().enumerate() {
        let items = order.children("Items");
        assert_eq!(items.len(), 2);
        let base = 100 + order_idx as i64 * 10;
        assert_eq!(items.iter().map(id).collect::<Vec<_>>(), [Some(base), Some(base + 1)]);
        assert_eq!(items[1].get("Qty"), Some(&int(2)));
    }
    Ok(())
}

#[test]
fn event_reader_emits_well_nested_stream() -> Result<()> {
    let shape = chain_shape()?;
    let events: Vec<DemuxEvent> =
        EventReader::new(shape, VecRowStream::new(one_by_three_by_two())).collect::<Result<_>>()?;

    let mut expected = vec!["<root".to_owned(), "[Orders".to_owned()];
    for _ in 0..3 {
        expected.push("<Orders".to_owned());
        expected.push("[Items".to_owned());
        for _ in 0..2 {
            expected.push("<Items".to_owned());
            expected.push("Items>".to_owned());
        }
        expected.push("Items]".to_owned());
        expected.push("Orders>".to_owned());
    }
    expected.extend(["Orders]", "root>", "$"].map(str::to_owned));

    let names = ["root", "Orders", "Items"];
    let actual: Vec<String> = events
        .iter()
        .map(|event| match event {
            DemuxEvent::StartElement { node, .. } => format!("<{}", names[*node]),
            DemuxEvent::EndElement { node } => format!("{}>", names[*node]),
            DemuxEvent::StartResource { node } => format!("[{}", names[*node]),
            DemuxEvent::EndResource { node } => format!("{}]", names[*node]),
            DemuxEvent::EndOfRows => "$".to_owned(),
        })
        .collect();
    assert_eq!(actual, expected);

    let first_item = events.iter().find_map(|event| match event {
        DemuxEvent::StartElement { node: 2, properties } => Some(properties.clone()),
        _ => None,
    });
    assert_eq!(
        first_item,
        Some(vec![("Id".to_owned(), int(100)), ("Qty".to_owned(), int(1))])
    );
    Ok(())
}

#[test]
fn both_consumers_agree_on_sparse_nesting() -> Result<()> {
    let shape = chain_shape()?;
    let rows = vec![
        Row::new(vec![int(1), Value::Null, Value::Null, Value::Null, Value::Null]),
        Row::new(vec![int(2), int(20), int(5), Value::Null, Value::Null]),
        Row::new(vec![int(3), int(30), int(6), int(300), int(1)]),
    ];
    let entries: Vec<Entry> = ObjectMaterializer::new(Arc::clone(&shape), VecRowStream::new(rows.clone()))
        .collect::<Result<_>>()?;
    assert!(entries[0].children("Orders").is_empty());
    assert!(entries[1].children("Orders")[0].children("Items").is_empty());
    assert_eq!(entries[2].children("Orders")[0].children("Items").len(), 1);

    let events: Vec<DemuxEvent> =
        EventReader::new(shape, VecRowStream::new(rows)).collect::<Result<_>>()?;
    let starts = events
        .iter()
        .filter(|event| matches!(event, DemuxEvent::StartElement { .. }))
        .count();
    let ends = events
        .iter()
        .filter(|event| matches!(event, DemuxEvent::EndElement { .. }))
        .count();
    assert_eq!(starts, 3 + 2 + 1);
    assert_eq!(starts, ends);
    let resources = events
        .iter()
        .filter(|event| matches!(event, DemuxEvent::StartResource { .. }))
        .count();
    // Every root has one Orders resource; every order has one Items resource.
    assert_eq!(resources, 3 + 2);
    Ok(())
}

#[test]
fn materializer_buffer_stays_bounded_by_one_group() -> Result<()> {
    const ROOTS: i64 = 200;
    const CHILDREN: i64 = 7;
    let shape = ResultShape::new(EntryFactory::new().key("Id", 0).navigation(
        "Orders",
        NavigationKind::Collection,
        EntryFactory::new().key("Id", 1),
    ))?;
    let rows = (0..ROOTS).flat_map(|root| {
        (0..CHILDREN).map(move |child| Ok(Row::new(vec![int(root), int(root * CHILDREN + child)])))
    });
    let mut materializer = ObjectMaterializer::new(Arc::new(shape), IterRowStream::new(rows));

    let mut produced = 0;
    while let Some(entry) = materializer.next_entry()? {
        assert_eq!(entry.children("Orders").len(), CHILDREN as usize);
        assert!(materializer.buffered_rows() <= 1, "only the lookahead survives");
        produced += 1;
    }
    assert_eq!(produced, ROOTS);
    assert_eq!(materializer.rows_fetched(), (ROOTS * CHILDREN) as u64);
    assert!(materializer.buffer_high_water() <= CHILDREN as usize + 1);
    Ok(())
}

#[test]
fn page_boundary_rewrites_continuation_properties() -> Result<()> {
    init_tracing();
    // Column 3 is the order-by value; it is not a materialized property.
    let shape = ResultShape::new(
        EntryFactory::new()
            .key("Id", 0)
            .navigation(
                "Address",
                NavigationKind::Single,
                EntryFactory::new().property("City", 1),
            )
            .navigation(
                "Orders",
                NavigationKind::Collection,
                EntryFactory::new().key("Id", 2),
            )
            .skip_token("Rank", ["Rank"], 3)
            .skip_token("City", ["Address", "City"], 1),
    )?;
    let rows = vec![
        Row::new(vec![int(1), Value::from("Oslo"), Value::Null, int(9)]),
        Row::new(vec![int(1), Value::Null, int(10), int(9)]),
        Row::new(vec![int(2), Value::from("Rome"), Value::Null, int(8)]),
        Row::new(vec![int(2), Value::Null, int(20), int(8)]),
        Row::new(vec![int(3), Value::from("Nice"), Value::Null, int(7)]),
    ];
    let mut materializer =
        ObjectMaterializer::new(Arc::new(shape), VecRowStream::new(rows)).with_page_size(2);

    let first = materializer.next_entry()?.expect("first entry");
    assert!(materializer.skip_token().is_none());
    assert_eq!(first.get("Rank"), None);

    let last = materializer.next_entry()?.expect("second entry");
    assert_eq!(id(&last), Some(2));
    assert_eq!(last.get("Rank"), Some(&int(8)));
    assert_eq!(
        last.single("Address").and_then(|a| a.get("City")),
        Some(&Value::from("Rome"))
    );
    assert_eq!(last.children("Orders").len(), 1);
    assert!(matches!(last.navigation("Address"), Some(NavigationValue::Single(Some(_)))));

    assert!(materializer.next_entry()?.is_none(), "page is full");
    let token = materializer.skip_token().expect("token issued");
    assert_eq!(token.get("Rank"), Some(&int(8)));
    assert_eq!(token.get("City"), Some(&Value::from("Rome")));
    assert_eq!(materializer.entries_produced(), 2);
    Ok(())
}

/// Yields rows from `rows` and cancels `token` once `cancel_after` rows were
/// handed out.
struct CancellingStream {
    rows: std::vec::IntoIter<Row>,
    served: usize,
    cancel_after: usize,
    token: CancelToken,
}

impl RowStream for CancellingStream {
    fn try_next(&mut self) -> Result<Option<Row>> {
        let row = self.rows.next();
        self.served += 1;
        if self.served == self.cancel_after {
            self.token.cancel();
        }
        Ok(row)
    }
}

#[test]
fn cancellation_between_fetches_stops_the_materializer() -> Result<()> {
    let shape = chain_shape()?;
    let token = CancelToken::new();
    let mut rows = one_by_three_by_two();
    rows.push(Row::new(vec![int(2), Value::Null, Value::Null, Value::Null, Value::Null]));
    let stream = CancellingStream {
        rows: rows.into_iter(),
        served: 0,
        cancel_after: 3,
        token: token.clone(),
    };
    let mut materializer = ObjectMaterializer::new(shape, stream).with_cancel(token);

    let err = materializer.next_entry().expect_err("cancelled mid-group");
    assert!(err.is_cancelled());
    assert_eq!(materializer.rows_fetched(), 3);
    assert!(materializer.next_entry()?.is_none());
    assert_eq!(materializer.entries_produced(), 0);
    Ok(())
}

#[test]
fn cancellation_stops_the_event_reader() -> Result<()> {
    let shape = chain_shape()?;
    let token = CancelToken::new();
    let stream = CancellingStream {
        rows: one_by_three_by_two().into_iter(),
        served: 0,
        cancel_after: 2,
        token: token.clone(),
    };
    let mut reader = EventReader::new(shape, stream).with_cancel(token);
    let mut seen = 0;
    let err = loop {
        match reader.read() {
            Ok(DemuxEvent::EndOfRows) => panic!("stream should not complete"),
            Ok(_) => seen += 1,
            Err(err) => break err,
        }
    };
    assert!(matches!(err, MuxError::Cancelled));
    assert!(seen > 0);
    assert_eq!(reader.rows_fetched(), 2);
    assert!(reader.next().is_none());
    Ok(())
}

#[test]
fn interleaved_children_are_reported() -> Result<()> {
    let shape = chain_shape()?;
    let rows = vec![
        Row::new(vec![int(1), int(10), int(1), Value::Null, Value::Null]),
        Row::new(vec![int(1), int(11), int(1), Value::Null, Value::Null]),
        Row::new(vec![int(1), int(10), int(1), Value::Null, Value::Null]),
    ];
    let err = ObjectMaterializer::new(shape, VecRowStream::new(rows))
        .next_entry()
        .expect_err("order 10 reappears");
    assert!(matches!(err, MuxError::RowOrder(_)));
    Ok(())
}

#[test]
fn orphan_descendants_are_rejected_by_both_consumers() -> Result<()> {
    let shape = chain_shape()?;
    let rows = vec![
        Row::new(vec![int(1), int(10), int(1), int(100), int(1)]),
        Row::new(vec![int(1), Value::Null, Value::Null, int(999), int(9)]),
    ];

    let mut materializer =
        ObjectMaterializer::new(Arc::clone(&shape), VecRowStream::new(rows.clone()));
    let err = materializer.next_entry().expect_err("item 999 has no order");
    assert!(matches!(err, MuxError::Structural(_)), "{err}");
    assert_eq!(materializer.entries_produced(), 0);

    let outcome: Result<Vec<DemuxEvent>> =
        EventReader::new(shape, VecRowStream::new(rows)).collect();
    assert!(matches!(outcome, Err(MuxError::Structural(_))));
    Ok(())
}

#[test]
fn backend_failures_surface_unchanged() -> Result<()> {
    let shape = chain_shape()?;
    let rows = vec![
        Ok(Row::new(vec![int(1), Value::Null, Value::Null, Value::Null, Value::Null])),
        Err(MuxError::backend("connection reset")),
    ];
    let mut materializer = ObjectMaterializer::new(shape, IterRowStream::new(rows.into_iter()));
    let err = materializer.next_entry().expect_err("backend error");
    assert!(matches!(err, MuxError::Backend(_)));
    assert!(err.to_string().contains("connection reset"));
    Ok(())
}
