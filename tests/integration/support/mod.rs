#![allow(dead_code, missing_docs)]

//! In-memory reference backend shared by the integration tests.
//!
//! The "plan" is the normalized AST itself; executing it evaluates the
//! filter against a fixed customer/order/item dataset using the bound
//! parameter values and emits rows in the union layout:
//!
//! | col | 0    | 1    | 2   | 3    | 4     | 5    | 6   |
//! |-----|------|------|-----|------|-------|------|-----|
//! |     | C.Id | Name | Age | O.Id | Total | I.Id | Qty |

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;
use std::time::Duration;

use shapemux::demux::{EntryFactory, NavigationKind, ResultShape, Row, VecRowStream};
use shapemux::query::ast::{BinaryOp, Expr, PathSegment, QueryAst, SelectItem};
use shapemux::query::{
    BoundPlan, CompiledPlan, ParameterSlot, PlanCompiler, QueryShape, Value,
};
use shapemux::{MuxError, Result};

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub struct Item {
    pub id: i64,
    pub qty: i64,
}

pub struct Order {
    pub id: i64,
    pub total: i64,
    pub items: Vec<Item>,
}

pub struct Customer {
    pub id: i64,
    pub name: &'static str,
    pub age: i64,
    pub orders: Vec<Order>,
}

pub fn dataset() -> Vec<Customer> {
    vec![
        Customer {
            id: 1,
            name: "Ann",
            age: 25,
            orders: vec![
                Order {
                    id: 10,
                    total: 100,
                    items: vec![Item { id: 100, qty: 1 }, Item { id: 101, qty: 2 }],
                },
                Order {
                    id: 11,
                    total: 40,
                    items: Vec::new(),
                },
            ],
        },
        Customer {
            id: 2,
            name: "Bob",
            age: 35,
            orders: Vec::new(),
        },
        Customer {
            id: 3,
            name: "Cid",
            age: 45,
            orders: vec![Order {
                id: 30,
                total: 70,
                items: vec![Item { id: 300, qty: 5 }],
            }],
        },
        Customer {
            id: 4,
            name: "Dee",
            age: 55,
            orders: Vec::new(),
        },
    ]
}

/// Normalized AST plus which levels it expands.
#[derive(Debug)]
pub struct ReferencePlan {
    pub ast: QueryAst,
    pub orders: bool,
    pub items: bool,
}

/// Counts compilations and optionally stalls to widen race windows.
#[derive(Default)]
pub struct ReferenceCompiler {
    pub compiles: AtomicUsize,
    pub delay: Option<Duration>,
}

impl ReferenceCompiler {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            compiles: AtomicUsize::new(0),
            delay: Some(delay),
        }
    }

    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }
}

impl PlanCompiler for ReferenceCompiler {
    type Plan = ReferencePlan;

    fn compile(
        &self,
        shape: &QueryShape,
        _slots: &[ParameterSlot],
    ) -> Result<CompiledPlan<ReferencePlan>> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let ast = shape.ast().clone();
        match ast.path.first() {
            Some(PathSegment::EntitySet(name)) if name == "Customers" => {}
            _ => return Err(MuxError::Compile("unknown entity set".into())),
        }
        let orders = ast.select_expand.items.iter().find_map(|item| match item {
            SelectItem::Expand(expand) if expand.navigation.segments() == ["Orders"] => {
                Some(expand)
            }
            _ => None,
        });
        let items = orders.is_some_and(|orders| {
            orders
                .options
                .select_expand
                .items
                .iter()
                .any(|item| matches!(item, SelectItem::Expand(e) if e.navigation.segments() == ["Items"]))
        });

        let mut root = EntryFactory::new()
            .key("Id", 0)
            .property("Name", 1)
            .property("Age", 2)
            .skip_token("Id", ["Id"], 0);
        if orders.is_some() {
            let mut order = EntryFactory::new().key("Id", 3).property("Total", 4);
            if items {
                order = order.navigation(
                    "Items",
                    NavigationKind::Collection,
                    EntryFactory::new().key("Id", 5).property("Qty", 6),
                );
            }
            root = root.navigation("Orders", NavigationKind::Collection, order);
        }
        let count_plan = ast.count.then(|| ReferencePlan {
            ast: ast.clone(),
            orders: false,
            items: false,
        });
        Ok(CompiledPlan {
            plan: ReferencePlan {
                orders: orders.is_some(),
                items,
                ast,
            },
            count_plan,
            result_shape: ResultShape::new(root)?,
        })
    }
}

/// Executes a bound plan against `data`.
pub fn execute(bound: &BoundPlan<'_, ReferencePlan>, data: &[Customer]) -> Result<VecRowStream> {
    let plan = bound.plan();
    let params = bound.parameters();
    let after = params.skip_token("Id").and_then(Value::as_int);
    let skip = params.skip(&[]).unwrap_or(0).max(0) as usize;
    let top = params.top(&[]).map(|top| top.max(0) as usize);

    let mut selected = Vec::new();
    for customer in data {
        if after.is_some_and(|after| customer.id <= after) {
            continue;
        }
        let keep = match &plan.ast.filter {
            Some(filter) => truthy(&eval(filter, customer, bound)?),
            None => true,
        };
        if keep {
            selected.push(customer);
        }
    }
    let selected = selected
        .into_iter()
        .skip(skip)
        .take(top.unwrap_or(usize::MAX));

    let mut rows = Vec::new();
    for customer in selected {
        let head = [
            Value::Int(customer.id),
            Value::from(customer.name),
            Value::Int(customer.age),
        ];
        if !plan.orders || customer.orders.is_empty() {
            rows.push(row(&head, [Value::Null, Value::Null], [Value::Null, Value::Null]));
            continue;
        }
        for order in &customer.orders {
            let order_cols = [Value::Int(order.id), Value::Int(order.total)];
            if !plan.items || order.items.is_empty() {
                rows.push(row(&head, order_cols.clone(), [Value::Null, Value::Null]));
                continue;
            }
            for item in &order.items {
                rows.push(row(
                    &head,
                    order_cols.clone(),
                    [Value::Int(item.id), Value::Int(item.qty)],
                ));
            }
        }
    }
    Ok(VecRowStream::new(rows))
}

fn row(head: &[Value; 3], order: [Value; 2], item: [Value; 2]) -> Row {
    let mut values = head.to_vec();
    values.extend(order);
    values.extend(item);
    Row::new(values)
}

fn truthy(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

fn eval(expr: &Expr, customer: &Customer, bound: &BoundPlan<'_, ReferencePlan>) -> Result<Value> {
    Ok(match expr {
        Expr::Parameter(param) => bound
            .value(&param.name)
            .cloned()
            .ok_or_else(|| MuxError::MissingParameter(param.name.clone()))?,
        Expr::Property(path) => match path.segments() {
            [name] if name == "Id" => Value::Int(customer.id),
            [name] if name == "Name" => Value::from(customer.name),
            [name] if name == "Age" => Value::Int(customer.age),
            _ => Value::Null,
        },
        Expr::Binary { op, left, right } => {
            let left = eval(left, customer, bound)?;
            let right = eval(right, customer, bound)?;
            let ordering = compare(&left, &right);
            Value::Bool(match op {
                BinaryOp::And => truthy(&left) && truthy(&right),
                BinaryOp::Or => truthy(&left) || truthy(&right),
                BinaryOp::Eq => ordering == Some(CmpOrdering::Equal),
                BinaryOp::Ne => ordering != Some(CmpOrdering::Equal),
                BinaryOp::Gt => ordering == Some(CmpOrdering::Greater),
                BinaryOp::Ge => matches!(ordering, Some(CmpOrdering::Greater | CmpOrdering::Equal)),
                BinaryOp::Lt => ordering == Some(CmpOrdering::Less),
                BinaryOp::Le => matches!(ordering, Some(CmpOrdering::Less | CmpOrdering::Equal)),
                _ => return Err(MuxError::Compile(format!("unsupported operator {op:?}"))),
            })
        }
        // Opaque nodes stand for constructs this backend passes through.
        Expr::Opaque(_) => Value::Bool(true),
        other => return Err(MuxError::Compile(format!("unsupported expression {other:?}"))),
    })
}

fn compare(left: &Value, right: &Value) -> Option<CmpOrdering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
