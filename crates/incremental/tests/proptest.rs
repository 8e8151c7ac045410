//! Property-based tests for rivulet-incremental using proptest.
//!
//! Random edit scripts are applied to a source while a chain of operators
//! follows it; after every edit each operator must agree with its own
//! from-scratch recomputation.

use proptest::prelude::*;
use rivulet_core::{CollectionChange, SortDirection};
use rivulet_incremental::{
    CollectionExt, Computation, NestedCollectionExt, Ordering, OrderedExt, Paging, ThenOrdering,
};
use rivulet_reactive::{
    callback, ObservableCollection, ReadSet, Selector, SharedCollection, SourceList, Var,
};
use std::cell::RefCell;
use std::rc::Rc;

/// A reactive value the operators read.
#[derive(Clone, Debug)]
enum Knob {
    Threshold(i32),
    Page(usize),
    Direction(bool),
}

#[derive(Clone, Debug)]
enum Op {
    Insert(usize, i32),
    Remove(usize),
    Replace(usize, i32),
    Move(usize, usize),
    Reset(Vec<i32>),
    Turn(Knob),
    /// Turns the knob from inside the edit's notification, before the
    /// operators have seen the edit.
    During(Knob, Box<Op>),
}

fn knob_strategy() -> impl Strategy<Value = Knob> {
    prop_oneof![
        (-20i32..20).prop_map(Knob::Threshold),
        (0usize..6).prop_map(Knob::Page),
        any::<bool>().prop_map(Knob::Direction),
    ]
}

fn edit_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0usize..64, -20i32..20).prop_map(|(at, v)| Op::Insert(at, v)),
        3 => (0usize..64).prop_map(Op::Remove),
        2 => (0usize..64, -20i32..20).prop_map(|(at, v)| Op::Replace(at, v)),
        2 => (0usize..64, 0usize..64).prop_map(|(a, b)| Op::Move(a, b)),
        1 => prop::collection::vec(-20i32..20, 0..12).prop_map(Op::Reset),
    ]
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        12 => edit_strategy(),
        3 => knob_strategy().prop_map(Op::Turn),
        3 => (knob_strategy(), edit_strategy()).prop_map(|(knob, op)| Op::During(knob, Box::new(op))),
    ]
}

struct Knobs {
    threshold: Var<i32>,
    page: Var<usize>,
    direction: Var<SortDirection>,
}

impl Knobs {
    fn turn(&self, knob: &Knob) -> rivulet_core::Result<()> {
        match knob {
            Knob::Threshold(v) => self.threshold.set(*v),
            Knob::Page(p) => self.page.set(*p),
            Knob::Direction(descending) => self.direction.set(if *descending {
                SortDirection::Descending
            } else {
                SortDirection::Ascending
            }),
        }
    }
}

fn apply(source: &SourceList<i32>, op: &Op) {
    let len = source.len();
    match op {
        Op::Insert(at, v) => source.insert(at % (len + 1), *v).unwrap(),
        Op::Remove(at) if len > 0 => {
            source.remove(at % len).unwrap();
        }
        Op::Replace(at, v) if len > 0 => {
            source.replace(at % len, *v).unwrap();
        }
        Op::Move(from, to) if len > 0 => source.move_item(from % len, to % len).unwrap(),
        Op::Reset(items) => source.reset(items.clone()).unwrap(),
        _ => {}
    }
}

fn check(operators: &[&dyn Computation]) -> Result<(), TestCaseError> {
    for operator in operators {
        prop_assert!(operator.is_consistent(), "{} is not consistent", operator.operator());
        if let Err(err) = operator.validate_consistency() {
            return Err(TestCaseError::fail(format!("{err}")));
        }
    }
    Ok(())
}

proptest! {
    /// Every operator over a shared source stays equal to its recomputation
    /// through edits of the source and of the reactive values it reads.
    #[test]
    fn operators_match_recomputation(
        initial in prop::collection::vec(-20i32..20, 0..16),
        ops in prop::collection::vec(op_strategy(), 1..80),
    ) {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let source = SourceList::from_vec(initial);
        let knobs = Rc::new(Knobs {
            threshold: Var::new(0),
            page: Var::new(1),
            direction: Var::new(SortDirection::Ascending),
        });
        let (threshold, page, direction) =
            (knobs.threshold.clone(), knobs.page.clone(), knobs.direction.clone());

        // subscribed ahead of every operator
        let armed: Rc<RefCell<Option<Knob>>> = Rc::new(RefCell::new(None));
        let (pending, turner) = (armed.clone(), knobs.clone());
        source.subscribe(callback(move |_: &CollectionChange<i32>| {
            let knob = pending.borrow_mut().take();
            match knob {
                Some(knob) => turner.turn(&knob),
                None => Ok(()),
            }
        }));

        let t = threshold.clone();
        let filtered = source
            .filtering(Selector::new(move |x: &i32, cx: &mut ReadSet| *x > cx.read(&t)))
            .unwrap();
        let t = threshold.clone();
        let grouped = source
            .grouping(Selector::new(move |x: &i32, cx: &mut ReadSet| (*x - cx.read(&t)).rem_euclid(3)))
            .unwrap();
        let sorted: Rc<Ordering<i32, i32>> =
            Ordering::with_direction(source.clone(), Selector::plain(|x: &i32| x / 4), direction.clone())
                .unwrap();
        let then_sorted: Rc<ThenOrdering<i32, i32>> =
            sorted.then_by(Selector::plain(|x: &i32| -x)).unwrap();
        let paged: Rc<Paging<i32>> = filtered.paging(3, page.clone()).unwrap();
        let sum = source.summing().unwrap();
        let mean = filtered.averaging().unwrap();
        let distinct = source.distincting().unwrap();
        let t = threshold.clone();
        let any_above = distinct
            .any_computing(Selector::new(move |x: &i32, cx: &mut ReadSet| *x > cx.read(&t) + 10))
            .unwrap();

        let operators: [&dyn Computation; 9] = [
            &*filtered, &*grouped, &*sorted, &*then_sorted, &*paged, &*sum, &*mean, &*distinct,
            &*any_above,
        ];
        check(&operators)?;

        for op in &ops {
            match op {
                Op::Turn(knob) => knobs.turn(knob).unwrap(),
                Op::During(knob, edit) => {
                    *armed.borrow_mut() = Some(knob.clone());
                    apply(&source, edit);
                }
                op => apply(&source, op),
            }
            check(&operators)?;
        }
    }

    /// Flattening stays equal to the concatenation of the inner collections
    /// through edits of the inner collections and of the outer one.
    #[test]
    fn concatenation_matches_recomputation(
        ops in prop::collection::vec((0usize..3, op_strategy()), 1..80),
    ) {
        let inner: Vec<Rc<SourceList<i32>>> =
            (0..3).map(|i| SourceList::from_vec(vec![i, i + 10])).collect();
        let shared: Vec<SharedCollection<i32>> =
            inner.iter().map(|list| list.clone() as SharedCollection<i32>).collect();
        let outer = SourceList::from_vec(shared.clone());
        let flat = outer.concatenating().unwrap();
        check(&[&*flat as &dyn Computation])?;

        for (target, op) in &ops {
            match op {
                Op::Move(from, to) if *target == 0 && outer.len() > 0 => {
                    let len = outer.len();
                    outer.move_item(from % len, to % len).unwrap();
                }
                Op::Remove(at) if *target == 0 && outer.len() > 1 => {
                    let len = outer.len();
                    outer.remove(at % len).unwrap();
                }
                Op::Turn(_) => outer.push(shared[*target].clone()).unwrap(),
                op => apply(&inner[*target], op),
            }
            check(&[&*flat as &dyn Computation])?;
        }
    }
}
