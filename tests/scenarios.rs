//! End-to-end scenario tests against the library API (spec section 8): three
//! threads T0/T1/T2, two addresses `x = M[0]`, `y = M[1]`, both initially 0.

use axe::model::{self, ModelTag, Options};
use axe::parser::Parser;
use axe::trace::Trace;

fn check(source: &str, model: ModelTag) -> bool {
    let mut p = Parser::new(source);
    let batch = p.parse_batch().unwrap().expect("a batch");
    let trace = Trace::new(batch).expect("a valid trace");
    model::check(&trace, model, Options::default())
}

#[test]
fn store_buffering() {
    let src = "\
        0: M[0] := 1\n\
        0: M[1] == 0\n\
        1: M[1] := 1\n\
        1: M[0] == 0\n";
    assert!(!check(src, ModelTag::Sc), "SB must be rejected under SC");
    assert!(check(src, ModelTag::Tso), "SB must be admitted under TSO");
    assert!(check(src, ModelTag::Pso), "SB must be admitted under PSO");
    assert!(check(src, ModelTag::Wmo), "SB must be admitted under WMO");
}

#[test]
fn message_passing_without_barrier() {
    let src = "\
        0: M[0] := 1\n\
        0: M[1] := 1\n\
        1: M[1] == 1\n\
        1: M[0] == 0\n";
    assert!(!check(src, ModelTag::Sc), "MP must be rejected under SC");
    assert!(!check(src, ModelTag::Tso), "MP must be rejected under TSO");
    assert!(check(src, ModelTag::Pso), "MP must be admitted under PSO");
    assert!(check(src, ModelTag::Wmo), "MP must be admitted under WMO");
}

#[test]
fn message_passing_with_sync() {
    let src = "\
        0: M[0] := 1\n\
        0: sync\n\
        0: M[1] := 1\n\
        1: M[1] == 1\n\
        1: sync\n\
        1: M[0] == 0\n";
    for model in [ModelTag::Sc, ModelTag::Tso, ModelTag::Pso, ModelTag::Wmo] {
        assert!(!check(src, model), "MP with full barriers must be rejected under {model}");
    }
}

#[test]
fn coherence_of_reads() {
    let src = "\
        0: M[0] := 1\n\
        0: M[0] := 2\n\
        1: M[0] == 2\n\
        1: M[0] == 1\n";
    for model in [ModelTag::Sc, ModelTag::Tso, ModelTag::Pso, ModelTag::Wmo, ModelTag::Pow] {
        assert!(!check(src, model), "a thread observing x go 2 then back to 1 must be rejected under {model}");
    }
}

#[test]
fn rmw_atomicity_violation_rejected_under_pow() {
    let src = "\
        0: { M[0] == 0 ; M[0] := 1 }\n\
        1: { M[0] == 0 ; M[0] := 2 }\n";
    assert!(!check(src, ModelTag::Pow), "two atomics reading the same value can't both succeed");
}

#[test]
fn final_value_constraint_rejects_nonexistent_store() {
    let src = "\
        0: M[0] := 1\n\
        final M[0] == 2\n";
    let mut p = Parser::new(src);
    let batch = p.parse_batch().unwrap().unwrap();
    assert!(Trace::new(batch).is_err(), "no store ever produces 2");
}

#[test]
fn final_value_constraint_accepted_under_sc() {
    let src = "\
        0: M[0] := 1\n\
        final M[0] == 1\n";
    assert!(check(src, ModelTag::Sc));
}
