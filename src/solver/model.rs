//! Model-value extraction: distinct satisfying assignments enumerated by
//! the pin-and-repeat loop (solve, read the model, exclude the value, solve
//! again).

use num_bigint::BigUint;
use z3::ast::{Ast, Int};
use z3::SatResult;

use crate::solver::runner::Session;
use crate::symbolic::state::ModelSample;
use crate::symbolic::value::ValueRef;

/// Distinct values of an integer term under the session's constraints.
fn enumerate_term(session: &mut Session<'_>, term: &Int<'_>, max: usize) -> Vec<i64> {
    let mut out = Vec::new();
    session.solver.push();
    while out.len() < max {
        if session.solver.check() != SatResult::Sat {
            break;
        }
        let Some(model) = session.solver.get_model() else {
            break;
        };
        let Some(value) = model.eval(term, true).and_then(|v| v.as_i64()) else {
            break;
        };
        out.push(value);
        session
            .solver
            .assert(&term._eq(&Int::from_i64(session.ctx, value)).not());
    }
    session.solver.pop(1);
    out
}

pub fn enumerate_nums(session: &mut Session<'_>, target: &ValueRef, max: usize) -> Vec<i64> {
    let term = session.lowerer.num_of(target);
    for axiom in session.lowerer.drain_aux() {
        session.solver.assert(&axiom);
    }
    enumerate_term(session, &term, max)
}

/// Feasible values of the numeric view probed in ascending order, starting
/// at zero. Dynamic stack access uses this: the fanout explores the smallest
/// indices/counts first and the labels stay deterministic.
pub fn probe_values_ascending(
    session: &mut Session<'_>,
    target: &ValueRef,
    hi: i64,
    want: usize,
) -> Vec<i64> {
    let term = session.lowerer.num_of(target);
    for axiom in session.lowerer.drain_aux() {
        session.solver.assert(&axiom);
    }
    let mut out = Vec::new();
    for candidate in 0..=hi {
        if out.len() >= want {
            break;
        }
        session.solver.push();
        session
            .solver
            .assert(&term._eq(&Int::from_i64(session.ctx, candidate)));
        if session.solver.check() == SatResult::Sat {
            out.push(candidate);
        }
        session.solver.pop(1);
    }
    out
}

pub fn enumerate_sizes(session: &mut Session<'_>, target: &ValueRef, max: usize) -> Vec<i64> {
    let term = session.lowerer.size_of(target);
    for axiom in session.lowerer.drain_aux() {
        session.solver.assert(&axiom);
    }
    enumerate_term(session, &term, max)
}

/// Whether numeric enumeration is the natural rendering for this value in
/// the current session.
pub fn prefers_numeric(session: &Session<'_>, target: &ValueRef) -> bool {
    session.lowerer.has_num(target)
}

/// Distinct byte-content samples: each iteration reads (blob, size) from the
/// model and excludes that exact pair.
pub fn enumerate_bytes(
    session: &mut Session<'_>,
    target: &ValueRef,
    max: usize,
) -> Vec<ModelSample> {
    let blob = session.lowerer.blob_of(target);
    let size = session.lowerer.size_of(target);
    for axiom in session.lowerer.drain_aux() {
        session.solver.assert(&axiom);
    }
    let mut out = Vec::new();
    session.solver.push();
    while out.len() < max {
        if session.solver.check() != SatResult::Sat {
            break;
        }
        let Some(model) = session.solver.get_model() else {
            break;
        };
        let Some(size_val) = model.eval(&size, true).and_then(|v| v.as_i64()) else {
            break;
        };
        let Some(blob_val) = model.eval(&blob, true) else {
            break;
        };
        let Some(bytes) = int_to_bytes(&blob_val, size_val) else {
            break;
        };
        out.push(ModelSample::Bytes(bytes));
        let excluded = z3::ast::Bool::and(
            session.ctx,
            &[
                &blob._eq(&blob_val),
                &size._eq(&Int::from_i64(session.ctx, size_val)),
            ],
        )
        .not();
        session.solver.assert(&excluded);
    }
    session.solver.pop(1);
    out
}

/// Decode a non-negative model integer into `size` little-endian bytes.
fn int_to_bytes(value: &Int<'_>, size: i64) -> Option<Vec<u8>> {
    if !(0..=520).contains(&size) {
        return None;
    }
    let text = value.to_string();
    let digits = text.trim();
    let big = BigUint::parse_bytes(digits.as_bytes(), 10)?;
    let mut bytes = big.to_bytes_le();
    if bytes == [0] {
        bytes.clear();
    }
    if bytes.len() > size as usize {
        return None;
    }
    bytes.resize(size as usize, 0);
    Some(bytes)
}
