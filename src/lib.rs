#![deny(missing_debug_implementations, rust_2018_idioms)]

//! `axe` decides whether a finite, multi-threaded memory-access trace is
//! admitted by a shared-memory consistency model -- SC, TSO, PSO, WMO, or
//! POW.
//!
//! A trace is a fixed sequence of loads, stores, atomic read-modify-writes,
//! and memory barriers issued by a small number of threads. Given a model
//! name and a trace, [`model::check`] answers yes or no: does some legal
//! global ordering of the trace's operations exist that is consistent with
//! both program order and the model's ordering rules, and agrees with every
//! value actually read?
//!
//! The crate is organized the way the checker itself is staged:
//!
//! - [`seq`] / [`hashtab`] -- small collection primitives the rest of the
//!   crate builds on.
//! - [`instr`] / [`parser`] -- the instruction schema and the trace-file
//!   grammar that produces it.
//! - [`trace`] -- canonicalizes a parsed instruction list into dense ids and
//!   the derived reachability tables every engine needs.
//! - [`graph`] / [`journal`] -- a backtrackable happens-before graph.
//! - [`edges`] -- the per-model required-edge table for SC/TSO/PSO/WMO.
//! - [`analysis`] -- the SC/TSO/PSO/WMO backtracking search.
//! - [`valorder`] -- the POW backtracking search over per-address value
//!   orders.
//! - [`model`] -- ties a model name to the right engine.
//! - [`error`] -- the error types used before analysis begins.
//!
//! Analysis *rejection* -- a trace that is simply not admitted by the
//! requested model -- is never an error; it's the `false` that
//! [`model::check`] returns. [`error::AxeError`] covers only usage, I/O, and
//! grammar/trace-validation problems that stop a check from running at all.

pub mod analysis;
#[cfg(feature = "cli")]
pub mod cli;
pub mod edges;
pub mod error;
pub mod graph;
pub mod hashtab;
pub mod instr;
pub mod journal;
pub mod model;
pub mod parser;
pub mod seq;
pub mod trace;
pub mod valorder;
