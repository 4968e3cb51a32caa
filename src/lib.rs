//! The back end of a trace-based JIT compiler.
//!
//! This crate takes a trace IR whose construction happens elsewhere, assigns
//! storage to the values it defines (dispatching between register allocation
//! strategies on a per-trace basis) and lowers the IR to target LIR
//! instruction objects. Turning those objects into machine bytes is the
//! encoder's job, which is not part of this crate.

#![allow(clippy::upper_case_acronyms)]

pub mod compile;
pub(crate) mod log;
