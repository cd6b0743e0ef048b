//! Revivir - runtime trace-capture engine for time-travel debugging
//!
//! This library rewrites a program image's compiled methods so that, as they
//! execute, they report their identity, arguments, return values, and
//! control-flow path to a durable log that external tooling can replay.
//! It covers class filtering, per-method instruction rewriting, the runtime
//! trace recorder with bounded flush-on-threshold buffering, and the
//! bounded object-graph walker.

pub mod cli;
pub mod config;
pub mod filter;
pub mod interp;
pub mod ir;
pub mod recorder;
pub mod rewriter;
pub mod stack_walk;
pub mod store;
pub mod types;
pub mod walker;
