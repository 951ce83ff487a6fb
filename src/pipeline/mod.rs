//! Cloud-cover pipeline: fetch, ensemble, aggregate, correct, classify.
//!
//! Stages are plain functions or small structs over [`types`]; [`driver`]
//! wires them together per region and per refresh cycle.

pub mod aggregate;
pub mod bias;
pub mod classify;
pub mod driver;
pub mod ensemble;
pub mod fetcher;
pub mod solar;
pub mod types;
pub mod utility;
