//! HTTP Surface
//!
//! Operational endpoints: gateway upgrade, health probes, metrics.

pub mod health;
pub mod routes;
