// src/core/tasks/mod.rs

//! Long-running background tasks that support the gateway.

pub mod liveness;
