// src/core/handler/mod.rs

mod actions;

pub mod handoff;
pub mod router;
