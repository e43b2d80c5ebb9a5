// src/core/handler/actions/mod.rs

// The router reaches these as `actions::module::function`.
pub mod console;
pub mod forward;
pub mod login;
pub mod registration;
