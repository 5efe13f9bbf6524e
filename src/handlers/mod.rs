// src/handlers/mod.rs
pub mod execute;

pub use execute::gateway_routes;
