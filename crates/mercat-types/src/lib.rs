//! Shared types for the mercat marketplace: domain models, HTTP DTOs and
//! gateway events. No I/O lives here.

pub mod api;
pub mod events;
pub mod models;
