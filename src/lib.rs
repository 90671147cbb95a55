//! Emergency-call dispatch service.
//!
//! Inbound emergency calls become incidents that are routed down a
//! configurable escalation ladder until somebody answers, with every
//! attempt and state change recorded on an append-only incident timeline.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod routing;
pub mod state;
pub mod telephony;

pub use error::{AppError, Result};
