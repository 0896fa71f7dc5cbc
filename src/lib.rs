//! tideline — headless core of a social-feed client over a hosted
//! application backend.
//!
//! The backend supplies auth, a relational store, object storage, and
//! realtime change notifications; this crate owns the typed client-side
//! projections (feed, thread), the data-access seams, and the realtime
//! plumbing that keeps the projections current. All durable state lives on
//! the backend; the client never treats its local copy as authoritative.

pub mod backend;
pub mod config;
pub mod consumers;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;

pub use error::{Error, Result};
