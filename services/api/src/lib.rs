//! Parlare API Library Crate
//!
//! This library contains the web-facing side of the exercise generator:
//! configuration, the application state, API handlers and routing. The
//! binaries in `bin/` are thin wrappers around it.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
