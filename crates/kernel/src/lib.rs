//! Agora forum kernel.
//!
//! HTTP server and plugin runtime host. The extensibility machinery itself
//! lives in `agora-runtime`; this crate wires it to Postgres, Redis, and
//! the admin and plugin HTTP surfaces.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod storage;
