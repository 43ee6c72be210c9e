//! Monitor daemon for the stream fallback controller.
//!
//! A single process with a handful of cooperative tasks:
//! the HTTP ingress accepting heartbeat reports, the record store with its
//! persistence flusher, the periodic decision engine driving the slate
//! service, an optional camera pinger, and the broadcast recovery worker.

pub mod camera;
pub mod config;
pub mod decider;
pub mod recovery;
pub mod routes;
pub mod server;
pub mod service;
pub mod store;
