//! Registrar HTTP API.

pub mod server;
