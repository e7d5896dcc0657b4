// src/services/mod.rs
//! Business logic and the HTTP API.

pub mod access_resolver;
pub mod api_server;
pub mod authenticator;
pub mod identity;
pub mod request_manager;
pub mod transcript_registry;
