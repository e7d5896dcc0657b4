// src/models/mod.rs
//! Data structures shared by the services and stores.

pub mod request;
pub mod transcript;
