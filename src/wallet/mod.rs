// src/wallet/mod.rs
//! Wallet keys and signatures.

pub mod key_management;
pub mod signature;
