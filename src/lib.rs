// src/lib.rs
//! # Transcript Access Service
//!
//! Lets students share academic transcripts stored on IPFS with recipients
//! such as employers or universities. Callers are identified only by
//! Ethereum wallets, proven with `personal_sign` signatures over single-use
//! nonces.
//!
//! ## Architecture Overview
//! 1. **Wallet Layer**: signature recovery and key handling (`wallet`)
//! 2. **Services Layer**: authentication, request lifecycle, access checks and the API (`services`)
//! 3. **Storage Layer**: ephemeral nonce/session store and durable record store (`storage`)
//! 4. **Models**: requests and transcripts (`models`)

pub mod error;    // Error taxonomy and HTTP mapping
pub mod models;   // Data structures
pub mod services; // Business logic and API
pub mod storage;  // Nonce/session and record stores
pub mod utils;    // Configuration and crypto helpers
pub mod wallet;   // Signature verification and key management
