//! Integration tests for the arbitrage engine.
//!
//! Everything here runs against paper exchanges except `live`, which needs
//! real API credentials and is ignored by default:
//! `cargo test --test integration -- --ignored`

mod common;
mod live;
mod pipeline;
mod recovery;
