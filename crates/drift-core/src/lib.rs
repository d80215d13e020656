//! # drift-core
//!
//! Core types for the Drift relay:
//! - The session/pairing state machine (`ChatState`)
//! - Coarse identity fingerprinting for moderation bookkeeping
//! - The JSON wire events exchanged with clients
//!
//! This crate has no network code and no async code.
//! It is the foundation the relay server builds on: every operation
//! mutates one owned state object and returns an explicit list of
//! effects for the transport layer to deliver.

pub mod error;
pub mod identity;
pub mod protocol;
pub mod session;
