//! Integration tests for tickflow-relay.
//!
//! These tests verify the interaction between components:
//! - Venue connection lifecycle and subscription replay
//! - Frame ingestion through to history, bus, and clients
//! - Client isolation under disconnects

pub mod common;
