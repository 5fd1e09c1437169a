//! Common test utilities shared by the integration test crates
//!
//! Not every crate uses every helper.
#![allow(dead_code)]

pub mod raw_peer;
pub mod test_data;
pub mod test_server;
