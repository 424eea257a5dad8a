//! Shared fixtures for integration tests.
//!
//! Each integration test binary compiles this module separately, so not
//! every fixture is used by every binary.
#![allow(dead_code)]

pub mod handlers;
