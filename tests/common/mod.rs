//! Common test utilities and fixtures for integration tests.
//!
//! # Modules
//!
//! - `fixtures`: mock backends, provider bodies, and courier wiring
//! - `log_capture`: capture `tracing` events emitted by the library
//! - `logger`: structured per-test logging

#![allow(dead_code)]

pub mod fixtures;
pub mod log_capture;
pub mod logger;
