//! Control Escolar - school management persistence core
//!
//! This library crate exposes the application context, configuration and
//! domain services for the binary and for integration testing.

pub mod app;
pub mod config;
pub mod services;
