//! Satchel - encrypted sessions and bearer credentials for a school portal
//!
//! This library provides the credential layer that lets a stateless API
//! front a session-oriented portal client.

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod store;
pub mod upstream;
