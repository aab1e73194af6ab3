//! # ranging-server
//!
//! HTTP host for the beacon ranging coordinator.
//!
//! This library provides the API handlers and state management for the
//! `ranging-server` binary.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
