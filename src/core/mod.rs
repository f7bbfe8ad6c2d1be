//! Core runtime infrastructure.
//!
//! This module contains the essential components for running etkv:
//! - [`config`] - Configuration parsing and validation
//! - [`runtime`] - Component lifecycle orchestration
//! - [`time`] - Clocks and millisecond ticks
//! - [`error`] - Engine error taxonomy

pub mod config;
pub mod error;
pub mod runtime;
pub mod time;
