#![forbid(unsafe_code)]

//! ykmon — YubiKey presence monitor.
//!
//! Polls the USB bus for a configured vendor:product signature (Yubico
//! keys by default), sends desktop notifications on insert/remove edges,
//! and optionally locks the screen after a grace period of absence.
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use ykmon::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use ykmon::core::config::Config;
//! use ykmon::detect::parser::parse_devices;
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod detect;
pub mod platform;
