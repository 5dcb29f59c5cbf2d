//! Platform integration: desktop environments and screen locking.

pub mod desktop;
