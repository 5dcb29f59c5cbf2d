//! Device detection: probing, parsing, and presence tracking.

pub mod parser;
pub mod prober;
pub mod tracker;
