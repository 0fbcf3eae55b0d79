//! Output formatting and reporting
//!
//! # Modules
//!
//! - `text`: Console banner and per-round summary lines
//! - `json`: Machine-readable end-of-run report

pub mod json;
pub mod text;
