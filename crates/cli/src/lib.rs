//! webrig CLI
//!
//! Command-line front end: run the suite between a managed server and
//! browser driver, rerun it on changes, or serve a built site.

pub mod commands;
pub mod output;
