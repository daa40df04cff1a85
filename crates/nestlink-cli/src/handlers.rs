//! Command handlers for CLI subcommands
//!
//! This module contains the implementation logic for each CLI subcommand.

mod completions;
mod query;
mod session;
mod subscribe;
mod utils;

pub use completions::handle_completions;
pub use query::handle_query;
pub use session::handle_session;
pub use subscribe::handle_subscribe;
