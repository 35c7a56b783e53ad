//! # unsub-tools
//!
//! MCP server exposing the unsubscribe agent to other AI agents over stdio.
//! The building blocks live in the workspace crates and are re-exported here:
//!
//! - [`unsub_email`]: message parsing, IMAP, unsubscribe link discovery
//! - [`unsub_agent`]: the browser-driving agent

pub mod mcp;

pub use unsub_agent;
pub use unsub_email;
