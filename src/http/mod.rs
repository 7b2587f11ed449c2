//! Transport layer for the Model Context Protocol
//!
//! Provides the external routes: the streamed-HTTP `/mcp` endpoint, the `/ws` socket
//! endpoint, the root descriptor and the shared cross-origin handling.

pub mod cors;
pub mod handlers;
pub mod websocket;
