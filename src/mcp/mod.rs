//! Model Context Protocol (MCP) server handling and JSON-RPC implementations
//!
//! Provides protocol-level specifics surrounding JSON-RPC envelopes, negotiation and routing.

pub mod dispatcher;
pub mod rpc;
