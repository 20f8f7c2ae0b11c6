// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! MCP (Model Context Protocol) client: registers external MCP servers over
//! HTTP or stdio, fans out `tools/call` requests, and caches `tools/list`
//! results so the gateway's composite tool executor can fall back to them
//! (§4.7, §4.8).
pub mod registry;
pub mod rpc;
pub mod transport;

pub use registry::{namespaced_id, project_of, McpError, McpRegistry, McpServerSpec, McpToolInfo, ServerStatus, TransportKind};
pub use rpc::{error_message, IdGenerator, JsonRpcErrorObject, JsonRpcRequest, JsonRpcResponse};
pub use transport::{HttpTransport, StdioTransport, Transport, TransportError};
