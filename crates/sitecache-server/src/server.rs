//! JSON-RPC 2.0 over stdio, one message per line.
//!
//! Requests are handled concurrently, each in its own task; responses go
//! through a single writer task so lines never interleave. Notifications
//! (messages without an `id`) are accepted and ignored.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sitecache_core::Operations;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{prompts, tools};

// ============================================================================
// Constants
// ============================================================================

/// Protocol revision answered when the client does not ask for one
const DEFAULT_PROTOCOL_VERSION: &str = "2025-06-18";

const SERVER_NAME: &str = "sitecache";

/// Buffer size for the outgoing message channel
const CHANNEL_BUFFER_SIZE: usize = 32;

/// JSON-RPC error codes
mod code {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Deserialize)]
struct Request {
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn invalid_params(e: impl std::fmt::Display) -> Self {
        Self::new(code::INVALID_PARAMS, format!("Invalid params: {}", e))
    }
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct GetPromptParams {
    name: String,
    #[serde(default)]
    arguments: Map<String, Value>,
}

fn response(id: Value, outcome: Result<Value, RpcError>) -> Value {
    match outcome {
        Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
        Err(e) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": e.code, "message": e.message}
        }),
    }
}

fn parse_params<T: for<'de> Deserialize<'de>>(params: Option<Value>) -> Result<T, RpcError> {
    let params = params.ok_or_else(|| RpcError::new(code::INVALID_PARAMS, "Missing params"))?;
    serde_json::from_value(params).map_err(RpcError::invalid_params)
}

// ============================================================================
// Server
// ============================================================================

pub struct Server {
    operations: Operations,
}

impl Server {
    pub fn new(operations: Operations) -> Self {
        Self { operations }
    }

    /// Serve until `reader` hits EOF, then wait for in-flight calls to answer.
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<Value>(CHANNEL_BUFFER_SIZE);

        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(message) = rx.recv().await {
                let mut line = serde_json::to_vec(&message)?;
                line.push(b'\n');
                writer.write_all(&line).await?;
                writer.flush().await?;
            }
            Ok::<(), anyhow::Error>(())
        });

        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await.context("Failed to read from stdin")? {
            if line.trim().is_empty() {
                continue;
            }
            let server = Arc::clone(&self);
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(reply) = server.handle_line(&line).await {
                    if tx.send(reply).await.is_err() {
                        warn!("Output closed, dropping response");
                    }
                }
            });
        }
        debug!("Input closed, draining responses");

        drop(tx);
        writer_task.await.context("Writer task failed")??;
        Ok(())
    }

    /// Handle one raw line; `None` when nothing should be written back.
    pub async fn handle_line(&self, line: &str) -> Option<Value> {
        let message: Value = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Unparseable message");
                return Some(response(
                    Value::Null,
                    Err(RpcError::new(code::PARSE_ERROR, format!("Parse error: {}", e))),
                ));
            }
        };
        let id = message.get("id").cloned();
        let request: Request = match serde_json::from_value(message) {
            Ok(request) => request,
            Err(e) => {
                return Some(response(
                    id.unwrap_or(Value::Null),
                    Err(RpcError::new(code::INVALID_REQUEST, format!("Invalid request: {}", e))),
                ))
            }
        };

        let Some(id) = request.id else {
            debug!(method = %request.method, "Notification ignored");
            return None;
        };
        let outcome = self.handle(&request.method, request.params).await;
        Some(response(id, outcome))
    }

    async fn handle(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        debug!(method, "Request");
        match method {
            "initialize" => Ok(initialize(params)),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": tools::definitions() })),
            "tools/call" => {
                let call: CallToolParams = parse_params(params)?;
                let envelope = self.operations.dispatch(&call.name, call.arguments).await;
                let is_error = envelope.get("success") != Some(&Value::Bool(true));
                Ok(json!({
                    "content": [{"type": "text", "text": envelope.to_string()}],
                    "isError": is_error,
                }))
            }
            "prompts/list" => Ok(json!({ "prompts": prompts::definitions() })),
            "prompts/get" => {
                let get: GetPromptParams = parse_params(params)?;
                prompts::render(&get.name, &get.arguments).map_err(RpcError::invalid_params)
            }
            other => Err(RpcError::new(
                code::METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            )),
        }
    }
}

fn initialize(params: Option<Value>) -> Value {
    let version = params
        .as_ref()
        .and_then(|p| p.get("protocolVersion"))
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_PROTOCOL_VERSION)
        .to_string();
    json!({
        "protocolVersion": version,
        "capabilities": {
            "tools": {"listChanged": false},
            "prompts": {"listChanged": false}
        },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}
