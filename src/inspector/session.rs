//! Minimal DevTools protocol session over a WebSocket.
//!
//! Only `Runtime.evaluate` is used. Requests carry increasing ids and any
//! message with a different id (events, late replies to abandoned calls)
//! is skipped.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::error::InspectorError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct CdpSession {
    socket: Socket,
    next_id: u64,
}

impl CdpSession {
    pub async fn connect(url: &str) -> Result<Self, InspectorError> {
        let (socket, _) = connect_async(url).await?;
        debug!("Connected to inspector session {}", url);
        Ok(Self { socket, next_id: 0 })
    }

    /// Sends one command and waits for the reply with the matching id.
    pub async fn call(&mut self, method: &str, params: Value) -> Result<Value, InspectorError> {
        self.next_id += 1;
        let id = self.next_id;
        let request = json!({ "id": id, "method": method, "params": params });
        self.socket.send(Message::Text(request.to_string())).await?;

        while let Some(message) = self.socket.next().await {
            let text = match message? {
                Message::Text(text) => text,
                Message::Close(_) => return Err(InspectorError::Closed),
                _ => continue,
            };
            let reply: Value = serde_json::from_str(&text)?;
            if reply.get("id").and_then(Value::as_u64) != Some(id) {
                trace!("Skipping inspector message: {}", text);
                continue;
            }
            if let Some(error) = reply.get("error") {
                return Err(InspectorError::Protocol(error.to_string()));
            }
            return Ok(reply.get("result").cloned().unwrap_or(Value::Null));
        }
        Err(InspectorError::Closed)
    }

    /// Evaluates `expression`, awaiting a returned promise, and returns the
    /// result by value.
    pub async fn evaluate(&mut self, expression: &str) -> Result<Value, InspectorError> {
        let result = self
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "awaitPromise": true,
                    "returnByValue": true,
                    "silent": true,
                }),
            )
            .await?;
        evaluation_value(result)
    }
}

/// Extracts `result.value` from a `Runtime.evaluate` reply.
pub fn evaluation_value(result: Value) -> Result<Value, InspectorError> {
    if let Some(details) = result.get("exceptionDetails") {
        let text = details
            .pointer("/exception/description")
            .or_else(|| details.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("unknown exception");
        return Err(InspectorError::Script(text.to_string()));
    }
    result
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .ok_or_else(|| InspectorError::Malformed("evaluation returned no value".to_string()))
}
