//! HTTP transport for remote MCP servers (streamable HTTP).
//!
//! Requests are POSTed as JSON; the server may answer with a JSON body or a
//! `text/event-stream` carrying the response as a `data:` event.

use crate::protocol::{
    response_from_data_line, InitializeResult, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, LineBuffer,
};
use crate::server::{HttpConfig, TransportKind};
use crate::transport::{Transport, TransportError, TransportResult};
use async_trait::async_trait;
use futures::StreamExt;
use mcpvisor_util::expand_env;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Header carrying the session id assigned by the server.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// HTTP transport.
pub struct HttpTransport {
    name: String,
    url: String,
    headers: HashMap<String, String>,
    timeout: Duration,
    client: Option<Client>,
    session_id: Option<String>,
    next_id: u64,
    server_info: Vec<(String, String)>,
}

impl HttpTransport {
    pub fn new(name: &str, config: &HttpConfig, timeout: Duration) -> TransportResult<Self> {
        reqwest::Url::parse(&config.url)
            .map_err(|e| TransportError::new(format!("Invalid url '{}': {e}", config.url)))?;

        Ok(Self {
            name: name.to_string(),
            url: config.url.clone(),
            headers: config
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), expand_env(v)))
                .collect(),
            timeout,
            client: None,
            session_id: None,
            next_id: 1,
            server_info: Vec::new(),
        })
    }

    fn next_request_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn with_headers(&self, mut req: RequestBuilder) -> RequestBuilder {
        for (key, value) in &self.headers {
            req = req.header(key, value);
        }
        if let Some(session) = &self.session_id {
            req = req.header(SESSION_HEADER, session);
        }
        req
    }

    async fn post<T: Serialize>(&self, client: &Client, body: &T) -> TransportResult<Response> {
        let req = client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .json(body);
        let response = self.with_headers(req).send().await?;
        check_status(response.status())?;
        Ok(response)
    }

    async fn initialize(&mut self, client: &Client) -> TransportResult<()> {
        let id = self.next_request_id();
        let response = self.post(client, &JsonRpcRequest::initialize(id)).await?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            self.session_id = Some(session.to_string());
        }

        let response = read_response(response, id).await?;
        let result = response
            .into_result()
            .map_err(|e| TransportError::new(format!("Initialization failed: {e}")))?;
        let init: InitializeResult = serde_json::from_value(result).unwrap_or_default();
        self.server_info = init.metadata();

        if let Err(e) = self.post(client, &JsonRpcNotification::initialized()).await {
            warn!(server = %self.name, error = %e, "Initialized notification was rejected");
        }
        Ok(())
    }
}

fn check_status(status: StatusCode) -> TransportResult<()> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(TransportError::new(format!(
            "Authentication required ({status})"
        )));
    }
    if !status.is_success() {
        return Err(TransportError::new(format!("Server returned {status}")));
    }
    Ok(())
}

/// Read the JSON-RPC response to `id` from a JSON or event-stream body.
async fn read_response(response: Response, id: u64) -> TransportResult<JsonRpcResponse> {
    let is_stream = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("text/event-stream"));

    if !is_stream {
        let text = response.text().await?;
        return serde_json::from_str(&text)
            .map_err(|e| TransportError::new(format!("Invalid JSON response: {e}")));
    }

    // The stream may stay open after the response; stop at the first match.
    let mut stream = response.bytes_stream();
    let mut lines = LineBuffer::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| TransportError::new(format!("Stream error: {e}")))?;
        lines.push(&chunk)?;

        while let Some(line) = lines.next_line() {
            if let Some(response) = response_from_data_line(&line) {
                if response.answers(id) {
                    return Ok(response);
                }
            }
        }
    }

    Err(TransportError::new("Event stream ended without a response"))
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn connect(&mut self) -> TransportResult<()> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| TransportError::new(format!("Failed to create HTTP client: {e}")))?;

        debug!(server = %self.name, url = %self.url, "Connecting to MCP server over HTTP");
        self.initialize(&client).await?;
        self.client = Some(client);
        Ok(())
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };

        if self.session_id.is_some() {
            let req = self.with_headers(client.delete(&self.url));
            match req.send().await {
                Ok(resp) => debug!(server = %self.name, status = %resp.status(), "Session closed"),
                Err(e) => debug!(server = %self.name, error = %e, "Session close failed"),
            }
        }
        self.session_id = None;
        Ok(())
    }

    async fn healthcheck(&mut self) -> TransportResult<()> {
        let client = self
            .client
            .clone()
            .ok_or_else(|| TransportError::new("Not connected"))?;
        let id = self.next_request_id();
        // Any 2xx answer to a ping proves the endpoint is serving.
        self.post(&client, &JsonRpcRequest::ping(id)).await?;
        Ok(())
    }

    async fn force_terminate(&mut self) {
        self.client = None;
        self.session_id = None;
    }

    fn metadata(&self) -> Vec<(String, String)> {
        let mut meta = vec![
            ("transport".to_string(), "http".to_string()),
            ("url".to_string(), self.url.clone()),
        ];
        if let Some(session) = &self.session_id {
            meta.push(("session_id".to_string(), session.clone()));
        }
        meta.extend(self.server_info.iter().cloned());
        meta
    }
}
