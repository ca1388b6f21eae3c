use std::io::Read;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::request::{ChatRequest, ProviderQuirks, UpstreamCredentials};

/// Errors raised while opening or reading an upstream stream.
///
/// Display strings double as the client-facing error text, so they match
/// what the streaming endpoints have always emitted (`API error: ...`,
/// `Request timeout`).
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Non-success HTTP status; the body has already been read in full.
    #[error("API error: {body}")]
    Status { status: u16, body: String },

    /// The overall request deadline elapsed.
    #[error("Request timeout")]
    Timeout,

    /// Connection-level failure (DNS, TLS, reset, ...).
    #[error("{0}")]
    Network(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UpstreamError::Timeout
        } else {
            UpstreamError::Network(e.to_string())
        }
    }
}

/// Blocking producer of raw upstream bytes, consumed by the bridge worker.
///
/// `Ok(None)` is end-of-stream. Implemented by the live HTTP source and by
/// scripted sources in tests.
pub trait ByteSource: Send {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, UpstreamError>;
}

/// Blocking HTTP client for the upstream completions endpoint.
///
/// Construct once at startup (off the async runtime — the blocking reqwest
/// client may not be built inside it) and clone per request; `open` and the
/// returned source perform blocking I/O and must only run on the bridge's
/// worker thread.
#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::blocking::Client,
    read_chunk_bytes: usize,
}

impl UpstreamClient {
    pub fn new(timeout_secs: u64, read_chunk_bytes: usize) -> Result<Self, UpstreamError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            read_chunk_bytes: read_chunk_bytes.max(1),
        })
    }

    /// Open the streaming completion request.
    ///
    /// Returns a byte source on success. A non-success status reads the full
    /// error body and fails without opening a stream.
    pub fn open(
        &self,
        req: &ChatRequest,
        creds: &UpstreamCredentials,
    ) -> Result<HttpByteSource, UpstreamError> {
        let url = format!("{}/chat/completions", normalize_base_url(&creds.base_url));
        let body = build_request_body(req);

        debug!(model = %req.model, url = %url, "opening upstream stream");

        let resp = self.authed_post(&url, creds).json(&body).send()?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().unwrap_or_default();
            warn!(status, body = %text, "upstream API error");
            return Err(UpstreamError::Status { status, body: text });
        }

        Ok(HttpByteSource::new(resp, self.read_chunk_bytes))
    }

    /// Ask the upstream whether `model` accepts a `tools` payload.
    ///
    /// Sends one minimal non-streaming completion carrying a single test
    /// tool and classifies the answer. Upstream-side failures fold into
    /// [`ToolSupport::Unknown`] rather than erroring; the caller always gets
    /// a verdict.
    pub fn check_tools(&self, model: &str, creds: &UpstreamCredentials) -> ToolSupport {
        let url = format!("{}/chat/completions", normalize_base_url(&creds.base_url));

        debug!(model = %model, url = %url, "checking tool support");

        let resp = match self
            .authed_post(&url, creds)
            .timeout(Duration::from_secs(CAPABILITY_TIMEOUT_SECS))
            .json(&build_capability_body(model))
            .send()
        {
            Ok(resp) => resp,
            Err(e) => {
                let e = UpstreamError::from(e);
                warn!(error = %e, "capability check failed");
                return ToolSupport::Unknown {
                    reason: e.to_string(),
                };
            }
        };

        let status = resp.status().as_u16();
        let body = resp.text().unwrap_or_default();
        classify_tools_response(status, &body)
    }

    /// POST builder with bearer auth and any provider quirk headers applied.
    fn authed_post(
        &self,
        url: &str,
        creds: &UpstreamCredentials,
    ) -> reqwest::blocking::RequestBuilder {
        let mut request = self
            .client
            .post(url)
            .bearer_auth(&creds.api_key)
            .header("content-type", "application/json");

        if let ProviderQuirks::OpenRouter { referer, app_name } = &creds.quirks {
            request = request
                .header("HTTP-Referer", referer)
                .header("X-Title", app_name);
        }

        request
    }
}

/// Deadline for one capability check, overriding the client's streaming
/// timeout per request.
const CAPABILITY_TIMEOUT_SECS: u64 = 30;

/// Substrings that mark a 400 rejection as tool-related.
const TOOL_ERROR_HINTS: [&str; 4] = ["tool", "function", "not support", "unsupported"];

/// What a capability check learned about a model's function-calling support.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolSupport {
    /// The upstream accepted the `tools` payload.
    Supported,
    /// The upstream rejected the payload with a tool-related error.
    Unsupported,
    /// No definite answer, e.g. an unclear rejection or a transport failure.
    Unknown { reason: String },
}

/// Map the raw upstream answer onto a [`ToolSupport`] verdict. A 400 body
/// is searched lowercased for the tool-related hint substrings.
fn classify_tools_response(status: u16, body: &str) -> ToolSupport {
    match status {
        200 => ToolSupport::Supported,
        400 => {
            let lowered = body.to_lowercase();
            if TOOL_ERROR_HINTS.iter().any(|hint| lowered.contains(hint)) {
                ToolSupport::Unsupported
            } else {
                ToolSupport::Unknown {
                    reason: "Unable to determine capability".to_string(),
                }
            }
        }
        other => ToolSupport::Unknown {
            reason: format!("Unexpected API response: {other}"),
        },
    }
}

/// Live byte source over a streaming HTTP response.
///
/// Reads at the configured granularity; dropping it closes the upstream
/// connection, which is how cancellation reaches the provider.
pub struct HttpByteSource {
    resp: reqwest::blocking::Response,
    buf: Vec<u8>,
}

impl HttpByteSource {
    fn new(resp: reqwest::blocking::Response, read_chunk_bytes: usize) -> Self {
        Self {
            resp,
            buf: vec![0u8; read_chunk_bytes],
        }
    }
}

impl ByteSource for HttpByteSource {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, UpstreamError> {
        match self.resp.read(&mut self.buf) {
            Ok(0) => Ok(None),
            Ok(n) => Ok(Some(self.buf[..n].to_vec())),
            Err(e) if is_timeout_io_error(&e) => Err(UpstreamError::Timeout),
            Err(e) => Err(UpstreamError::Network(e.to_string())),
        }
    }
}

/// reqwest surfaces a mid-body deadline as an io::Error wrapping its own
/// timeout error, not as `ErrorKind::TimedOut`; check both.
fn is_timeout_io_error(e: &std::io::Error) -> bool {
    if e.kind() == std::io::ErrorKind::TimedOut {
        return true;
    }
    e.get_ref()
        .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
        .map(|re| re.is_timeout())
        .unwrap_or(false)
}

/// Strip trailing slashes and append the `/v1` suffix when absent.
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1")
    }
}

fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    serde_json::json!({
        "model": req.model,
        "messages": req.messages,
        "stream": true,
        "temperature": req.temperature,
        "max_tokens": req.max_tokens,
        "top_p": req.top_p,
    })
}

/// Minimal non-streaming completion carrying one test tool.
fn build_capability_body(model: &str) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "messages": [{"role": "user", "content": "What time is it?"}],
        "tools": [{
            "type": "function",
            "function": {
                "name": "get_current_time",
                "description": "Get the current time",
                "parameters": {"type": "object", "properties": {}, "required": []},
            },
        }],
        "max_tokens": 10,
        "temperature": 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{ChatMessage, Role};

    #[test]
    fn normalize_appends_version_suffix() {
        assert_eq!(
            normalize_base_url("https://api.openai.com"),
            "https://api.openai.com/v1"
        );
        assert_eq!(
            normalize_base_url("https://api.openai.com/"),
            "https://api.openai.com/v1"
        );
        assert_eq!(
            normalize_base_url("https://api.openai.com/v1"),
            "https://api.openai.com/v1"
        );
        assert_eq!(
            normalize_base_url("https://api.openai.com/v1/"),
            "https://api.openai.com/v1"
        );
        assert_eq!(
            normalize_base_url("https://openrouter.ai/api/v1"),
            "https://openrouter.ai/api/v1"
        );
    }

    #[test]
    fn request_body_shape() {
        let req = ChatRequest {
            model: "gpt-4".to_string(),
            messages: vec![ChatMessage {
                role: Role::User,
                content: "hello".to_string(),
            }],
            temperature: 0.7,
            max_tokens: 2048,
            top_p: 1.0,
        };
        let body = build_request_body(&req);

        assert_eq!(body["model"], "gpt-4");
        assert_eq!(body["stream"], true);
        assert_eq!(body["temperature"], 0.7);
        assert_eq!(body["max_tokens"], 2048);
        assert_eq!(body["top_p"], 1.0);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hello");
    }

    #[test]
    fn status_error_displays_api_error_text() {
        let e = UpstreamError::Status {
            status: 401,
            body: r#"{"error":"bad key"}"#.to_string(),
        };
        assert_eq!(e.to_string(), r#"API error: {"error":"bad key"}"#);
        assert_eq!(UpstreamError::Timeout.to_string(), "Request timeout");
    }

    #[test]
    fn capability_body_is_minimal_and_non_streaming() {
        let body = build_capability_body("gpt-4");

        assert_eq!(body["model"], "gpt-4");
        assert_eq!(body["max_tokens"], 10);
        assert_eq!(body["temperature"], 0);
        assert_eq!(body["tools"][0]["function"]["name"], "get_current_time");
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn tools_response_classification() {
        assert_eq!(classify_tools_response(200, ""), ToolSupport::Supported);
        assert_eq!(
            classify_tools_response(400, r#"{"error":"Tools are not supported here"}"#),
            ToolSupport::Unsupported
        );
        assert_eq!(
            classify_tools_response(400, r#"{"error":"FUNCTION calling unavailable"}"#),
            ToolSupport::Unsupported
        );
        assert_eq!(
            classify_tools_response(400, r#"{"error":"invalid request"}"#),
            ToolSupport::Unknown {
                reason: "Unable to determine capability".to_string()
            }
        );
        assert_eq!(
            classify_tools_response(503, "overloaded"),
            ToolSupport::Unknown {
                reason: "Unexpected API response: 503".to_string()
            }
        );
    }
}
