//! Mock LMS transport for tests: scripted responses, recorded calls, no network.

use registrar_types::{LmsError, LmsMethod, LmsResponse, LmsTransport};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// One request seen by [`MockLmsTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: LmsMethod,
    pub url: String,
    pub body: Option<serde_json::Value>,
}

enum Scripted {
    Response(LmsResponse),
    Echo(u16),
    TransportError(String),
}

/// Mock LMS.
///
/// GETs are answered from a url -> response map (404 otherwise). Writes take the next
/// scripted reply; when none is left they echo `{student_key: status}` back with the
/// default echo status (200).
pub struct MockLmsTransport {
    gets: HashMap<String, LmsResponse>,
    writes: Mutex<VecDeque<Scripted>>,
    default_echo_status: u16,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockLmsTransport {
    pub fn new() -> Self {
        Self {
            gets: HashMap::new(),
            writes: Mutex::new(VecDeque::new()),
            default_echo_status: 200,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_get(mut self, url: &str, response: LmsResponse) -> Self {
        self.gets.insert(url.to_string(), response);
        self
    }

    /// Answer writes without a scripted reply by echoing with `status`.
    pub fn with_default_echo(mut self, status: u16) -> Self {
        self.default_echo_status = status;
        self
    }

    /// Next write gets this response verbatim.
    pub fn then_respond(self, response: LmsResponse) -> Self {
        self.push(Scripted::Response(response))
    }

    /// Next write echoes its statuses back with `status`.
    pub fn then_echo(self, status: u16) -> Self {
        self.push(Scripted::Echo(status))
    }

    /// Next write fails without a response.
    pub fn then_transport_error(self, message: &str) -> Self {
        self.push(Scripted::TransportError(message.to_string()))
    }

    fn push(self, scripted: Scripted) -> Self {
        self.writes
            .lock()
            .expect("mock lock poisoned")
            .push_back(scripted);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("mock lock poisoned").clone()
    }

    /// Bodies of all write calls, in order.
    pub fn write_bodies(&self) -> Vec<serde_json::Value> {
        self.calls()
            .into_iter()
            .filter(|c| c.method != LmsMethod::Get)
            .filter_map(|c| c.body)
            .collect()
    }

    fn echo(status: u16, body: Option<&serde_json::Value>) -> LmsResponse {
        let mut out = serde_json::Map::new();
        if let Some(items) = body.and_then(|b| b.as_array()) {
            for item in items {
                if let (Some(key), Some(status)) = (
                    item.get("student_key").and_then(|v| v.as_str()),
                    item.get("status").cloned(),
                ) {
                    out.insert(key.to_string(), status);
                }
            }
        }
        LmsResponse::new(status, serde_json::Value::Object(out).to_string())
    }
}

impl Default for MockLmsTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LmsTransport for MockLmsTransport {
    async fn send(
        &self,
        method: LmsMethod,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<LmsResponse, LmsError> {
        self.calls
            .lock()
            .expect("mock lock poisoned")
            .push(RecordedCall {
                method,
                url: url.to_string(),
                body: body.cloned(),
            });
        if method == LmsMethod::Get {
            return Ok(self
                .gets
                .get(url)
                .cloned()
                .unwrap_or_else(|| LmsResponse::new(404, "not found")));
        }
        let next = self.writes.lock().expect("mock lock poisoned").pop_front();
        match next {
            Some(Scripted::Response(r)) => Ok(r),
            Some(Scripted::Echo(status)) => Ok(Self::echo(status, body)),
            Some(Scripted::TransportError(msg)) => Err(LmsError::Transport(msg)),
            None => Ok(Self::echo(self.default_echo_status, body)),
        }
    }
}
