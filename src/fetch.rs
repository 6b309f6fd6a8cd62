use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use super::*;

pub(crate) type MockExchange = std::result::Result<FetchResponse, String>;

/// Request options for `api_call`. `None` fields fall back to the defaults.
/// The merge is shallow: a caller-supplied field replaces the default
/// wholesale, so supplying any `headers` map drops the default content-type
/// rather than merging key by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiOptions {
    pub method: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
    pub body: Option<String>,
}

impl ApiOptions {
    fn defaults() -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Self {
            method: None,
            headers: Some(headers),
            body: None,
        }
    }

    fn shallow_merge(defaults: Self, overrides: Self) -> Self {
        Self {
            method: overrides.method.or(defaults.method),
            headers: overrides.headers.or(defaults.headers),
            body: overrides.body.or(defaults.body),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub ok: bool,
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn new(status: u16, body: &str) -> Self {
        Self {
            ok: (200..300).contains(&status),
            status,
            body: body.to_string(),
        }
    }
}

/// The network capability behind `api_call`. Injecting one keeps the helper
/// testable without a real network; when none is installed the built-in
/// per-URL mock registry answers instead.
pub trait FetchTransport {
    fn fetch(
        &mut self,
        url: &str,
        options: &ApiOptions,
    ) -> std::result::Result<FetchResponse, String>;
}

/// Uniform result shape of `api_call`. Failures never escape as `Err`; they
/// arrive here with `ok == false` and a non-empty `error`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResult {
    pub ok: bool,
    pub status: Option<u16>,
    pub data: Option<JsonValue>,
    pub error: Option<String>,
}

impl Page {
    pub fn set_fetch_mock(&mut self, url: &str, status: u16, body: &str) {
        self.fetch_mocks
            .insert(url.to_string(), Ok(FetchResponse::new(status, body)));
    }

    pub fn set_fetch_error(&mut self, url: &str, message: &str) {
        self.fetch_mocks
            .insert(url.to_string(), Err(message.to_string()));
    }

    pub fn clear_fetch_mocks(&mut self) {
        self.fetch_mocks.clear();
    }

    pub fn take_fetch_calls(&mut self) -> Vec<String> {
        std::mem::take(&mut self.fetch_calls)
    }

    pub fn set_fetch_transport(&mut self, transport: Box<dyn FetchTransport>) {
        self.transport = Some(transport);
    }

    /// Issues the request with JSON defaults and folds every failure into
    /// the returned value. The body is always parsed as JSON; a parse
    /// failure takes the same path as a network failure.
    pub fn api_call(&mut self, url: &str, options: Option<ApiOptions>) -> ApiResult {
        let merged = ApiOptions::shallow_merge(ApiOptions::defaults(), options.unwrap_or_default());
        self.fetch_calls.push(url.to_string());

        let exchange = if let Some(transport) = self.transport.as_mut() {
            transport.fetch(url, &merged)
        } else {
            self.fetch_mocks
                .get(url)
                .cloned()
                .unwrap_or_else(|| Err(format!("network error: no response for {url}")))
        };

        let outcome = exchange.and_then(|response| {
            match serde_json::from_str::<JsonValue>(&response.body) {
                Ok(data) => Ok((response, data)),
                Err(err) => Err(format!("invalid JSON body: {err}")),
            }
        });

        match outcome {
            Ok((response, data)) => ApiResult {
                ok: response.ok,
                status: Some(response.status),
                data: Some(data),
                error: None,
            },
            Err(message) => {
                self.record_fetch_failure(format!(
                    "[fetch] api call failed url={url} error={message}"
                ));
                ApiResult {
                    ok: false,
                    status: None,
                    data: None,
                    error: Some(message),
                }
            }
        }
    }
}
