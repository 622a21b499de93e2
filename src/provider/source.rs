use std::{fmt, time::Duration};

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::Error;

use super::RetryPolicy;

/// JSON-RPC error codes providers use for throttling.
const RPC_RATE_LIMIT_CODES: [i64; 3] = [429, -32005, -32029];
/// JSON-RPC error codes signalling a node-side hiccup worth retrying.
const RPC_TRANSIENT_CODES: [i64; 2] = [-32603, -32000];

/// What to fetch. Every outbound call the pipeline makes is one of these.
#[derive(Debug, Clone)]
pub enum Resource {
    Http {
        url: String,
    },
    Rpc {
        endpoint: String,
        method: String,
        params: Value,
    },
}

impl Resource {
    pub fn http(url: impl Into<String>) -> Resource {
        Resource::Http { url: url.into() }
    }

    pub fn rpc(endpoint: &str, method: &str, params: Value) -> Resource {
        Resource::Rpc {
            endpoint: endpoint.to_owned(),
            method: method.to_owned(),
            params,
        }
    }
}

/// Rendered without paths or query strings: RPC endpoints carry API keys.
impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Resource::Http { url } => match Url::parse(url) {
                Ok(parsed) => write!(
                    f,
                    "GET {}{}",
                    parsed.host_str().unwrap_or_default(),
                    parsed.path()
                ),
                Err(_) => write!(f, "GET <invalid url>"),
            },
            Resource::Rpc {
                endpoint, method, ..
            } => {
                let host = Url::parse(endpoint)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_owned))
                    .unwrap_or_default();
                write!(f, "rpc {} @ {}", method, host)
            },
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("{resource}: gave up after {attempts} attempt(s): {last_error}")]
    Exhausted {
        resource: String,
        attempts: u32,
        last_error: String,
    },

    #[error("{resource}: cancelled")]
    Cancelled { resource: String },
}

impl FetchError {
    pub fn resource(&self) -> &str {
        match self {
            FetchError::Exhausted { resource, .. } => resource,
            FetchError::Cancelled { resource } => resource,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled { .. })
    }
}

enum Attempt<T> {
    Done(Option<T>),
    Retry { rate_limited: bool, error: String },
}

/// External Source Adapter.
///
/// `Ok(Some(_))` is a well-formed payload, `Ok(None)` means "no data"
/// (empty, malformed, or rejected as non-transient) and `Err` is returned
/// only once transient failures have used up the retry budget.
#[derive(Debug, Clone)]
pub struct Source {
    http: Client,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl Source {
    pub fn new(
        timeout: Duration,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Result<Source, Error> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("stablecoin-etl")
            .build()?;

        Ok(Source {
            http,
            policy,
            cancel,
        })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: impl Into<String>,
    ) -> Result<Option<T>, FetchError> {
        self.fetch(&Resource::http(url)).await
    }

    pub async fn rpc<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        method: &str,
        params: Value,
    ) -> Result<Option<T>, FetchError> {
        self.fetch(&Resource::rpc(endpoint, method, params)).await
    }

    pub async fn fetch<T: DeserializeOwned>(
        &self,
        resource: &Resource,
    ) -> Result<Option<T>, FetchError> {
        let mut attempt = 0;

        loop {
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(FetchError::Cancelled {
                        resource: resource.to_string(),
                    });
                },
                outcome = self.attempt::<T>(resource) => outcome,
            };

            let (rate_limited, error) = match outcome {
                Attempt::Done(data) => return Ok(data),
                Attempt::Retry {
                    rate_limited,
                    error,
                } => (rate_limited, error),
            };

            if !self.policy.has_attempts_left(attempt) {
                return Err(FetchError::Exhausted {
                    resource: resource.to_string(),
                    attempts: attempt + 1,
                    last_error: error,
                });
            }

            let delay = self.policy.delay(attempt, rate_limited);
            warn!(
                resource = %resource,
                attempt = attempt + 1,
                rate_limited,
                delay_ms = delay.as_millis() as u64,
                "request failed, retrying: {}",
                error
            );

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(FetchError::Cancelled {
                        resource: resource.to_string(),
                    });
                },
                _ = tokio::time::sleep(delay) => {},
            }

            attempt += 1;
        }
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        resource: &Resource,
    ) -> Attempt<T> {
        let request = match resource {
            Resource::Http { url } => self.http.get(url),
            Resource::Rpc {
                endpoint,
                method,
                params,
            } => self.http.post(endpoint).json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params,
            })),
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return Attempt::Retry {
                    rate_limited: false,
                    error: e.without_url().to_string(),
                };
            },
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Attempt::Retry {
                rate_limited: true,
                error: status.to_string(),
            };
        }
        if status.is_server_error() {
            return Attempt::Retry {
                rate_limited: false,
                error: status.to_string(),
            };
        }
        if !status.is_success() {
            debug!(resource = %resource, %status, "non-transient response");
            return Attempt::Done(None);
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Attempt::Retry {
                    rate_limited: false,
                    error: e.without_url().to_string(),
                };
            },
        };

        match resource {
            Resource::Http { .. } => Attempt::Done(parse_payload(resource, &body)),
            Resource::Rpc { .. } => parse_rpc_payload(resource, &body),
        }
    }
}

fn parse_payload<T: DeserializeOwned>(
    resource: &Resource,
    body: &str,
) -> Option<T> {
    if body.trim().is_empty() {
        return None;
    }

    match serde_json::from_str::<T>(body) {
        Ok(data) => Some(data),
        Err(e) => {
            warn!(resource = %resource, "malformed payload: {}", e);
            None
        },
    }
}

fn parse_rpc_payload<T: DeserializeOwned>(
    resource: &Resource,
    body: &str,
) -> Attempt<T> {
    let envelope: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            warn!(resource = %resource, "malformed rpc envelope: {}", e);
            return Attempt::Done(None);
        },
    };

    if let Some(error) = envelope.get("error").filter(|e| !e.is_null()) {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let lowered = message.to_lowercase();

        if RPC_RATE_LIMIT_CODES.contains(&code)
            || lowered.contains("rate limit")
            || lowered.contains("too many requests")
        {
            return Attempt::Retry {
                rate_limited: true,
                error: format!("rpc error {}: {}", code, message),
            };
        }

        if RPC_TRANSIENT_CODES.contains(&code) {
            return Attempt::Retry {
                rate_limited: false,
                error: format!("rpc error {}: {}", code, message),
            };
        }

        warn!(resource = %resource, code, "rpc rejected request: {}", message);
        return Attempt::Done(None);
    }

    match envelope.get("result") {
        None | Some(Value::Null) => Attempt::Done(None),
        Some(result) => match serde_json::from_value::<T>(result.clone()) {
            Ok(data) => Attempt::Done(Some(data)),
            Err(e) => {
                warn!(resource = %resource, "malformed rpc result: {}", e);
                Attempt::Done(None)
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_display_hides_credentials() {
        let resource = Resource::rpc(
            "https://eth-mainnet.example.com/v2/secret-key",
            "eth_blockNumber",
            json!([]),
        );
        let rendered = resource.to_string();

        assert_eq!(rendered, "rpc eth_blockNumber @ eth-mainnet.example.com");
        assert!(!rendered.contains("secret-key"));
    }

    #[test]
    fn test_rpc_error_classification() {
        let resource = Resource::rpc("http://localhost", "eth_getLogs", json!([]));

        let limited = parse_rpc_payload::<Value>(
            &resource,
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32005,"message":"limit exceeded"}}"#,
        );
        assert!(matches!(
            limited,
            Attempt::Retry {
                rate_limited: true,
                ..
            }
        ));

        let internal = parse_rpc_payload::<Value>(
            &resource,
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32603,"message":"internal"}}"#,
        );
        assert!(matches!(
            internal,
            Attempt::Retry {
                rate_limited: false,
                ..
            }
        ));

        let rejected = parse_rpc_payload::<Value>(
            &resource,
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":3,"message":"execution reverted"}}"#,
        );
        assert!(matches!(rejected, Attempt::Done(None)));
    }

    #[test]
    fn test_malformed_payload_is_no_data() {
        let resource = Resource::http("http://localhost/rates");

        assert!(parse_payload::<Vec<u64>>(&resource, "").is_none());
        assert!(parse_payload::<Vec<u64>>(&resource, "{oops").is_none());
        assert!(parse_payload::<Vec<u64>>(&resource, r#"{"a":1}"#).is_none());
        assert_eq!(
            parse_payload::<Vec<u64>>(&resource, "[1,2]"),
            Some(vec![1, 2])
        );

        let empty = parse_rpc_payload::<String>(
            &resource,
            r#"{"jsonrpc":"2.0","id":1,"result":null}"#,
        );
        assert!(matches!(empty, Attempt::Done(None)));
    }
}
