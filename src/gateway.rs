//! HTTP client for the external OpenClaw orchestration gateway.
//!
//! The gateway hosts agent execution sessions. Mission Control only ever
//! needs two calls: make sure a session exists, and push a message into one.
//! All failures collapse into a single [`GatewayError`] kind; callers decide
//! whether to swallow it (best-effort provisioning) or surface it as a 502
//! (user-initiated paths).

use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;

/// Connection settings for one gateway endpoint.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub url: String,
    pub token: Option<String>,
}

/// Uniform error for any failed gateway communication.
#[derive(Debug, Error)]
#[error("gateway call failed: {0}")]
pub struct GatewayError(pub String);

/// Session operations exposed by a gateway.
///
/// A trait seam so provisioning logic can run against a recording fake in
/// tests; the production implementation is [`GatewayClient`].
pub trait GatewayTransport: Send + Sync {
    /// Ensure an execution session exists for `session_key`.
    fn ensure_session(&self, session_key: &str, label: &str) -> Result<(), GatewayError>;

    /// Send a message into a session. `deliver: false` queues the text as
    /// context without waking the session.
    fn send_message(&self, text: &str, session_key: &str, deliver: bool)
    -> Result<(), GatewayError>;
}

/// Production gateway client over HTTP with bounded timeouts and no retries.
pub struct GatewayClient {
    agent: ureq::Agent,
    config: GatewayConfig,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout(timeout)
            .build();
        Self { agent, config }
    }

    fn invoke(&self, tool: &str, args: Value) -> Result<Value, GatewayError> {
        let endpoint = format!("{}/tools/invoke", self.config.url.trim_end_matches('/'));
        let mut request = self.agent.post(&endpoint);
        if let Some(token) = &self.config.token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }

        let response = request
            .send_json(json!({ "tool": tool, "args": args }))
            .map_err(|e| match e {
                ureq::Error::Status(code, resp) => {
                    let body = resp.into_string().unwrap_or_default();
                    GatewayError(format!("{tool}: HTTP {code}: {body}"))
                }
                ureq::Error::Transport(transport) => GatewayError(format!("{tool}: {transport}")),
            })?;

        response
            .into_json()
            .map_err(|e| GatewayError(format!("{tool}: invalid response body: {e}")))
    }
}

impl GatewayTransport for GatewayClient {
    fn ensure_session(&self, session_key: &str, label: &str) -> Result<(), GatewayError> {
        self.invoke(
            "sessions_ensure",
            json!({ "sessionKey": session_key, "label": label }),
        )?;
        Ok(())
    }

    fn send_message(
        &self,
        text: &str,
        session_key: &str,
        deliver: bool,
    ) -> Result<(), GatewayError> {
        self.invoke(
            "sessions_send",
            json!({ "sessionKey": session_key, "message": text, "deliver": deliver }),
        )?;
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    //! Recording and failing gateway fakes for provisioning tests.

    use super::*;
    use std::sync::Mutex;

    /// Records every call and always succeeds.
    #[derive(Default)]
    pub struct RecordingGateway {
        pub calls: Mutex<Vec<String>>,
    }

    impl GatewayTransport for RecordingGateway {
        fn ensure_session(&self, session_key: &str, label: &str) -> Result<(), GatewayError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("ensure_session:{session_key}:{label}"));
            Ok(())
        }

        fn send_message(
            &self,
            _text: &str,
            session_key: &str,
            deliver: bool,
        ) -> Result<(), GatewayError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("send_message:{session_key}:{deliver}"));
            Ok(())
        }
    }

    /// Fails every call with a transport-style error.
    pub struct FailingGateway;

    impl GatewayTransport for FailingGateway {
        fn ensure_session(&self, _session_key: &str, _label: &str) -> Result<(), GatewayError> {
            Err(GatewayError("connection refused".to_string()))
        }

        fn send_message(
            &self,
            _text: &str,
            _session_key: &str,
            _deliver: bool,
        ) -> Result<(), GatewayError> {
            Err(GatewayError("connection refused".to_string()))
        }
    }
}
