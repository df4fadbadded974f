//! `http_request`: call an external HTTP endpoint.
//!
//! The response body is read up to a configured cap, string fields of a
//! JSON object response are exposed as `http_`-prefixed variables, and a
//! status of 400 or above fails the step while keeping the captured output
//! for the log.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};

use crate::config::HttpSettings;
use crate::dsl::ParamValue;
use crate::engine::ExecutionContext;
use crate::error::ActionError;

use super::{Action, ActionOutput, ResolvedStep};

pub struct HttpRequestAction {
    client: Client,
    max_response_bytes: usize,
}

impl HttpRequestAction {
    pub fn new(settings: &HttpSettings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            max_response_bytes: settings.max_response_bytes,
        })
    }

    async fn read_capped(&self, response: &mut reqwest::Response) -> Result<Vec<u8>, ActionError> {
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ActionError::new(format!("http_request: failed to read response: {e}")))?
        {
            let remaining = self.max_response_bytes - body.len();
            if remaining == 0 {
                break;
            }
            let take = remaining.min(chunk.len());
            body.extend_from_slice(&chunk[..take]);
            if take < chunk.len() {
                break;
            }
        }
        Ok(body)
    }
}

#[async_trait]
impl Action for HttpRequestAction {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        step: &ResolvedStep,
    ) -> Result<ActionOutput, ActionError> {
        let url = step.require_str("url")?;
        let method_name = step
            .params
            .str_of("method")
            .filter(|m| !m.is_empty())
            .unwrap_or("GET")
            .to_uppercase();
        let method = Method::from_bytes(method_name.as_bytes())
            .map_err(|_| ActionError::new(format!("http_request: invalid method {method_name}")))?;

        let mut request = self.client.request(method, url);

        let mut has_content_type = false;
        if let Some(headers) = step.params.object_of("headers") {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    has_content_type |= name.eq_ignore_ascii_case("content-type");
                    request = request.header(name.as_str(), value);
                }
            }
        }

        if let Some(body) = step.params.get("body").filter(|b| !b.is_null()) {
            let encoded = serde_json::to_string(body)
                .map_err(|e| ActionError::new(format!("http_request: failed to encode body: {e}")))?;
            request = request.body(encoded);
        }
        if method_name != "GET" && !has_content_type {
            request = request.header(CONTENT_TYPE, "application/json");
        }

        let mut response = request
            .send()
            .await
            .map_err(|e| ActionError::new(format!("http_request: {e}")))?;
        let status = response.status().as_u16();

        let body_bytes = self.read_capped(&mut response).await?;
        let body_text = String::from_utf8_lossy(&body_bytes).into_owned();

        let mut output = ActionOutput::new();
        output.insert("status_code".to_string(), ParamValue::from(i64::from(status)));
        output.insert("body".to_string(), ParamValue::from(body_text.clone()));

        // A JSON object response surfaces its string fields as variables
        // under an http_ prefix.
        if let Ok(ParamValue::Object(fields)) = serde_json::from_str::<ParamValue>(&body_text) {
            for (key, value) in &fields {
                if let Some(s) = value.as_str() {
                    output.insert(format!("http_{key}"), ParamValue::from(s));
                }
            }
            output.insert("json".to_string(), ParamValue::Object(fields));
        }

        tracing::info!(
            execution_id = %ctx.execution_id,
            method = %method_name,
            url,
            status,
            "http request"
        );

        if status >= 400 {
            return Err(ActionError::with_output(
                format!("http_request: server returned {status}"),
                output,
            ));
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VarMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn context() -> ExecutionContext {
        ExecutionContext {
            execution_id: "e1".to_string(),
            merchant_id: 1,
            scenario_id: "s1".to_string(),
            variables: VarMap::new(),
            trigger_payload: ParamValue::object(),
        }
    }

    fn resolved(params_json: &str) -> ResolvedStep {
        ResolvedStep {
            id: "h".to_string(),
            kind: "http_request".to_string(),
            params: serde_json::from_str(params_json).unwrap(),
        }
    }

    /// One-shot HTTP server answering every request with a fixed response.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "{status_line}\r\ncontent-length: {}\r\ncontent-type: application/json\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn url_is_required() {
        let action = HttpRequestAction::new(&HttpSettings::default()).unwrap();
        let err = action.execute(&context(), &resolved("{}")).await.unwrap_err();
        assert_eq!(err.message, "http_request: url is required");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn json_response_fields_are_prefixed() {
        let url = serve_once("HTTP/1.1 200 OK", r#"{"token": "abc", "count": 2}"#).await;
        let action = HttpRequestAction::new(&HttpSettings::default()).unwrap();

        let output = action
            .execute(&context(), &resolved(&format!(r#"{{"url": "{url}"}}"#)))
            .await
            .unwrap();

        assert_eq!(output["status_code"].as_i64(), Some(200));
        assert_eq!(output["http_token"].as_str(), Some("abc"));
        // Non-string JSON fields are not prefixed into variables.
        assert!(!output.contains_key("http_count"));
        assert!(output.contains_key("json"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_error_fails_with_captured_output() {
        let url = serve_once("HTTP/1.1 500 Internal Server Error", r#"{"error": "boom"}"#).await;
        let action = HttpRequestAction::new(&HttpSettings::default()).unwrap();

        let err = action
            .execute(&context(), &resolved(&format!(r#"{{"url": "{url}"}}"#)))
            .await
            .unwrap_err();

        assert_eq!(err.message, "http_request: server returned 500");
        let output = err.output.expect("output captured on failure");
        assert_eq!(output["status_code"].as_i64(), Some(500));
        assert_eq!(output["http_error"].as_str(), Some("boom"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn response_body_is_capped() {
        let url = serve_once("HTTP/1.1 200 OK", "0123456789abcdef").await;
        let settings = HttpSettings {
            timeout_secs: 5,
            max_response_bytes: 8,
        };
        let action = HttpRequestAction::new(&settings).unwrap();

        let output = action
            .execute(&context(), &resolved(&format!(r#"{{"url": "{url}"}}"#)))
            .await
            .unwrap();

        assert_eq!(output["body"].as_str(), Some("01234567"));
    }
}
