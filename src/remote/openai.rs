//! OpenAI Assistants v2 REST transport.

use super::{AssistantTransport, RunStatus};
use crate::error::TransportError;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument};

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RunObject {
    status: String,
    #[serde(default)]
    last_error: Option<RunError>,
}

#[derive(Debug, Deserialize)]
struct RunError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    data: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    role: String,
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: Option<TextPart>,
}

#[derive(Debug, Deserialize)]
struct TextPart {
    value: String,
}

#[derive(Debug, Clone)]
pub struct OpenAiAssistants {
    client: reqwest::Client,
    base_url: String,
    assistant_id: String,
}

impl OpenAiAssistants {
    pub fn new(api_key: &str, assistant_id: &str, request_timeout: Duration) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| TransportError::Network(format!("invalid api key header: {e}")))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert("openai-beta", HeaderValue::from_static("assistants=v2"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: OPENAI_API_BASE.to_string(),
            assistant_id: assistant_id.to_string(),
        })
    }

    async fn read<R: DeserializeOwned>(resp: reqwest::Response) -> Result<R, TransportError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                code: status.as_u16(),
            });
        }
        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn post<R: DeserializeOwned>(&self, path: &str, body: serde_json::Value) -> Result<R, TransportError> {
        let resp = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(&body)
            .send()
            .await?;
        Self::read(resp).await
    }

    async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, TransportError> {
        let resp = self
            .client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await?;
        Self::read(resp).await
    }
}

fn run_status(run: RunObject) -> RunStatus {
    match run.status.as_str() {
        "completed" => RunStatus::Completed,
        "failed" | "cancelled" | "expired" | "incomplete" => {
            let detail = run
                .last_error
                .map(|e| format!("{}: {} {}", run.status, e.code, e.message).trim().to_string())
                .unwrap_or(run.status);
            RunStatus::Failed(detail)
        }
        _ => RunStatus::Pending,
    }
}

/// Text of the first assistant message in a newest-first listing.
fn first_assistant_text(list: MessageList) -> Option<String> {
    list.data
        .into_iter()
        .filter(|m| m.role == "assistant")
        .find_map(|m| m.content.into_iter().find_map(|c| c.text).map(|t| t.value))
}

impl AssistantTransport for OpenAiAssistants {
    #[instrument(level = "debug", skip_all)]
    async fn create_thread(&self) -> Result<String, TransportError> {
        let thread: Created = self.post("/threads", json!({})).await?;
        debug!(thread_id = %thread.id, "Thread created");
        Ok(thread.id)
    }

    #[instrument(level = "debug", skip_all, fields(%thread_id))]
    async fn add_message(&self, thread_id: &str, content: &str) -> Result<(), TransportError> {
        let _: Created = self
            .post(
                &format!("/threads/{thread_id}/messages"),
                json!({ "role": "user", "content": content }),
            )
            .await?;
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(%thread_id))]
    async fn start_run(&self, thread_id: &str) -> Result<String, TransportError> {
        let run: Created = self
            .post(
                &format!("/threads/{thread_id}/runs"),
                json!({ "assistant_id": self.assistant_id }),
            )
            .await?;
        Ok(run.id)
    }

    #[instrument(level = "debug", skip_all, fields(%thread_id, %run_id))]
    async fn run_status(&self, thread_id: &str, run_id: &str) -> Result<RunStatus, TransportError> {
        let run: RunObject = self.get(&format!("/threads/{thread_id}/runs/{run_id}")).await?;
        debug!(status = %run.status, "Run status");
        Ok(run_status(run))
    }

    #[instrument(level = "debug", skip_all, fields(%thread_id))]
    async fn first_response(&self, thread_id: &str) -> Result<Option<String>, TransportError> {
        let list: MessageList = self
            .get(&format!("/threads/{thread_id}/messages?order=desc&limit=20"))
            .await?;
        Ok(first_assistant_text(list))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(json: &str) -> RunStatus {
        run_status(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_run_status_mapping() {
        assert_eq!(run(r#"{"id":"run_1","status":"queued"}"#), RunStatus::Pending);
        assert_eq!(run(r#"{"id":"run_1","status":"in_progress"}"#), RunStatus::Pending);
        assert_eq!(run(r#"{"id":"run_1","status":"completed"}"#), RunStatus::Completed);
        assert_eq!(run(r#"{"status":"expired"}"#), RunStatus::Failed("expired".into()));
        assert_eq!(
            run(r#"{"status":"failed","last_error":{"code":"rate_limit_exceeded","message":"slow down"}}"#),
            RunStatus::Failed("failed: rate_limit_exceeded slow down".into())
        );
    }

    #[test]
    fn test_first_assistant_text_skips_user_messages() {
        let list: MessageList = serde_json::from_str(
            r#"{"object":"list","data":[
                {"id":"m3","role":"user","content":[{"type":"text","text":{"value":"follow-up","annotations":[]}}]},
                {"id":"m2","role":"assistant","content":[
                    {"type":"image_file","image_file":{"file_id":"f"}},
                    {"type":"text","text":{"value":"Acme makes anvils.","annotations":[]}}
                ]},
                {"id":"m1","role":"assistant","content":[{"type":"text","text":{"value":"older","annotations":[]}}]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(first_assistant_text(list).as_deref(), Some("Acme makes anvils."));
    }

    #[test]
    fn test_question_only_thread_has_no_response() {
        let list: MessageList = serde_json::from_str(
            r#"{"data":[{"role":"user","content":[{"type":"text","text":{"value":"q"}}]}]}"#,
        )
        .unwrap();
        assert_eq!(first_assistant_text(list), None);
        let empty: MessageList = serde_json::from_str(r#"{"data":[]}"#).unwrap();
        assert_eq!(first_assistant_text(empty), None);
    }

    #[test]
    fn test_bad_api_key_header_is_rejected() {
        assert!(OpenAiAssistants::new("bad\nkey", "asst_1", Duration::from_secs(5)).is_err());
    }
}
