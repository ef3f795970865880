//! Anthropic Messages API adapter.

use async_trait::async_trait;
use tracing::debug;

use crate::error::MoaiError;
use crate::types::*;

use super::http::{
    anthropic_headers, error_message, error_stream, framed_events, send_request, shared_client,
    ChunkDecoder, Framing, InFlight,
};
use super::{EventStream, ProviderAdapter, SendOptions};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicAdapter {
    model_id: String,
    api_key: String,
    base_url: String,
    in_flight: InFlight,
}

impl AnthropicAdapter {
    pub fn new(model_id: impl Into<String>, api_key: String, base_url: Option<String>) -> Self {
        Self {
            model_id: model_id.into(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            in_flight: InFlight::new(),
        }
    }

    fn build_request_body(
        &self,
        turns: &[ConversationTurn],
        settings: &GenerationSettings,
    ) -> serde_json::Value {
        let mut system_parts = Vec::new();
        let mut messages = Vec::new();

        for turn in turns {
            match turn.role {
                Role::System => system_parts.push(turn.text.clone()),
                Role::User => messages.push(serde_json::json!({
                    "role": "user",
                    "content": build_anthropic_content(turn),
                })),
                Role::Assistant => {
                    // The API rejects empty assistant content.
                    if !turn.text.is_empty() {
                        messages.push(serde_json::json!({
                            "role": "assistant",
                            "content": turn.text,
                        }));
                    }
                }
            }
        }

        let mut body = serde_json::json!({
            "model": self.model_id,
            "messages": messages,
            "max_tokens": settings.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": true,
        });

        if let Some(obj) = body.as_object_mut() {
            if !system_parts.is_empty() {
                obj.insert("system".into(), system_parts.join("\n").into());
            }
            if let Some(temp) = settings.temperature {
                obj.insert("temperature".into(), temp.into());
            }
        }

        body
    }
}

fn build_anthropic_content(turn: &ConversationTurn) -> serde_json::Value {
    if turn.attachments.is_empty() {
        return serde_json::Value::String(turn.text.clone());
    }

    let mut content: Vec<serde_json::Value> = turn
        .attachments
        .iter()
        .map(|img| {
            serde_json::json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": img.mime_type,
                    "data": img.data,
                }
            })
        })
        .collect();
    content.push(serde_json::json!({ "type": "text", "text": turn.text }));

    serde_json::json!(content)
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn provider_name(&self) -> &str {
        "anthropic"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn send(&self, turns: &[ConversationTurn], options: &SendOptions) -> EventStream {
        if let Err(reason) = validate_turns(turns) {
            return error_stream(&MoaiError::InvalidArgument(reason));
        }

        let body = self.build_request_body(turns, &options.settings);
        let url = format!("{}/messages", self.base_url);
        let token = self.in_flight.begin(&options.cancel);

        debug!(model = %self.model_id, "Anthropic send");

        let request = shared_client()
            .post(&url)
            .headers(anthropic_headers(&self.api_key, API_VERSION))
            .json(&body);

        match send_request(request, options.timeout, &token).await {
            Ok(resp) => framed_events(
                resp,
                Framing::ServerSentEvents,
                MessagesDecoder::default(),
                options.timeout,
                token,
            ),
            Err(e) => error_stream(&e),
        }
    }

    fn cancel(&self) {
        self.in_flight.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.in_flight.is_cancelled()
    }
}

/// Decodes Messages API stream frames.
///
/// The stop reason arrives in `message_delta`; the stream itself ends with
/// `message_stop`.
#[derive(Default)]
struct MessagesDecoder {
    stop_reason: Option<DoneReason>,
}

impl ChunkDecoder for MessagesDecoder {
    fn decode(&mut self, payload: &str) -> Result<Vec<StreamEvent>, MoaiError> {
        let event: serde_json::Value = serde_json::from_str(payload)?;
        let event_type = event.get("type").and_then(|t| t.as_str()).unwrap_or("");

        let events = match event_type {
            "content_block_delta" => {
                let delta = event.get("delta");
                let is_text = delta
                    .and_then(|d| d.get("type"))
                    .and_then(|t| t.as_str())
                    .is_some_and(|t| t == "text_delta");
                match delta.and_then(|d| d.get("text")).and_then(|t| t.as_str()) {
                    Some(text) if is_text && !text.is_empty() => vec![StreamEvent::delta(text)],
                    _ => Vec::new(),
                }
            }
            "message_delta" => {
                if let Some(stop) = event
                    .get("delta")
                    .and_then(|d| d.get("stop_reason"))
                    .and_then(|s| s.as_str())
                {
                    self.stop_reason =
                        Some(DoneReason::from_provider(stop).unwrap_or(DoneReason::Stop));
                }
                Vec::new()
            }
            "message_stop" => vec![StreamEvent::done(
                self.stop_reason.unwrap_or(DoneReason::Stop),
            )],
            "error" => {
                let detail = event
                    .get("error")
                    .map(error_message)
                    .unwrap_or_else(|| "provider reported an error".to_string());
                vec![StreamEvent::error(detail)]
            }
            "" => return Err(MoaiError::Parse(format!("frame without type: {payload}"))),
            _ => Vec::new(),
        };
        Ok(events)
    }
}
