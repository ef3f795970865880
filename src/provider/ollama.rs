//! Ollama `/api/chat` adapter (newline-delimited JSON).

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::MoaiError;
use crate::types::*;

use super::http::{
    error_stream, framed_events, send_request, shared_client, ChunkDecoder, Framing, InFlight,
};
use super::{EventStream, ProviderAdapter, SendOptions};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaAdapter {
    model_id: String,
    base_url: String,
    in_flight: InFlight,
}

impl OllamaAdapter {
    pub fn new(model_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            in_flight: InFlight::new(),
        }
    }

    fn build_request_body(
        &self,
        turns: &[ConversationTurn],
        settings: &GenerationSettings,
    ) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = turns
            .iter()
            .map(|turn| {
                let mut message = serde_json::json!({
                    "role": turn.role.as_str(),
                    "content": turn.text,
                });
                if !turn.attachments.is_empty() {
                    let images: Vec<&str> =
                        turn.attachments.iter().map(|img| img.data.as_str()).collect();
                    message["images"] = serde_json::json!(images);
                }
                message
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.model_id,
            "messages": messages,
            "stream": true,
        });

        let mut options = serde_json::Map::new();
        if let Some(temp) = settings.temperature {
            options.insert("temperature".into(), temp.into());
        }
        if let Some(max) = settings.max_tokens {
            options.insert("num_predict".into(), max.into());
        }
        if !options.is_empty() {
            body["options"] = serde_json::Value::Object(options);
        }

        body
    }
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn send(&self, turns: &[ConversationTurn], options: &SendOptions) -> EventStream {
        if let Err(reason) = validate_turns(turns) {
            return error_stream(&MoaiError::InvalidArgument(reason));
        }

        let body = self.build_request_body(turns, &options.settings);
        let url = format!("{}/api/chat", self.base_url);
        let token = self.in_flight.begin(&options.cancel);

        debug!(model = %self.model_id, base_url = %self.base_url, "Ollama send");

        let request = shared_client().post(&url).json(&body);

        match send_request(request, options.timeout, &token).await {
            Ok(resp) => framed_events(
                resp,
                Framing::JsonLines,
                ChatLineDecoder,
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

/// Decodes one `/api/chat` response line.
struct ChatLineDecoder;

impl ChunkDecoder for ChatLineDecoder {
    fn decode(&mut self, payload: &str) -> Result<Vec<StreamEvent>, MoaiError> {
        let line: ChatLine = serde_json::from_str(payload)?;
        if let Some(error) = line.error {
            return Ok(vec![StreamEvent::error(error)]);
        }

        let mut events = Vec::new();
        if let Some(text) = line.message.and_then(|m| m.content).filter(|t| !t.is_empty()) {
            events.push(StreamEvent::delta(text));
        }
        if line.done {
            let reason = line
                .done_reason
                .as_deref()
                .and_then(DoneReason::from_provider)
                .unwrap_or(DoneReason::Stop);
            events.push(StreamEvent::done(reason));
        }
        Ok(events)
    }
}

#[derive(Deserialize)]
struct ChatLine {
    message: Option<ChatLineMessage>,
    #[serde(default)]
    done: bool,
    done_reason: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ChatLineMessage {
    content: Option<String>,
}
