//! Google Gemini adapter.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::MoaiError;
use crate::types::*;

use super::http::{
    error_message, error_stream, framed_events, send_request, shared_client, ChunkDecoder,
    Framing, InFlight,
};
use super::{EventStream, ProviderAdapter, SendOptions};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Finish reasons that mean the answer was withheld, not completed.
const BLOCKED_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
];

pub struct GoogleAdapter {
    model_id: String,
    api_key: String,
    base_url: String,
    in_flight: InFlight,
}

impl GoogleAdapter {
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
        let mut contents = Vec::new();

        for turn in turns {
            match turn.role {
                Role::System => system_parts.push(serde_json::json!({ "text": turn.text })),
                Role::User => contents.push(serde_json::json!({
                    "role": "user",
                    "parts": build_gemini_parts(turn),
                })),
                Role::Assistant => contents.push(serde_json::json!({
                    "role": "model",
                    "parts": [{ "text": turn.text }],
                })),
            }
        }

        let mut body = serde_json::json!({ "contents": contents });

        if let Some(obj) = body.as_object_mut() {
            if !system_parts.is_empty() {
                obj.insert(
                    "systemInstruction".into(),
                    serde_json::json!({ "parts": system_parts }),
                );
            }

            let mut gen_config = serde_json::Map::new();
            if let Some(max) = settings.max_tokens {
                gen_config.insert("maxOutputTokens".into(), max.into());
            }
            if let Some(temp) = settings.temperature {
                gen_config.insert("temperature".into(), temp.into());
            }
            if !gen_config.is_empty() {
                obj.insert("generationConfig".into(), serde_json::Value::Object(gen_config));
            }
        }

        body
    }
}

fn build_gemini_parts(turn: &ConversationTurn) -> Vec<serde_json::Value> {
    let mut parts = vec![serde_json::json!({ "text": turn.text })];
    parts.extend(turn.attachments.iter().map(|img| {
        serde_json::json!({
            "inlineData": {
                "mimeType": img.mime_type,
                "data": img.data,
            }
        })
    }));
    parts
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn provider_name(&self) -> &str {
        "google"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn send(&self, turns: &[ConversationTurn], options: &SendOptions) -> EventStream {
        if let Err(reason) = validate_turns(turns) {
            return error_stream(&MoaiError::InvalidArgument(reason));
        }

        let body = self.build_request_body(turns, &options.settings);
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model_id
        );
        let token = self.in_flight.begin(&options.cancel);

        debug!(model = %self.model_id, "Google send");

        let request = shared_client()
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body);

        match send_request(request, options.timeout, &token).await {
            Ok(resp) => framed_events(
                resp,
                Framing::ServerSentEvents,
                GeminiDecoder,
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

/// Decodes `GenerateContentResponse` frames.
pub(crate) struct GeminiDecoder;

impl ChunkDecoder for GeminiDecoder {
    fn decode(&mut self, payload: &str) -> Result<Vec<StreamEvent>, MoaiError> {
        let value: serde_json::Value = serde_json::from_str(payload)?;
        if let Some(err) = value.get("error") {
            return Ok(vec![StreamEvent::error(error_message(err))]);
        }
        let response: GeminiResponse = serde_json::from_value(value)?;
        Ok(response_events(response))
    }
}

fn response_events(response: GeminiResponse) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    let Some(candidate) = response.candidates.into_iter().next() else {
        return events;
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if !text.is_empty() {
        events.push(StreamEvent::delta(text));
    }

    if let Some(reason) = candidate.finish_reason.as_deref() {
        if BLOCKED_REASONS.contains(&reason) {
            events.push(StreamEvent::error(format!(
                "response blocked by provider ({reason})"
            )));
        } else {
            events.push(StreamEvent::done(
                DoneReason::from_provider(reason).unwrap_or(DoneReason::Stop),
            ));
        }
    }
    events
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}
