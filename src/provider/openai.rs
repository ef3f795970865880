//! OpenAI Chat Completions adapter (also used for OpenAI-compatible endpoints).

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::MoaiError;
use crate::types::*;

use super::http::{
    bearer_headers, error_message, error_stream, framed_events, send_request, shared_client,
    ChunkDecoder, Framing, InFlight,
};
use super::{EventStream, ProviderAdapter, SendOptions};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiAdapter {
    model_id: String,
    api_key: String,
    base_url: String,
    provider_name: String,
    in_flight: InFlight,
}

impl OpenAiAdapter {
    pub fn new(model_id: impl Into<String>, api_key: String, base_url: Option<String>) -> Self {
        Self {
            model_id: model_id.into(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            provider_name: "openai".to_string(),
            in_flight: InFlight::new(),
        }
    }

    /// Report a different provider name (for OpenAI-compatible hosts).
    pub fn with_provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = name.into();
        self
    }

    pub(crate) fn build_request_body(
        &self,
        turns: &[ConversationTurn],
        settings: &GenerationSettings,
        stream: bool,
    ) -> serde_json::Value {
        build_chat_body(&self.model_id, turns, settings, stream)
    }
}

/// Chat-completions request body shared with the single-shot adapter.
pub(crate) fn build_chat_body(
    model_id: &str,
    turns: &[ConversationTurn],
    settings: &GenerationSettings,
    stream: bool,
) -> serde_json::Value {
    let messages = turns.iter().map(turn_to_openai).collect::<Vec<_>>();

    let mut body = serde_json::json!({
        "model": model_id,
        "messages": messages,
        "stream": stream,
    });

    if let Some(obj) = body.as_object_mut() {
        if let Some(max) = settings.max_tokens {
            obj.insert("max_tokens".into(), max.into());
        }
        if let Some(temp) = settings.temperature {
            obj.insert("temperature".into(), temp.into());
        }
    }

    body
}

fn turn_to_openai(turn: &ConversationTurn) -> serde_json::Value {
    let role = turn.role.as_str();

    if turn.attachments.is_empty() {
        return serde_json::json!({ "role": role, "content": turn.text });
    }

    let mut parts = vec![serde_json::json!({ "type": "text", "text": turn.text })];
    parts.extend(turn.attachments.iter().map(|img| {
        serde_json::json!({
            "type": "image_url",
            "image_url": { "url": img.data_url() }
        })
    }));

    serde_json::json!({ "role": role, "content": parts })
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn provider_name(&self) -> &str {
        &self.provider_name
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn send(&self, turns: &[ConversationTurn], options: &SendOptions) -> EventStream {
        if let Err(reason) = validate_turns(turns) {
            return error_stream(&MoaiError::InvalidArgument(reason));
        }

        let body = self.build_request_body(turns, &options.settings, true);
        let url = format!("{}/chat/completions", self.base_url);
        let token = self.in_flight.begin(&options.cancel);

        debug!(provider = %self.provider_name, model = %self.model_id, "chat completions send");

        let request = shared_client()
            .post(&url)
            .headers(bearer_headers(&self.api_key))
            .json(&body);

        match send_request(request, options.timeout, &token).await {
            Ok(resp) => framed_events(
                resp,
                Framing::ServerSentEvents,
                ChatChunkDecoder,
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

/// Decodes `chat.completion.chunk` payloads.
pub(crate) struct ChatChunkDecoder;

impl ChunkDecoder for ChatChunkDecoder {
    fn decode(&mut self, payload: &str) -> Result<Vec<StreamEvent>, MoaiError> {
        let value: serde_json::Value = serde_json::from_str(payload)?;
        if let Some(err) = value.get("error") {
            return Ok(vec![StreamEvent::error(error_message(err))]);
        }

        let chunk: ChatStreamChunk = serde_json::from_value(value)?;
        let mut events = Vec::new();
        let Some(choice) = chunk.choices.into_iter().next() else {
            // Usage-only trailer chunks carry no choices.
            return Ok(events);
        };

        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            events.push(StreamEvent::delta(text));
        }
        if let Some(reason) = choice.finish_reason.as_deref() {
            events.push(finish_event(reason));
        }
        Ok(events)
    }
}

pub(crate) fn finish_event(reason: &str) -> StreamEvent {
    match DoneReason::from_provider(reason) {
        Some(done) => StreamEvent::done(done),
        None if reason == "content_filter" => {
            StreamEvent::error("response blocked by provider content filter")
        }
        None => StreamEvent::done(DoneReason::Stop),
    }
}

#[derive(Deserialize)]
struct ChatStreamChunk {
    #[serde(default)]
    choices: Vec<ChatStreamChoice>,
}

#[derive(Deserialize)]
struct ChatStreamChoice {
    #[serde(default)]
    delta: ChatStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChatStreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> OpenAiAdapter {
        OpenAiAdapter::new("gpt-4o", "test-key".to_string(), None)
    }

    #[test]
    fn request_body_carries_settings_and_stream_flag() {
        let settings = GenerationSettings::builder()
            .temperature(0.3)
            .max_tokens(512)
            .build();
        let body = adapter().build_request_body(
            &[ConversationTurn::system("be brief"), ConversationTurn::user("hi")],
            &settings,
            true,
        );
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["stream"], true);
        assert_eq!(body["temperature"], 0.3);
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
    }

    #[test]
    fn attachments_become_image_url_parts() {
        let turn = ConversationTurn::user("what is this")
            .with_attachments(vec![ImageAttachment::from_bytes(b"x", "image/png")]);
        let body = adapter().build_request_body(&[turn], &GenerationSettings::default(), true);
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(content[1]["image_url"]["url"], "data:image/png;base64,eA==");
    }

    #[test]
    fn decoder_maps_deltas_and_finish_reasons() {
        let mut decoder = ChatChunkDecoder;
        let events = decoder
            .decode(r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#)
            .unwrap();
        assert_eq!(events, vec![StreamEvent::delta("Hel")]);

        let events = decoder
            .decode(r#"{"choices":[{"delta":{},"finish_reason":"length"}]}"#)
            .unwrap();
        assert_eq!(events, vec![StreamEvent::done(DoneReason::Truncated)]);

        let events = decoder.decode(r#"{"choices":[],"usage":{"total_tokens":3}}"#).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn decoder_surfaces_error_frames_and_rejects_garbage() {
        let mut decoder = ChatChunkDecoder;
        let events = decoder.decode(r#"{"error":{"message":"overloaded"}}"#).unwrap();
        assert_eq!(events, vec![StreamEvent::error("overloaded")]);
        assert!(decoder.decode("{not json").is_err());
    }
}
