//! Single-shot JSON adapter.
//!
//! Posts a non-streaming chat-completions request and normalizes the one
//! response body into a `delta` followed by `done`. Several common body
//! shapes are accepted so the adapter fronts simple completion proxies.

use async_trait::async_trait;
use futures::StreamExt;
use tracing::debug;

use crate::error::MoaiError;
use crate::types::*;

use super::http::{
    bearer_headers, error_message, error_stream, send_request, shared_client, InFlight,
};
use super::openai::{build_chat_body, finish_event};
use super::{EventStream, ProviderAdapter, SendOptions};

pub struct OneShotAdapter {
    model_id: String,
    api_key: String,
    url: String,
    in_flight: InFlight,
}

impl OneShotAdapter {
    /// `url` is the full endpoint the request body is posted to.
    pub fn new(model_id: impl Into<String>, api_key: String, url: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            api_key,
            url: url.into(),
            in_flight: InFlight::new(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for OneShotAdapter {
    fn provider_name(&self) -> &str {
        "oneshot"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn send(&self, turns: &[ConversationTurn], options: &SendOptions) -> EventStream {
        if let Err(reason) = validate_turns(turns) {
            return error_stream(&MoaiError::InvalidArgument(reason));
        }

        let body = build_chat_body(&self.model_id, turns, &options.settings, false);
        let token = self.in_flight.begin(&options.cancel);

        debug!(model = %self.model_id, url = %self.url, "single-shot send");

        let request = shared_client()
            .post(&self.url)
            .headers(bearer_headers(&self.api_key))
            .json(&body);

        let resp = match send_request(request, options.timeout, &token).await {
            Ok(resp) => resp,
            Err(e) => return error_stream(&e),
        };

        let read = async {
            let text = resp.text().await?;
            let value: serde_json::Value = serde_json::from_str(&text)?;
            Ok::<_, MoaiError>(normalize_body(&value))
        };

        let events = tokio::select! {
            _ = token.cancelled() => Vec::new(),
            result = read => result.unwrap_or_else(|e| vec![StreamEvent::error(e.to_string())]),
        };
        futures::stream::iter(events).boxed()
    }

    fn cancel(&self) {
        self.in_flight.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.in_flight.is_cancelled()
    }
}

/// Map a complete response body into canonical events.
pub(crate) fn normalize_body(value: &serde_json::Value) -> Vec<StreamEvent> {
    if let Some(err) = value.get("error") {
        return vec![StreamEvent::error(error_message(err))];
    }

    let Some((text, reason)) = extract_completion(value) else {
        return vec![StreamEvent::error("response body carried no completion text")];
    };

    let mut events = Vec::new();
    if !text.is_empty() {
        events.push(StreamEvent::delta(text));
    }
    events.push(match reason {
        Some(reason) if reason == "SAFETY" => {
            StreamEvent::error("response blocked by provider (SAFETY)")
        }
        Some(reason) => finish_event(reason),
        None => StreamEvent::done(DoneReason::Stop),
    });
    events
}

fn str_at<'a>(value: &'a serde_json::Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(|t| t.as_str())
}

fn extract_completion(value: &serde_json::Value) -> Option<(&str, Option<&str>)> {
    // chat completions
    if let Some(choice) = value.pointer("/choices/0") {
        let text = str_at(choice, "/message/content").or_else(|| str_at(choice, "/delta/content"));
        if let Some(text) = text {
            return Some((text, str_at(choice, "/finish_reason")));
        }
    }
    // Gemini
    if let Some(candidate) = value.pointer("/candidates/0") {
        if let Some(text) = str_at(candidate, "/content/parts/0/text") {
            return Some((text, str_at(candidate, "/finishReason")));
        }
    }
    // Anthropic messages
    if let Some(text) = str_at(value, "/content/0/text") {
        return Some((text, str_at(value, "/stop_reason")));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_completion_body_becomes_delta_and_done() {
        let events = normalize_body(&json!({
            "choices": [{"message": {"role": "assistant", "content": "Hello"}, "finish_reason": "length"}]
        }));
        assert_eq!(
            events,
            vec![
                StreamEvent::delta("Hello"),
                StreamEvent::done(DoneReason::Truncated)
            ]
        );
    }

    #[test]
    fn other_body_shapes_are_accepted() {
        let gemini = normalize_body(&json!({
            "candidates": [{"content": {"parts": [{"text": "g"}]}, "finishReason": "STOP"}]
        }));
        assert_eq!(gemini, vec![StreamEvent::delta("g"), StreamEvent::done(DoneReason::Stop)]);

        let anthropic = normalize_body(&json!({
            "content": [{"type": "text", "text": "a"}], "stop_reason": "max_tokens"
        }));
        assert_eq!(
            anthropic,
            vec![StreamEvent::delta("a"), StreamEvent::done(DoneReason::Truncated)]
        );
    }

    #[test]
    fn unusable_bodies_are_errors() {
        assert_eq!(
            normalize_body(&json!({"error": {"message": "bad key"}})),
            vec![StreamEvent::error("bad key")]
        );
        assert!(matches!(
            normalize_body(&json!({"ok": true})).as_slice(),
            [StreamEvent::Error { .. }]
        ));
    }
}
