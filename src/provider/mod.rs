//! Provider adapter trait and implementations.
//!
//! Every backend family lives behind [`ProviderAdapter`]: it turns canonical
//! [`ConversationTurn`]s into one wire request and normalizes the response
//! into [`StreamEvent`]s. Adding a backend means adding one adapter module
//! and one [`ProviderKind`] variant.

pub mod http;

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "anthropic")]
pub mod anthropic;

#[cfg(feature = "google")]
pub mod google;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "oneshot")]
pub mod oneshot;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use futures::stream::BoxStream;
use strum::{Display, EnumString};
use tokio_util::sync::CancellationToken;

use crate::config::MoaiConfig;
use crate::error::MoaiError;
use crate::types::{ConversationTurn, GenerationSettings, StreamEvent};

/// Canonical event stream returned by adapters.
pub type EventStream = BoxStream<'static, StreamEvent>;

/// Per-call options.
#[derive(Debug, Clone, Default, Builder)]
pub struct SendOptions {
    #[builder(default)]
    pub settings: GenerationSettings,
    /// Limit for waiting on response headers and on each gap between chunks.
    pub timeout: Option<Duration>,
    /// Parent token; adapters derive a child per call.
    #[builder(default)]
    pub cancel: CancellationToken,
}

/// Core trait implemented by every backend family.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider name (e.g., "openai", "google").
    fn provider_name(&self) -> &str;

    /// The model ID this adapter serves.
    fn model_id(&self) -> &str;

    /// Issue one provider call and stream its normalized events.
    ///
    /// Never fails directly: invalid input, transport failures and non-2xx
    /// responses arrive as a terminal [`StreamEvent::Error`].
    async fn send(&self, turns: &[ConversationTurn], options: &SendOptions) -> EventStream;

    /// Abort the call currently in flight.
    ///
    /// The aborted stream ends without a terminal event.
    fn cancel(&self);

    /// Whether the most recent call was aborted through [`Self::cancel`].
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Supported backend families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum ProviderKind {
    #[strum(serialize = "openai")]
    OpenAi,
    #[strum(serialize = "openai-compatible")]
    OpenAiCompatible,
    #[strum(serialize = "anthropic")]
    Anthropic,
    #[strum(serialize = "google", serialize = "gemini")]
    Google,
    #[strum(serialize = "ollama")]
    Ollama,
    #[strum(serialize = "oneshot")]
    OneShot,
}

/// A `provider:model` reference, e.g. `anthropic:claude-sonnet-4-5`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelRef {
    pub provider: ProviderKind,
    pub model_id: String,
}

impl ModelRef {
    pub fn new(provider: ProviderKind, model_id: impl Into<String>) -> Self {
        Self {
            provider,
            model_id: model_id.into(),
        }
    }
}

impl FromStr for ModelRef {
    type Err = MoaiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, model_id) = s.split_once(':').ok_or_else(|| {
            MoaiError::InvalidArgument(format!(
                "model reference '{s}' must look like provider:model"
            ))
        })?;
        let provider = provider
            .parse::<ProviderKind>()
            .map_err(|_| MoaiError::ProviderNotFound(provider.to_string()))?;
        if model_id.is_empty() {
            return Err(MoaiError::InvalidArgument(format!(
                "model reference '{s}' has an empty model id"
            )));
        }
        Ok(Self::new(provider, model_id))
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model_id)
    }
}

/// Create an adapter for the given model, using the provided config.
#[allow(unused_variables)]
pub fn create_adapter(
    model: &ModelRef,
    config: &MoaiConfig,
) -> Result<Arc<dyn ProviderAdapter>, MoaiError> {
    let model_id = model.model_id.clone();
    match model.provider {
        #[cfg(feature = "openai")]
        ProviderKind::OpenAi => {
            let api_key = config
                .get_api_key("openai")
                .ok_or_else(|| MoaiError::Authentication("Missing OPENAI_API_KEY".into()))?;
            Ok(Arc::new(openai::OpenAiAdapter::new(
                model_id,
                api_key,
                config.get_base_url("openai"),
            )))
        }
        #[cfg(feature = "openai")]
        ProviderKind::OpenAiCompatible => {
            let api_key = config
                .get_api_key("openai-compatible")
                .unwrap_or_default();
            let base_url = config
                .get_base_url("openai-compatible")
                .ok_or_else(|| {
                    MoaiError::Configuration("Missing OPENAI_COMPAT_BASE_URL".into())
                })?;
            Ok(Arc::new(
                openai::OpenAiAdapter::new(model_id, api_key, Some(base_url))
                    .with_provider_name("openai-compatible"),
            ))
        }
        #[cfg(feature = "anthropic")]
        ProviderKind::Anthropic => {
            let api_key = config
                .get_api_key("anthropic")
                .ok_or_else(|| MoaiError::Authentication("Missing ANTHROPIC_API_KEY".into()))?;
            Ok(Arc::new(anthropic::AnthropicAdapter::new(
                model_id,
                api_key,
                config.get_base_url("anthropic"),
            )))
        }
        #[cfg(feature = "google")]
        ProviderKind::Google => {
            let api_key = config
                .get_api_key("google")
                .ok_or_else(|| MoaiError::Authentication("Missing GOOGLE_API_KEY".into()))?;
            Ok(Arc::new(google::GoogleAdapter::new(
                model_id,
                api_key,
                config.get_base_url("google"),
            )))
        }
        #[cfg(feature = "ollama")]
        ProviderKind::Ollama => {
            let base_url = config
                .get_base_url("ollama")
                .unwrap_or_else(|| ollama::DEFAULT_BASE_URL.to_string());
            Ok(Arc::new(ollama::OllamaAdapter::new(model_id, base_url)))
        }
        #[cfg(feature = "oneshot")]
        ProviderKind::OneShot => {
            let base_url = config
                .get_base_url("oneshot")
                .ok_or_else(|| MoaiError::Configuration("Missing ONESHOT_BASE_URL".into()))?;
            Ok(Arc::new(oneshot::OneShotAdapter::new(
                model_id,
                config.get_api_key("oneshot").unwrap_or_default(),
                base_url,
            )))
        }
        #[allow(unreachable_patterns)]
        _ => Err(MoaiError::ProviderNotFound(format!(
            "Provider for model '{model}' not enabled via feature flags"
        ))),
    }
}
