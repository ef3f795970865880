//! Per-turn session context.
//!
//! Everything a request needs (model, credentials, agent templates,
//! generation settings, cancellation) travels in one [`SessionContext`]
//! value that is built fresh for each conversation turn.

use tokio_util::sync::CancellationToken;

use crate::config::{AgentSettings, MoaiConfig};
use crate::error::MoaiError;
use crate::provider::{ModelRef, SendOptions};
use crate::types::{ConversationTurn, GenerationSettings, ImageAttachment, Role};

/// Placeholder in user templates replaced by the user's message.
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// A named agent persona: optional system prompt, user-message template and
/// sampling temperature.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentProfile {
    pub name: String,
    pub system_template: Option<String>,
    pub user_template: Option<String>,
    pub temperature: Option<f64>,
}

impl AgentProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_template = Some(system.into());
        self
    }

    pub fn with_user_template(mut self, template: impl Into<String>) -> Self {
        self.user_template = Some(template.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn from_settings(name: &str, settings: &AgentSettings) -> Self {
        Self {
            name: name.to_string(),
            system_template: settings.system.clone(),
            user_template: settings.user.clone(),
            temperature: settings.temperature,
        }
    }

    /// Look up `[agents.<name>]` in the config's settings file.
    pub fn from_config(name: &str, config: &MoaiConfig) -> Result<Self, MoaiError> {
        config
            .settings()
            .agents
            .get(name)
            .map(|settings| Self::from_settings(name, settings))
            .ok_or_else(|| MoaiError::Configuration(format!("unknown agent '{name}'")))
    }

    /// Apply the user template to `input`. Templates without the placeholder
    /// get the input appended on a new line.
    pub fn render_user(&self, input: &str) -> String {
        match self.user_template.as_deref() {
            None => input.to_string(),
            Some(template) if template.contains(INPUT_PLACEHOLDER) => {
                template.replace(INPUT_PLACEHOLDER, input)
            }
            Some(template) => format!("{template}\n{input}"),
        }
    }
}

/// Inputs of one conversation turn.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub model: ModelRef,
    pub config: MoaiConfig,
    pub agent: AgentProfile,
    /// Explicit generation settings. An unset temperature falls back to the
    /// agent's, then to `[request] temperature`.
    pub settings: GenerationSettings,
    pub cancel: CancellationToken,
}

impl SessionContext {
    pub fn new(model: ModelRef, config: MoaiConfig) -> Self {
        let settings = GenerationSettings {
            temperature: None,
            max_tokens: config.settings().request.max_tokens,
        };
        Self {
            model,
            config,
            agent: AgentProfile::default(),
            settings,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_agent(mut self, agent: AgentProfile) -> Self {
        self.agent = agent;
        self
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Options for each provider call of this turn.
    pub fn send_options(&self) -> SendOptions {
        let mut settings = self.settings.clone();
        settings.temperature = settings
            .temperature
            .or(self.agent.temperature)
            .or(self.config.settings().request.temperature);
        SendOptions::builder()
            .settings(settings)
            .maybe_timeout(self.config.request_timeout())
            .cancel(self.cancel.clone())
            .build()
    }

    /// Assemble the turn list for a new user message.
    ///
    /// The agent's system prompt is prepended unless `history` already
    /// starts with a system turn.
    pub fn turns(
        &self,
        history: &[ConversationTurn],
        input: &str,
        attachments: Vec<ImageAttachment>,
    ) -> Vec<ConversationTurn> {
        let mut turns = Vec::with_capacity(history.len() + 2);
        let has_system = history.first().is_some_and(|t| t.role == Role::System);
        if let (false, Some(system)) = (has_system, self.agent.system_template.as_deref()) {
            turns.push(ConversationTurn::system(system));
        }
        turns.extend_from_slice(history);
        turns.push(
            ConversationTurn::user(self.agent.render_user(input)).with_attachments(attachments),
        );
        turns
    }
}
