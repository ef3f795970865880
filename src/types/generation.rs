//! Generation settings.

use bon::Builder;
use serde::{Deserialize, Serialize};

/// Sampling settings sent with every provider call.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, Default, PartialEq)]
pub struct GenerationSettings {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}
