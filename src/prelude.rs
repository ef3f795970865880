//! Convenience re-exports for common use.

pub use crate::actions::{
    ActionBlock, ActionDispatcher, ActionKind, ActionPayload, ActionResult, ActionStatus,
    LocalWorkspace, OutputTagParser, Workspace,
};
pub use crate::aggregator::{ChunkAggregator, Flush, FlushPolicy, Transcript, TranscriptStatus};
pub use crate::config::MoaiConfig;
pub use crate::continuation::{ContinuationController, ContinuationPolicy};
pub use crate::error::{MoaiError, Result};
pub use crate::pipeline::{ChatPipeline, RequestState, TurnOutcome};
pub use crate::provider::{ModelRef, ProviderAdapter, ProviderKind, SendOptions};
pub use crate::session::{AgentProfile, SessionContext};
pub use crate::signal::{SignalStore, STREAM_COMPLETE};
pub use crate::types::{
    ConversationTurn, DoneReason, GenerationSettings, ImageAttachment, Role, StreamEvent,
};
