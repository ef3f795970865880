//! moai: streaming completion client and output-action pipeline.
//!
//! Sends a conversation to one of several text-generation backends, streams
//! the reply through one normalized event model, transparently continues
//! replies the backend cut short, and runs the action blocks (file writes,
//! shell commands, workflows) embedded in the finished text.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use moai::prelude::*;
//!
//! # async fn example() -> moai::error::Result<()> {
//! let model: ModelRef = "anthropic:claude-sonnet-4-5".parse()?;
//! let session = SessionContext::new(model, MoaiConfig::from_env());
//! let turns = session.turns(&[], "Add a README", Vec::new());
//!
//! let pipeline = ChatPipeline::new(Arc::new(LocalWorkspace::new(".")))?;
//! let outcome = pipeline.run(&session, turns).await;
//! for result in &outcome.results {
//!     println!("{}: {}", result.block.label(), result.status);
//! }
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod aggregator;
pub mod config;
pub mod continuation;
pub mod error;
pub mod pipeline;
pub mod prelude;
pub mod provider;
pub mod session;
pub mod signal;
pub mod types;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
