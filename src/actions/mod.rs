//! Output actions: scanning finalized text for action blocks and running them.
//!
//! - [`parser`]: [`OutputTagParser`] with one [`TagStrategy`] per block kind
//! - [`dispatcher`]: [`ActionDispatcher`] and the [`ActionHandler`] trait
//! - [`handlers`]: built-in `file` and `bash` handlers
//! - [`workflow`]: the declarative `workflow` handler
//! - [`workspace`]: the filesystem/process collaborator

pub mod dispatcher;
pub mod handlers;
pub mod parser;
pub mod workflow;
pub mod workspace;

pub use dispatcher::{
    ActionContext, ActionDispatcher, ActionHandler, ActionOutcome, ActionResult, ActionStatus,
    StepResult,
};
pub use handlers::{BashHandler, FileHandler};
pub use parser::{ActionBlock, ActionKind, ActionPayload, DelimitedTag, OutputTagParser, TagStrategy};
pub use workflow::{WorkflowComposer, WorkflowProgram, WorkflowStep};
pub use workspace::{CommandOutput, LocalWorkspace, Workspace};
