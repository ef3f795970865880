//! Action block scanning.
//!
//! Blocks are delimited by `<mo-ai-KIND ...>` / `</mo-ai-KIND>` pairs. Each
//! kind has its own [`TagStrategy`]; [`OutputTagParser`] runs every strategy
//! over the text and merges the results in transcript order.

use std::ops::Range;

use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::MoaiError;

/// Block kinds understood by the built-in strategies and handlers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ActionKind {
    File,
    Bash,
    Workflow,
}

impl ActionKind {
    pub const ALL: [ActionKind; 3] = [ActionKind::File, ActionKind::Bash, ActionKind::Workflow];

    /// Element name used in generated text.
    pub fn tag_name(self) -> &'static str {
        match self {
            ActionKind::File => "mo-ai-file",
            ActionKind::Bash => "mo-ai-bash",
            ActionKind::Workflow => "mo-ai-workflow",
        }
    }
}

/// What a block asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ActionPayload {
    File { path: String, content: String },
    Bash { command: String },
    Workflow { program: String },
}

impl ActionPayload {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionPayload::File { .. } => ActionKind::File,
            ActionPayload::Bash { .. } => ActionKind::Bash,
            ActionPayload::Workflow { .. } => ActionKind::Workflow,
        }
    }

    pub fn file(path: impl Into<String>, content: impl Into<String>) -> Self {
        ActionPayload::File {
            path: path.into(),
            content: content.into(),
        }
    }

    pub fn bash(command: impl Into<String>) -> Self {
        ActionPayload::Bash {
            command: command.into(),
        }
    }

    pub fn workflow(program: impl Into<String>) -> Self {
        ActionPayload::Workflow {
            program: program.into(),
        }
    }
}

/// One recognized block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionBlock {
    pub payload: ActionPayload,
    /// Byte range of the whole block, delimiters included, in the scanned text.
    pub span: Range<usize>,
}

impl ActionBlock {
    pub fn new(payload: ActionPayload, span: Range<usize>) -> Self {
        Self { payload, span }
    }

    pub fn kind(&self) -> ActionKind {
        self.payload.kind()
    }

    /// The block's source text within `text`.
    pub fn raw<'a>(&self, text: &'a str) -> &'a str {
        text.get(self.span.clone()).unwrap_or_default()
    }

    /// Short human-readable label (`file src/main.rs`, `bash cargo test`).
    pub fn label(&self) -> String {
        match &self.payload {
            ActionPayload::File { path, .. } => format!("file {path}"),
            ActionPayload::Bash { command } => {
                let first = command.trim().lines().next().unwrap_or_default();
                format!("bash {first}")
            }
            ActionPayload::Workflow { .. } => "workflow".to_string(),
        }
    }
}

/// Scanning and rendering rules for one block kind.
pub trait TagStrategy: Send + Sync {
    fn kind(&self) -> ActionKind;

    /// All well-formed blocks of this kind, in order.
    fn scan(&self, text: &str) -> Vec<ActionBlock>;

    /// Source text for `payload`, or `None` when it is not of this kind.
    fn render(&self, payload: &ActionPayload) -> Option<String>;
}

/// Strategy for `<tag attr="…">body</tag>` blocks.
pub struct DelimitedTag {
    kind: ActionKind,
    open: Regex,
    close: String,
}

impl DelimitedTag {
    pub fn new(kind: ActionKind) -> Result<Self, regex::Error> {
        let tag = regex::escape(kind.tag_name());
        let open = Regex::new(&format!(
            r#"<{tag}((?:\s+[A-Za-z_][\w-]*\s*=\s*"[^"]*")*)\s*>"#
        ))?;
        Ok(Self {
            kind,
            open,
            close: format!("</{}>", kind.tag_name()),
        })
    }

    fn payload(&self, attrs: &str, body: &str) -> Option<ActionPayload> {
        match self.kind {
            ActionKind::File => {
                let path = attribute(attrs, "path")?;
                if path.trim().is_empty() {
                    return None;
                }
                Some(ActionPayload::file(path, body))
            }
            ActionKind::Bash => Some(ActionPayload::bash(body)),
            ActionKind::Workflow => Some(ActionPayload::workflow(body)),
        }
    }
}

impl TagStrategy for DelimitedTag {
    fn kind(&self) -> ActionKind {
        self.kind
    }

    fn scan(&self, text: &str) -> Vec<ActionBlock> {
        let mut blocks = Vec::new();
        let mut pos = 0;

        while let Some(caps) = self.open.captures_at(text, pos) {
            let Some(open) = caps.get(0) else { break };
            let body_start = open.end();
            let Some(close_rel) = text[body_start..].find(&self.close) else {
                // Unterminated: nothing after it can close either.
                break;
            };
            let close_start = body_start + close_rel;

            // A second opener before the close means the first one was stray.
            if let Some(inner) = self.open.find_at(text, body_start) {
                if inner.start() < close_start {
                    pos = inner.start();
                    continue;
                }
            }

            let end = close_start + self.close.len();
            let attrs = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            if let Some(payload) = self.payload(attrs, &text[body_start..close_start]) {
                blocks.push(ActionBlock::new(payload, open.start()..end));
            }
            pos = end;
        }

        blocks
    }

    fn render(&self, payload: &ActionPayload) -> Option<String> {
        if payload.kind() != self.kind {
            return None;
        }
        let tag = self.kind.tag_name();
        Some(match payload {
            ActionPayload::File { path, content } => {
                format!("<{tag} path=\"{}\">{content}</{tag}>", escape_attr(path))
            }
            ActionPayload::Bash { command } => format!("<{tag}>{command}</{tag}>"),
            ActionPayload::Workflow { program } => format!("<{tag}>{program}</{tag}>"),
        })
    }
}

fn attribute(attrs: &str, name: &str) -> Option<String> {
    attrs
        .split('"')
        .collect::<Vec<_>>()
        .chunks(2)
        .find_map(|pair| match pair {
            [key, value] => {
                let key = key.trim().strip_suffix('=')?.trim_end();
                (key == name).then(|| unescape_attr(value))
            }
            _ => None,
        })
}

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

fn unescape_attr(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Scans finalized text for action blocks of every registered kind.
pub struct OutputTagParser {
    strategies: Vec<Box<dyn TagStrategy>>,
}

impl OutputTagParser {
    /// Parser with the `file`, `bash` and `workflow` strategies.
    pub fn new() -> Result<Self, MoaiError> {
        let mut parser = Self::empty();
        for kind in ActionKind::ALL {
            let strategy =
                DelimitedTag::new(kind).map_err(|e| MoaiError::Parse(e.to_string()))?;
            parser = parser.with_strategy(Box::new(strategy));
        }
        Ok(parser)
    }

    /// Parser with no strategies.
    pub fn empty() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Register a strategy, replacing any previous one for the same kind.
    pub fn with_strategy(mut self, strategy: Box<dyn TagStrategy>) -> Self {
        self.strategies.retain(|s| s.kind() != strategy.kind());
        self.strategies.push(strategy);
        self
    }

    /// Blocks of all kinds in transcript order.
    ///
    /// Blocks of different kinds never nest: when spans overlap, the block
    /// that starts first wins and the other is treated as plain text.
    pub fn parse(&self, text: &str) -> Vec<ActionBlock> {
        let mut found: Vec<ActionBlock> = self
            .strategies
            .iter()
            .flat_map(|strategy| strategy.scan(text))
            .collect();
        found.sort_by_key(|block| block.span.start);

        let mut blocks: Vec<ActionBlock> = Vec::with_capacity(found.len());
        for block in found {
            let overlaps = blocks
                .last()
                .is_some_and(|prev| block.span.start < prev.span.end);
            if !overlaps {
                blocks.push(block);
            }
        }
        blocks
    }

    /// Blocks of one kind only.
    pub fn parse_kind(&self, text: &str, kind: ActionKind) -> Vec<ActionBlock> {
        self.parse(text)
            .into_iter()
            .filter(|block| block.kind() == kind)
            .collect()
    }

    /// Source text for `payloads`, one block per line.
    pub fn render(&self, payloads: &[ActionPayload]) -> String {
        payloads
            .iter()
            .filter_map(|payload| self.strategies.iter().find_map(|s| s.render(payload)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
