//! CLI entry point for moai.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// moai CLI
#[derive(Parser, Debug)]
#[command(
    name = "moai",
    version,
    about = "Stream a coding agent's reply and apply the actions it emits"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one message and run the action blocks in the reply
    Chat(ChatArgs),
    /// Print the action blocks found in a file (or stdin)
    Parse(ParseArgs),
}

/// Arguments for the `chat` subcommand.
#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// Model to use (format: provider:model, e.g., openai:gpt-4o)
    #[arg(short, long, default_value = "openai:gpt-4o")]
    pub model: String,

    /// System prompt (overrides the agent's)
    #[arg(short, long)]
    pub system: Option<String>,

    /// Temperature (0.0 - 2.0)
    #[arg(short, long)]
    pub temperature: Option<f64>,

    /// Max tokens per provider call
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Agent profile from the settings file
    #[arg(long)]
    pub agent: Option<String>,

    /// Project root that file and bash blocks act on
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Parse action blocks but do not run them
    #[arg(long)]
    pub no_actions: bool,

    /// Splice anchor size for continuation
    #[arg(long)]
    pub anchor_chars: Option<usize>,

    /// Attach an image (repeatable)
    #[arg(long = "image", value_name = "PATH")]
    pub images: Vec<PathBuf>,

    /// User prompt (positional)
    pub prompt: Option<String>,
}

/// Arguments for the `parse` subcommand.
#[derive(Parser, Debug)]
pub struct ParseArgs {
    /// File to scan; stdin when omitted
    pub file: Option<PathBuf>,
}

/// MIME type for an image path, by extension.
pub fn image_mime_type(path: &std::path::Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parse_chat_with_defaults() {
        let cli = Cli::try_parse_from(["moai", "chat"]).unwrap();
        match cli.command {
            Commands::Chat(args) => {
                assert_eq!(args.model, "openai:gpt-4o");
                assert!(args.system.is_none());
                assert!(args.temperature.is_none());
                assert!(args.max_tokens.is_none());
                assert_eq!(args.root, PathBuf::from("."));
                assert!(!args.no_actions);
                assert!(args.images.is_empty());
                assert!(args.prompt.is_none());
            }
            other => panic!("expected Chat, got {other:?}"),
        }
    }

    #[test]
    fn parse_chat_with_all_options() {
        let cli = Cli::try_parse_from([
            "moai",
            "chat",
            "-m",
            "anthropic:claude-sonnet-4-5",
            "-s",
            "You are helpful",
            "-t",
            "0.7",
            "--max-tokens",
            "1024",
            "--agent",
            "coder",
            "--root",
            "/tmp/project",
            "--no-actions",
            "--anchor-chars",
            "16",
            "--image",
            "a.png",
            "--image",
            "b.jpg",
            "Hello world",
        ])
        .unwrap();
        match cli.command {
            Commands::Chat(args) => {
                assert_eq!(args.model, "anthropic:claude-sonnet-4-5");
                assert_eq!(args.system.as_deref(), Some("You are helpful"));
                assert!((args.temperature.unwrap() - 0.7).abs() < f64::EPSILON);
                assert_eq!(args.max_tokens, Some(1024));
                assert_eq!(args.agent.as_deref(), Some("coder"));
                assert_eq!(args.root, PathBuf::from("/tmp/project"));
                assert!(args.no_actions);
                assert_eq!(args.anchor_chars, Some(16));
                assert_eq!(args.images.len(), 2);
                assert_eq!(args.prompt.as_deref(), Some("Hello world"));
            }
            other => panic!("expected Chat, got {other:?}"),
        }
    }

    #[test]
    fn parse_reads_optional_file() {
        let cli = Cli::try_parse_from(["moai", "parse", "reply.txt"]).unwrap();
        match cli.command {
            Commands::Parse(args) => assert_eq!(args.file, Some(PathBuf::from("reply.txt"))),
            other => panic!("expected Parse, got {other:?}"),
        }
        let cli = Cli::try_parse_from(["moai", "parse"]).unwrap();
        assert!(matches!(cli.command, Commands::Parse(ParseArgs { file: None })));
    }

    #[test]
    fn parse_missing_subcommand_is_error() {
        assert!(Cli::try_parse_from(["moai"]).is_err());
    }

    #[test]
    fn image_types_follow_extension() {
        assert_eq!(image_mime_type(std::path::Path::new("x.PNG")), Some("image/png"));
        assert_eq!(image_mime_type(std::path::Path::new("x.jpeg")), Some("image/jpeg"));
        assert_eq!(image_mime_type(std::path::Path::new("x.bmp")), None);
        assert_eq!(image_mime_type(std::path::Path::new("noext")), None);
    }
}
