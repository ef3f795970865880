//! moai CLI binary entry point.

use std::io::{Read, Write};
use std::sync::Arc;

use clap::Parser;
use moai::actions::{ActionStatus, LocalWorkspace, OutputTagParser};
use moai::aggregator::Flush;
use moai::cli::{image_mime_type, ChatArgs, Cli, Commands, ParseArgs};
use moai::config::MoaiConfig;
use moai::continuation::ContinuationPolicy;
use moai::pipeline::{ChatPipeline, RequestState};
use moai::provider::ModelRef;
use moai::session::{AgentProfile, SessionContext};
use moai::types::{GenerationSettings, ImageAttachment};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("MOAI_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Chat(chat_args) => handle_chat(chat_args).await,
        Commands::Parse(parse_args) => handle_parse(parse_args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn handle_chat(args: ChatArgs) -> Result<(), Box<dyn std::error::Error>> {
    let prompt = match args.prompt {
        Some(p) => p,
        None => {
            eprintln!("Usage: moai chat \"your prompt here\"");
            std::process::exit(1);
        }
    };

    let model: ModelRef = args.model.parse()?;
    let config = MoaiConfig::global().clone();

    let mut agent = match args.agent.as_deref() {
        Some(name) => AgentProfile::from_config(name, &config)?,
        None => AgentProfile::default(),
    };
    if let Some(system) = args.system {
        agent.system_template = Some(system);
    }

    let mut settings = GenerationSettings {
        temperature: None,
        max_tokens: config.settings().request.max_tokens,
    };
    if let Some(t) = args.temperature {
        settings.temperature = Some(t);
    }
    if let Some(max) = args.max_tokens {
        settings.max_tokens = Some(max);
    }

    let mut attachments = Vec::with_capacity(args.images.len());
    for path in &args.images {
        let mime = image_mime_type(path)
            .ok_or_else(|| format!("unsupported image type: {}", path.display()))?;
        let bytes = std::fs::read(path)?;
        attachments.push(ImageAttachment::from_bytes(&bytes, mime));
    }

    let session = SessionContext::new(model, config.clone())
        .with_agent(agent)
        .with_settings(settings);
    let turns = session.turns(&[], &prompt, attachments);

    // Ctrl-C cancels the turn; blocks already run are kept.
    let cancel = session.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n(cancelling)");
            cancel.cancel();
        }
    });

    let mut policy = ContinuationPolicy::from(&config.settings().continuation);
    if let Some(n) = args.anchor_chars {
        policy = policy.with_anchor_chars(n);
    }

    let workspace = Arc::new(LocalWorkspace::new(&args.root));
    let pipeline = ChatPipeline::new(workspace)?
        .with_continuation(policy)
        .with_dispatch_actions(!args.no_actions)
        .with_flush_sink(Arc::new(|flush: &Flush| {
            print!("{}", flush.appended);
            let _ = std::io::stdout().flush();
        }))
        .with_state_sink(Arc::new(|state: RequestState| {
            if state == RequestState::Continuing {
                tracing::info!("response truncated, continuing");
            }
        }));

    let outcome = pipeline.run(&session, turns).await;
    println!(); // newline after streaming

    for result in &outcome.results {
        let mark = match result.status {
            ActionStatus::Success => "ok",
            ActionStatus::Error => "FAILED",
        };
        eprintln!("[{mark}] {}: {}", result.block.label(), result.detail);
        for step in &result.steps {
            eprintln!(
                "    step {} {} [{}] {}",
                step.index + 1,
                step.handler,
                step.status,
                step.detail
            );
        }
    }
    if args.no_actions && !outcome.blocks.is_empty() {
        eprintln!("{} action block(s) not run (--no-actions)", outcome.blocks.len());
    }

    match outcome.state {
        RequestState::Errored => Err(outcome
            .error
            .unwrap_or_else(|| "request failed".to_string())
            .into()),
        RequestState::Cancelled => {
            eprintln!("cancelled");
            Ok(())
        }
        _ => Ok(()),
    }
}

fn handle_parse(args: ParseArgs) -> Result<(), Box<dyn std::error::Error>> {
    let text = match &args.file {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let parser = OutputTagParser::new()?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for block in parser.parse(&text) {
        writeln!(out, "{}", serde_json::to_string(&block)?)?;
    }
    Ok(())
}
