//! chatmux CLI binary entry point.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use chatmux::cli::{ChatArgs, Cli, Commands, ServeArgs};
use chatmux::client::{ClientConnection, ClientNotice};
use chatmux::config::MuxConfig;
use chatmux::engine::DemoEngine;
use chatmux::server::Server;
use chatmux::store::InMemoryStore;
use chatmux::timeline::{GenerationTimeline, TimelineBlock};
use chatmux::tools::{builtin, ToolRegistry};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match MuxConfig::load(cli.config.as_deref()) {
        Ok(config) => match cli.command {
            Commands::Serve(args) => handle_serve(config, args).await,
            Commands::Chat(args) => handle_chat(config, args).await,
        },
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn handle_serve(
    config: MuxConfig,
    args: ServeArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = args.listen.unwrap_or_else(|| config.listen_addr.clone());
    let mut registry = ToolRegistry::from_config(&config);
    for tool in builtin::all_tools() {
        registry.register(tool)?;
    }
    let engine = DemoEngine::new().with_chunk_delay(Duration::from_millis(args.chunk_delay_ms));
    let server = Server::new(
        config,
        Arc::new(registry),
        Arc::new(engine),
        Arc::new(InMemoryStore::new()),
    );
    tokio::select! {
        result = server.listen(&addr) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }
    Ok(())
}

async fn handle_chat(config: MuxConfig, args: ChatArgs) -> Result<(), Box<dyn std::error::Error>> {
    let client = ClientConnection::new(config, Arc::new(InMemoryStore::new()));
    let mut notices = client.subscribe();
    let transport = chatmux::transport::ws::connect(&args.url).await?;
    let reader = client.attach(transport).await?;
    client.focus(&args.session).await?;

    match &args.model {
        Some(model) => {
            client
                .start_generation_with_model(&args.session, &args.prompt, model)
                .await?
        }
        None => client.start_generation(&args.session, &args.prompt).await?,
    }

    loop {
        tokio::select! {
            notice = notices.recv() => match notice {
                Ok(ClientNotice::GenerationFinished {
                    session_id,
                    state,
                    error,
                    ..
                }) if session_id == args.session => {
                    if let Some(error) = error {
                        eprintln!("generation {state}: {error}");
                    }
                    break;
                }
                Ok(ClientNotice::Rejected {
                    session_id,
                    message,
                }) if session_id == args.session => {
                    return Err(message.into());
                }
                Ok(ClientNotice::Disconnected) => return Err("connection closed".into()),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                client.stop_generation(&args.session).await?;
                break;
            }
        }
    }

    if let Some(timeline) = client.multiplexer().timeline(&args.session) {
        if let Some(generation) = timeline.latest() {
            print_generation(generation);
        }
    }
    reader.abort();
    Ok(())
}

fn print_generation(generation: &GenerationTimeline) {
    for block in &generation.blocks {
        match block {
            TimelineBlock::Thinking { content, .. } => {
                eprintln!("\x1b[2m💭 {content}\x1b[0m");
            }
            TimelineBlock::ToolCall {
                name,
                args,
                result,
                is_error,
                ..
            } => {
                eprintln!("⚡ {name}({args})");
                if let Some(result) = result {
                    let marker = if *is_error { "✗" } else { "✓" };
                    eprintln!("  {marker} {result}");
                }
            }
        }
    }
    println!("{}", generation.content);
    let usage = &generation.usage;
    eprintln!(
        "[{} | tokens: {} in / {} out]",
        generation.state, usage.prompt_tokens, usage.completion_tokens
    );
}
