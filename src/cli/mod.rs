//! CLI definitions for chatmux.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// chatmux: multiplexed agent conversations over one connection
#[derive(Parser, Debug)]
#[command(name = "chatmux", version, about = "Multiplexed streaming agent server and client")]
pub struct Cli {
    /// Config file (TOML). Defaults to the user config directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a WebSocket server with the built-in tools and the demo engine
    Serve(ServeArgs),
    /// Send one message and print the reconstructed timeline
    Chat(ChatArgs),
}

/// Arguments for `chatmux serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to listen on (overrides config)
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Delay between demo engine chunks, in milliseconds
    #[arg(long, default_value_t = 40)]
    pub chunk_delay_ms: u64,
}

/// Arguments for `chatmux chat`.
#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// Server URL
    #[arg(short, long, default_value = "ws://127.0.0.1:8765")]
    pub url: String,

    /// Session (conversation) id
    #[arg(short, long, default_value = "default")]
    pub session: String,

    /// Model override passed to the server
    #[arg(short, long)]
    pub model: Option<String>,

    /// Message to send
    pub prompt: String,
}
