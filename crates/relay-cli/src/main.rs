//! relay - chat with an LLM that can call your tool servers
//!
//! Interactive by default; `-p` runs a single prompt and exits. Tool
//! servers and hooks come from the config file, everything else from flags.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use relay_core::agent::{AgentConfig, CancelListener};
use relay_core::config::RuntimeConfig;
use relay_core::hooks::{HookEngine, HookSession};
use relay_core::model::{HttpModelClient, ModelClient, ProviderSpec};
use relay_core::toolserver::{ToolHost, ToolHostManager};

mod cancel;
mod session;

const DEFAULT_MODEL: &str = "anthropic:claude-sonnet-4-5";

/// Conversational agent runtime connecting LLMs to tool servers
#[derive(Parser)]
#[command(name = "relay", version)]
struct Cli {
    /// Model as provider:model, e.g. anthropic:claude-sonnet-4-5
    #[arg(short, long)]
    model: Option<String>,

    /// Config file (merged over ~/.config/relay/config.yml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run one prompt non-interactively and exit
    #[arg(short, long)]
    prompt: Option<String>,

    /// System prompt text
    #[arg(long)]
    system_prompt: Option<String>,

    /// Generation steps per prompt before the loop stops (0 = unlimited)
    #[arg(long)]
    max_steps: Option<usize>,

    /// Conversation window in messages (0 disables pruning)
    #[arg(long)]
    message_window: Option<usize>,

    /// Override the provider base URL
    #[arg(long)]
    provider_url: Option<String>,

    /// Disable streaming output
    #[arg(long)]
    no_stream: bool,

    /// Ask before every tool call
    #[arg(long)]
    confirm_tools: bool,

    /// Verbose logging to stderr
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = RuntimeConfig::load(cli.config.as_deref())?;
    if cli.model.is_some() {
        config.model = cli.model;
    }
    if cli.system_prompt.is_some() {
        config.system_prompt = cli.system_prompt;
    }
    if cli.max_steps.is_some() {
        config.max_steps = cli.max_steps;
    }
    if cli.message_window.is_some() {
        config.message_window = cli.message_window;
    }
    if cli.provider_url.is_some() {
        config.provider_url = cli.provider_url;
    }

    let model_string = config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let spec = ProviderSpec::parse(&model_string)
        .with_context(|| format!("invalid model {model_string:?}"))?
        .with_base_url(config.provider_url.clone());
    let client: Arc<dyn ModelClient> = Arc::new(HttpModelClient::new(spec, None));

    let working_dir = std::env::current_dir()?;
    let tools: Arc<dyn ToolHost> = Arc::new(
        ToolHostManager::connect_all(&config.tool_servers, &working_dir).await,
    );

    let interactive = cli.prompt.is_none();
    let agent_config = AgentConfig {
        working_dir: working_dir.clone(),
        system_prompt: config.system_prompt.clone().unwrap_or_default(),
        max_steps: config.max_steps(),
        message_window: config.message_window(),
        streaming: !cli.no_stream,
        require_approval: cli.confirm_tools && interactive,
        ..AgentConfig::default()
    };

    let hooks = Arc::new(HookEngine::new(
        config.hooks.clone(),
        HookSession {
            session_id: agent_config.session_id.clone(),
            cwd: working_dir,
            model: model_string,
            interactive,
        },
    ));

    let cancel_listener: Option<Arc<dyn CancelListener>> = if interactive {
        Some(Arc::new(cancel::EscListener))
    } else {
        None
    };

    let mut session = session::Session::new(client, tools, hooks, cancel_listener, agent_config);

    match cli.prompt {
        Some(prompt) => session.run_prompt(&prompt).await,
        None => session.repl().await,
    }
}
