use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use picoclaw_channels::{BotsChatChannel, MessageBus};
use picoclaw_config::{ConfigLoader, PicoConfig};
use picoclaw_core::Result;
use picoclaw_hooks::builtin::{PolicyHandler, ProvenanceHandler, PromptAuditHandler};
use picoclaw_hooks::{AuditSink, Dispatcher, Event, JsonlAuditSink, load_policy};
use picoclaw_llm::OpenAiCompatProvider;
use picoclaw_runtime::AgentLoop;
use picoclaw_server::ProcessDirect;
use picoclaw_skills::{SkillInstaller, parse_install_spec};

#[derive(Parser)]
#[command(name = "picoclaw", about = "Ultra-lightweight personal AI agent", version)]
pub struct Cli {
    /// Path to picoclaw.toml (default: ~/.picoclaw/picoclaw.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the agent runtime (channels + HTTP gateway)
    Start,
    /// Manage workspace skills
    Skills {
        #[command(subcommand)]
        command: SkillsCommand,
    },
}

#[derive(Subcommand)]
enum SkillsCommand {
    /// Install a skill from owner/repo[@branch], optionally a subpath
    Install {
        spec: String,
        /// Path inside the repository holding SKILL.md
        #[arg(default_value = "")]
        subpath: String,
        /// Overwrite an existing skill directory
        #[arg(long)]
        force: bool,
    },
}

/// Bridges the HTTP gateway onto the agent loop.
struct AgentBridge(Arc<AgentLoop>);

#[async_trait::async_trait]
impl ProcessDirect for AgentBridge {
    async fn process_direct(
        &self,
        content: &str,
        session_key: &str,
        deadline: Option<std::time::Instant>,
    ) -> Result<String> {
        self.0.process_direct(content, session_key, deadline).await
    }
}

impl Cli {
    pub async fn run(&self) -> Result<()> {
        let config = ConfigLoader::load(self.config.as_deref())?;
        init_tracing(&config);

        match &self.command {
            Command::Start => start(config).await,
            Command::Skills { command } => match command {
                SkillsCommand::Install {
                    spec,
                    subpath,
                    force,
                } => install_skill(&config, spec, subpath, *force).await,
            },
        }
    }
}

fn init_tracing(config: &PicoConfig) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn start(config: PicoConfig) -> Result<()> {
    let workspace = config.agent.workspace.clone();
    std::fs::create_dir_all(&workspace)?;
    info!(workspace = %workspace.display(), model = %config.agent.model, "starting picoclaw");

    // Hook dispatcher with the workspace policy's audit sink.
    let (policy, diag) = load_policy(&workspace)?;
    for warning in &diag.warnings {
        warn!("{warning}");
    }
    let audit: Option<Arc<dyn AuditSink>> = if policy.audit_enabled {
        Some(Arc::new(JsonlAuditSink::at(PathBuf::from(
            &policy.audit_path,
        ))?))
    } else {
        None
    };
    let hooks = Arc::new(Dispatcher::new(audit));
    for event in picoclaw_hooks::types::KNOWN_EVENTS {
        hooks.register(event, Arc::new(PolicyHandler::new(&workspace)));
        hooks.register(event, Arc::new(ProvenanceHandler));
    }
    let prompt_audit = Arc::new(PromptAuditHandler::new(
        workspace.join("hooks").join("prompt-audit.jsonl"),
    )?);
    for event in [Event::BeforeTurn, Event::BeforeLlm, Event::AfterLlm, Event::AfterTurn] {
        hooks.register(event, prompt_audit.clone());
    }

    let provider = Arc::new(OpenAiCompatProvider::new(
        "openrouter",
        config.provider.api_base.clone(),
        config.provider.api_key.clone(),
    ));
    let agent = Arc::new(AgentLoop::new(&config, provider, hooks));

    // BotsChat channel
    let mut channel_handle = None;
    if config.channels.botschat.enabled {
        let (bus, mut inbound_rx) = MessageBus::new(256);
        let channel = Arc::new(BotsChatChannel::new(config.channels.botschat.clone(), bus));
        channel.start();

        let agent_for_channel = agent.clone();
        let channel_for_replies = channel.clone();
        tokio::spawn(async move {
            while let Some(msg) = inbound_rx.recv().await {
                let agent = agent_for_channel.clone();
                let channel = channel_for_replies.clone();
                tokio::spawn(async move {
                    let session_key = format!("{}:{}", msg.channel, msg.session_key);
                    // No caller deadline here: the turn is bounded by
                    // the configured request_timeout_secs.
                    match agent
                        .process(&msg.content, &session_key, &msg.channel, &msg.session_key, None)
                        .await
                    {
                        Ok(reply) if !reply.is_empty() => {
                            if let Err(e) = channel.send(&msg.session_key, &reply) {
                                error!(error = %e, "failed to send channel reply");
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(error = %e, "agent turn failed");
                            let _ = channel.send(&msg.session_key, &format!("Error: {e}"));
                        }
                    }
                });
            }
        });
        channel_handle = Some(channel);
    }

    // OpenAI-compatible gateway
    if config.gateway.openai_api.enabled {
        let router = picoclaw_server::build_router(
            config.gateway.openai_api.clone(),
            Arc::new(AgentBridge(agent.clone())),
        );
        let bind = config.gateway.openai_api.bind.clone();
        let listener = tokio::net::TcpListener::bind(&bind).await?;
        info!(bind = %bind, "openai-compatible gateway listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "gateway server exited");
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    if let Some(channel) = channel_handle {
        channel.stop();
    }
    Ok(())
}

async fn install_skill(config: &PicoConfig, spec: &str, subpath: &str, force: bool) -> Result<()> {
    let (repo, branch) = parse_install_spec(spec)?;
    let installer = SkillInstaller::new(config.agent.workspace.clone());
    let name = installer.install(&repo, &branch, subpath, force).await?;
    println!("✅ Installed skill: {name}");
    Ok(())
}
