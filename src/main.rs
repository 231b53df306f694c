#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::assigning_clones,
    clippy::bool_to_int_with_if,
    clippy::case_sensitive_file_extension_comparisons,
    clippy::cast_possible_wrap,
    clippy::doc_markdown,
    clippy::field_reassign_with_default,
    clippy::float_cmp,
    clippy::implicit_clone,
    clippy::items_after_statements,
    clippy::map_unwrap_or,
    clippy::manual_let_else,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::needless_raw_string_hashes,
    clippy::redundant_closure_for_method_calls,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::struct_field_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::unused_self,
    clippy::cast_precision_loss,
    clippy::unnecessary_cast,
    clippy::unnecessary_lazy_evaluations,
    clippy::unnecessary_literal_bound,
    clippy::unnecessary_map_or,
    clippy::unnecessary_wraps,
    dead_code
)]

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use mas_coordinator::agent::{Coordinator, Message, RequestContext};
use mas_coordinator::config::Config;
use mas_coordinator::stage::{ResponseEvent, StageReporter};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CompletionShell {
    #[value(name = "bash")]
    Bash,
    #[value(name = "fish")]
    Fish,
    #[value(name = "zsh")]
    Zsh,
    #[value(name = "powershell")]
    PowerShell,
    #[value(name = "elvish")]
    Elvish,
}

/// Multi-agent coordinator: routes each conversation to the right agent.
#[derive(Parser, Debug)]
#[command(name = "mas-coordinator")]
#[command(version)]
#[command(about = "Route chat requests to specialized agents and stream the answer.", long_about = None)]
struct Cli {
    /// Path to config.toml (defaults to ~/.mas-coordinator/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the chat-completions server
    #[command(long_about = "\
Start the chat-completions server.

Serves POST /openai/deployments/<name>/chat/completions and GET /health. \
Bind address defaults to the values in your config file \
(gateway.host / gateway.port).

Examples:
  mas-coordinator serve
  mas-coordinator serve -p 8080
  mas-coordinator serve --host 127.0.0.1")]
    Serve {
        /// Port to listen on; defaults to config gateway.port
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to; defaults to config gateway.host
        #[arg(long)]
        host: Option<String>,
    },

    /// Run one request through the pipeline and print the answer
    #[command(long_about = "\
Run one request through the pipeline.

Stages are printed to stderr, the streamed answer to stdout. The backend \
credential falls back to DIAL_API_KEY, then API_KEY.

Examples:
  mas-coordinator ask -m \"Add user Bob\"
  mas-coordinator ask -m \"What's the weather in Kyiv?\" --api-key dial-...")]
    Ask {
        /// User message
        #[arg(short, long)]
        message: String,

        /// Backend credential
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Manage configuration
    #[command(long_about = "\
Inspect configuration.

Use 'schema' to dump the JSON Schema for the config file, which documents \
every available key, type, and default value.

Examples:
  mas-coordinator config schema
  mas-coordinator config schema > schema.json")]
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },

    /// Generate shell completion script to stdout
    #[command(long_about = "\
Generate shell completion scripts for `mas-coordinator`.

Examples:
  source <(mas-coordinator completions bash)
  mas-coordinator completions zsh > ~/.zfunc/_mas-coordinator")]
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Dump the full configuration JSON Schema to stdout
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Both ring and aws-lc-rs may be linked; pick one explicitly.
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("Warning: Failed to install default crypto provider: {e:?}");
    }

    let cli = Cli::parse();

    // Completions must stay stdout-only: no config, no logging.
    if let Commands::Completions { shell } = &cli.command {
        let mut stdout = std::io::stdout().lock();
        write_shell_completion(*shell, &mut stdout)?;
        return Ok(());
    }

    if let Commands::Config {
        config_command: ConfigCommands::Schema,
    } = &cli.command
    {
        let schema = schemars::schema_for!(Config);
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let config = Config::load(cli.config.as_deref()).await?;
    init_logging(&config.log_level)?;
    for ignored in &config.ignored_overrides {
        warn!("Ignoring environment override: {ignored}");
    }
    info!(
        path = %config.config_path.display(),
        backend = %config.backend.endpoint,
        deployment = %config.backend.deployment,
        gpa = %config.agents.gpa_deployment,
        ums = %config.agents.ums_endpoint,
        "Configuration ready"
    );

    match cli.command {
        Commands::Completions { .. } | Commands::Config { .. } => unreachable!(),
        Commands::Serve { port, host } => {
            let port = port.unwrap_or(config.gateway.port);
            let host = host.unwrap_or_else(|| config.gateway.host.clone());
            info!("Starting coordinator on {host}:{port}");
            mas_coordinator::gateway::run_gateway(&host, port, config).await
        }
        Commands::Ask { message, api_key } => ask(config, message, api_key).await,
    }
}

/// `RUST_LOG` wins; otherwise the configured level.
fn init_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")
}

fn resolve_api_key(explicit: Option<String>) -> Option<String> {
    explicit
        .or_else(|| std::env::var("DIAL_API_KEY").ok())
        .or_else(|| std::env::var("API_KEY").ok())
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
}

async fn ask(config: Config, message: String, api_key: Option<String>) -> Result<()> {
    let Some(api_key) = resolve_api_key(api_key) else {
        bail!("No backend credential: pass --api-key or set DIAL_API_KEY");
    };
    let context = RequestContext {
        api_key: Some(api_key),
        conversation_id: None,
    };
    let http = mas_coordinator::providers::build_http_client(&config.http);
    let coordinator = Coordinator::from_config(&config, &context, http);

    let (tx, rx) = mpsc::unbounded_channel::<ResponseEvent>();
    let printer = tokio::spawn(print_events(rx));

    let reporter = StageReporter::new(Arc::new(tx));
    let result = coordinator.handle(&[Message::user(message)], &reporter).await;
    drop(reporter);
    printer.await.context("event printer task failed")?;

    let response = result?;
    println!();
    if let Some(custom) = response.custom_content.filter(|c| !c.attachments.is_empty()) {
        for attachment in custom.attachments {
            let target = attachment.url.or(attachment.reference_url).unwrap_or_default();
            eprintln!(
                "attachment: {} {target}",
                attachment.title.as_deref().unwrap_or("(untitled)")
            );
        }
    }
    Ok(())
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<ResponseEvent>) {
    let mut stdout = std::io::stdout();
    while let Some(event) = rx.recv().await {
        match event {
            ResponseEvent::StageOpened { name, .. } => eprintln!("\n── {name} ──"),
            ResponseEvent::StageContent { content, .. } => eprint!("{content}"),
            ResponseEvent::StageClosed { status, .. } => eprintln!("\n[{status:?}]"),
            ResponseEvent::Content(chunk) => {
                print!("{chunk}");
                let _ = stdout.flush();
            }
        }
    }
}

fn write_shell_completion<W: Write>(shell: CompletionShell, writer: &mut W) -> Result<()> {
    use clap_complete::generate;
    use clap_complete::shells;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();

    match shell {
        CompletionShell::Bash => generate(shells::Bash, &mut cmd, bin_name.clone(), writer),
        CompletionShell::Fish => generate(shells::Fish, &mut cmd, bin_name.clone(), writer),
        CompletionShell::Zsh => generate(shells::Zsh, &mut cmd, bin_name.clone(), writer),
        CompletionShell::PowerShell => {
            generate(shells::PowerShell, &mut cmd, bin_name.clone(), writer);
        }
        CompletionShell::Elvish => generate(shells::Elvish, &mut cmd, bin_name, writer),
    }

    writer.flush()?;
    Ok(())
}
