use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use formwalk::cache::{self, ResponseCache};
use formwalk::script::{Script, ScriptStore};
use formwalk::serialize;
use formwalk::session::{Page, Session, SessionConfig, DEFAULT_USER_AGENT};

#[derive(Parser)]
#[command(name = "formwalk")]
#[command(about = "Scriptable form-driven browsing for server-rendered sites")]
struct Cli {
    #[command(flatten)]
    session: SessionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SessionArgs {
    /// Tries per navigation, including the first
    #[arg(long, global = true, default_value_t = 3)]
    attempts: usize,

    /// Pause between tries, in milliseconds
    #[arg(long, global = true, default_value_t = 2000)]
    delay_ms: u64,

    /// Connect and read timeout, in seconds
    #[arg(long, global = true, default_value_t = 30)]
    timeout: u64,

    #[arg(long, global = true, default_value = DEFAULT_USER_AGENT)]
    user_agent: String,

    /// Response cache directory (default: ~/.formwalk/cache)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Always go to the network
    #[arg(long, global = true)]
    no_cache: bool,
}

impl SessionArgs {
    fn config(&self) -> SessionConfig {
        SessionConfig {
            attempts: self.attempts,
            retry_delay: Duration::from_millis(self.delay_ms),
            timeout: Duration::from_secs(self.timeout),
            user_agent: self.user_agent.clone(),
            cache_dir: if self.no_cache {
                None
            } else {
                Some(self.cache_dir.clone().unwrap_or_else(cache::cache_dir))
            },
            ..SessionConfig::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a URL and show its forms and links
    Fetch {
        url: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show the forms of an HTML file, or '-' for stdin
    Forms {
        input: String,

        /// URL the markup is treated as coming from
        #[arg(long, default_value = "http://localhost/")]
        base: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run an action script, given as a JSON file or a saved script name
    Run {
        script: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Manage saved scripts
    Scripts {
        #[command(subcommand)]
        command: ScriptCommands,
    },

    /// Manage the response cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum ScriptCommands {
    /// List saved scripts
    List {
        /// Only scripts whose start URL is on this host
        #[arg(long)]
        host: Option<String>,
    },
    /// Save a script file under its name, or '-' for stdin
    Save { file: String },
    /// Delete a saved script
    Delete { name: String },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Delete every cached response
    Clear,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.session.config();

    match cli.command {
        Commands::Fetch { url, format } => {
            info!(url = %url, format = %format, "fetch command");
            let mut session = Session::new(config)?;
            let page = session
                .navigate(&url)
                .with_context(|| format!("failed to fetch {url}"))?;
            print_output(page, &format)
        }
        Commands::Forms {
            input,
            base,
            format,
        } => {
            let html = read_input(&input)?;
            debug!(html_len = html.len(), "read markup");
            let mut session = Session::new(config)?;
            let page = session
                .load_html(&html, &base)
                .with_context(|| format!("invalid base URL {base}"))?;
            print_output(page, &format)
        }
        Commands::Run { script, format } => {
            let script = load_script(&script)?;
            info!(script = %script.name, "run command");
            let mut session = Session::new(config)?;
            let page = session
                .run_script(&script)
                .with_context(|| format!("script '{}' failed", script.name))?;
            print_output(page, &format)
        }
        Commands::Scripts { command } => run_scripts_command(command),
        Commands::Cache {
            command: CacheCommands::Clear,
        } => {
            let dir = config.cache_dir.unwrap_or_else(cache::cache_dir);
            let removed = ResponseCache::with_base(dir.clone())
                .clear()
                .with_context(|| format!("failed to clear {}", dir.display()))?;
            println!("removed {removed} cached responses");
            Ok(())
        }
    }
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read_to_string(input).with_context(|| format!("failed to read {input}"))
    }
}

/// A path to a JSON file, or else the name of a saved script.
fn load_script(arg: &str) -> Result<Script> {
    let path = Path::new(arg);
    if path.is_file() {
        return Script::from_file(path).with_context(|| format!("failed to read script {arg}"));
    }
    ScriptStore::new()
        .load(arg)
        .with_context(|| format!("no script file or saved script named '{arg}'"))
}

fn run_scripts_command(command: ScriptCommands) -> Result<()> {
    let store = ScriptStore::new();
    match command {
        ScriptCommands::List { host } => {
            let summaries = store.list(host.as_deref())?;
            if summaries.is_empty() {
                println!("no saved scripts");
            }
            for s in summaries {
                let host = s.host.as_deref().unwrap_or("-");
                println!("{} [{host}] {} actions", s.name, s.action_count);
                if let Some(desc) = &s.description {
                    println!("  {desc}");
                }
            }
        }
        ScriptCommands::Save { file } => {
            let json = read_input(&file)?;
            let script: Script = serde_json::from_str(&json)
                .with_context(|| format!("{file} is not a valid script"))?;
            let path = store
                .save(&script)
                .with_context(|| format!("failed to save script '{}'", script.name))?;
            info!(script = %script.name, "saved script");
            println!("saved {}", path.display());
        }
        ScriptCommands::Delete { name } => {
            store
                .delete(&name)
                .with_context(|| format!("failed to delete script '{name}'"))?;
            println!("deleted {name}");
        }
    }
    Ok(())
}

fn print_output(page: &Page, format: &str) -> Result<()> {
    let summary = serialize::summarize(page);
    let output = match format {
        "json" => serde_json::to_string_pretty(&summary)?,
        _ => serialize::to_compact_text(&summary),
    };
    println!("{output}");
    Ok(())
}
