use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use gitsage::backend::RepoId;
use gitsage::chat::SendOutcome;
use gitsage::config::Config;
use gitsage::content::{FileContent, Selection};
use gitsage::session::RepoSession;
use gitsage::tree::{file_icon, Expansion};
use gitsage::util::format_file_size;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter
const LOG_ENV: &str = "GITSAGE_LOG";

#[derive(Parser, Debug)]
#[command(
    name = "gitsage",
    about = "Browse a repository and ask questions about its files",
    version
)]
struct Cli {
    /// Explorer server URL (overrides config and GITSAGE_SERVER_URL)
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the repository tree
    Tree {
        /// owner/name or a GitHub URL
        repo: RepoId,
        /// Directory to print collapsed (repeatable)
        #[arg(long)]
        collapse: Vec<String>,
    },
    /// Print one file
    Show { repo: RepoId, path: String },
    /// Ask a question, optionally about a file
    Ask {
        repo: RepoId,
        #[arg(short, long)]
        file: Option<String>,
        #[arg(required = true, trailing_var_arg = true)]
        question: Vec<String>,
    },
    /// Explain one file
    Explain { repo: RepoId, path: String },
    /// Show or update the saved configuration
    Config {
        /// Persist this explorer server URL
        #[arg(long)]
        set_server: Option<String>,
    },
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut config = Config::load();
    if let Some(server) = &cli.server {
        config.apply_server_override(server);
    }

    match cli.command {
        Commands::Tree { repo, collapse } => run_tree(&config, repo, &collapse).await,
        Commands::Show { repo, path } => run_show(&config, repo, &path).await,
        Commands::Ask {
            repo,
            file,
            question,
        } => run_ask(&config, repo, file.as_deref(), &question.join(" ")).await,
        Commands::Explain { repo, path } => run_explain(&config, repo, &path).await,
        Commands::Config { set_server } => run_config(set_server.as_deref()),
    }
}

async fn run_tree(config: &Config, repo: RepoId, collapsed: &[String]) -> Result<()> {
    let mut session = RepoSession::connect(config, repo)?;
    println!("{}", session.repo());
    let tree = session.load_tree().await?;

    let mut expansion = Expansion::all(tree);
    for dir in collapsed {
        expansion.collapse(dir);
    }
    for row in tree.rows(&expansion) {
        println!(
            "{}{} {}",
            "  ".repeat(row.depth),
            file_icon(row.node),
            row.node.name
        );
    }
    eprintln!("{} files", tree.file_count());
    Ok(())
}

async fn select(session: &RepoSession, path: &str) -> Result<FileContent> {
    match session.select(path).await? {
        Selection::Active(entry) => Ok(entry.content),
        Selection::Superseded { path } => Err(anyhow!("selection of {} was superseded", path)),
    }
}

async fn run_show(config: &Config, repo: RepoId, path: &str) -> Result<()> {
    let session = RepoSession::connect(config, repo)?;
    match select(&session, path).await? {
        FileContent::Text(text) => print!("{}", text),
        FileContent::Binary(descriptor) => {
            println!("{}", descriptor.name);
            println!("  type: {} ({})", descriptor.category, descriptor.mime);
            println!("  size: {}", format_file_size(descriptor.size_bytes));
            if !descriptor.download_url.is_empty() {
                println!("  download: {}", descriptor.download_url);
            }
        }
    }
    Ok(())
}

async fn run_ask(config: &Config, repo: RepoId, file: Option<&str>, question: &str) -> Result<()> {
    let session = RepoSession::connect(config, repo)?;
    if let Some(path) = file {
        select(&session, path).await?;
    }

    let outcome = session.send(question).await;
    if let Some(path) = session.cache().current() {
        eprintln!("context: {}", path);
    }
    for message in session.chat().messages() {
        println!("[{}] {}", message.role.label(), message.markup());
    }

    match outcome {
        SendOutcome::Answered(_) => Ok(()),
        SendOutcome::Failed(message) => Err(anyhow!(message.body)),
        SendOutcome::Ignored(reason) => Err(anyhow!("question was not sent: {:?}", reason)),
    }
}

async fn run_explain(config: &Config, repo: RepoId, path: &str) -> Result<()> {
    let session = RepoSession::connect(config, repo)?;
    select(&session, path).await?;
    let markup = session.explain().await?;
    println!("{}", markup);
    Ok(())
}

fn run_config(set_server: Option<&str>) -> Result<()> {
    if let Some(url) = set_server {
        let mut saved = Config::config_path()
            .map(|path| Config::load_from(&path))
            .unwrap_or_default();
        saved.apply_server_override(url);
        saved.server_base()?;
        saved.save()?;
        println!("Saved server URL to {}", Config::config_location());
    }

    let config = Config::load();
    println!("config: {}", Config::config_location());
    println!("server_url: {}", config.server_url);
    println!("request_timeout_secs: {}", config.request_timeout_secs);
    println!("chat_timeout_secs: {}", config.chat_timeout_secs);
    Ok(())
}
