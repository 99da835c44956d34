mod mcp;

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use quietinbox_actions::scan::DEFAULT_PAGE_SIZE;
use quietinbox_actions::{ActionExecutor, ScanOptions, ScanOrchestrator};
use quietinbox_domain::Store;
use quietinbox_google::{GmailAdapter, StaticTokenProvider};
use quietinbox_store::JsonFileStore;
use quietinbox_web::{HttpUnsubscriber, SystemLauncher};
use tracing::{error, info};

const DEFAULT_UNSUBSCRIBE_DELAY_MS: u64 = 500;

struct Config {
    data_dir: PathBuf,
    page_size: usize,
    unsubscribe_delay: Duration,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("quietinbox=info")),
        )
        .compact()
        .init();
}

fn load_config() -> Result<Config, String> {
    let data_dir = env::var("QUIETINBOX_DATA_DIR").unwrap_or_else(|_| {
        let home = env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        format!("{home}/.quietinbox")
    });

    let page_size = match env::var("QUIETINBOX_PAGE_SIZE") {
        Ok(raw) => raw
            .parse::<usize>()
            .ok()
            .filter(|n| (1..=500).contains(n))
            .ok_or(format!("invalid QUIETINBOX_PAGE_SIZE: {raw} (expected 1-500)"))?,
        Err(_) => DEFAULT_PAGE_SIZE,
    };

    let delay_ms = match env::var("QUIETINBOX_UNSUBSCRIBE_DELAY_MS") {
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|e| format!("invalid QUIETINBOX_UNSUBSCRIBE_DELAY_MS: {e}"))?,
        Err(_) => DEFAULT_UNSUBSCRIBE_DELAY_MS,
    };

    Ok(Config {
        data_dir: PathBuf::from(data_dir),
        page_size,
        unsubscribe_delay: Duration::from_millis(delay_ms),
    })
}

async fn run_mcp_server() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let credentials = Arc::new(StaticTokenProvider::from_env()?);

    let store: Arc<dyn Store> = Arc::new(JsonFileStore::open(&config.data_dir).await?);
    info!(dir = %config.data_dir.display(), "store opened");

    let gmail = Arc::new(GmailAdapter::new(credentials)?);
    let scanner = Arc::new(ScanOrchestrator::new(gmail.clone(), store.clone()));
    let executor = ActionExecutor::new(
        gmail.clone(),
        gmail,
        store.clone(),
        Arc::new(HttpUnsubscriber::new()?),
        Arc::new(SystemLauncher::new()),
    )
    .with_unsubscribe_delay(config.unsubscribe_delay);

    let scan_defaults = ScanOptions {
        page_size: config.page_size,
        ..ScanOptions::default()
    };

    let server = mcp::McpServer::new(store, scanner, executor, scan_defaults);
    server.run().await?;

    Ok(())
}

/// Prints the OAuth scopes the stored settings call for.
async fn run_scopes() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let store = JsonFileStore::open(&config.data_dir).await?;
    let settings = store.get_settings().await?;
    for scope in settings.oauth_scopes() {
        println!("{scope}");
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    let cmd = args.get(1).map(|s| s.as_str()).unwrap_or("mcp");

    let result = match cmd {
        "mcp" => run_mcp_server().await,
        "scopes" => run_scopes().await,
        "help" | "--help" | "-h" => {
            eprintln!("quietinbox: find newsletters, unsubscribe and clean up Gmail");
            eprintln!();
            eprintln!("Usage:");
            eprintln!("  quietinbox mcp       Start MCP server (stdio)");
            eprintln!("  quietinbox scopes    Print the Gmail OAuth scopes the current settings need");
            eprintln!("  quietinbox help      Show this help");
            eprintln!();
            eprintln!("Environment variables:");
            eprintln!("  GMAIL_ACCESS_TOKEN               OAuth access token for the Gmail API");
            eprintln!("  QUIETINBOX_DATA_DIR              Data directory (default: ~/.quietinbox)");
            eprintln!("  QUIETINBOX_PAGE_SIZE             Messages listed per scan page (default: 100)");
            eprintln!("  QUIETINBOX_UNSUBSCRIBE_DELAY_MS  Pause between batch unsubscribes (default: 500)");
            eprintln!("  RUST_LOG                         Log level (default: quietinbox=info)");
            Ok(())
        }
        unknown => {
            eprintln!("Unknown command: {unknown}");
            eprintln!("Run `quietinbox help` for usage");
            return;
        }
    };

    if let Err(e) = result {
        error!(%e, "fatal error");
        std::process::exit(1);
    }
}
