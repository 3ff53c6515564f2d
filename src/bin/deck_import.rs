use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use deckport::config::Config;
use deckport::import::{
    decode_text, format_intent, parse_decklist, parse_order_xml, sniff_input, DeckUrlImporter,
    ImportIntent, ImportOrchestrator, ImportOutcome, InputKind,
};
use deckport::library::LibraryManager;
use deckport::ports::TracingNotifier;

#[tokio::main]
async fn main() {
    // Use RUST_LOG env var if set, otherwise default to info level
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage(&args[0]);
        std::process::exit(1);
    }

    let mut db_path: Option<PathBuf> = None;
    let mut dry_run = false;
    let mut input: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" => {
                if i + 1 >= args.len() {
                    error!("--db requires a file path");
                    print_usage(&args[0]);
                    std::process::exit(1);
                }
                db_path = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--dry-run" => {
                dry_run = true;
                i += 1;
            }
            other if input.is_none() => {
                input = Some(other.to_string());
                i += 1;
            }
            other => {
                error!("Unexpected argument: {}", other);
                print_usage(&args[0]);
                std::process::exit(1);
            }
        }
    }

    let Some(input) = input else {
        error!("No input specified");
        print_usage(&args[0]);
        std::process::exit(1);
    };

    let config = Config::load();
    let settings = config.settings();

    let text = if input.starts_with("http://") || input.starts_with("https://") {
        input.clone()
    } else {
        match std::fs::read(&input) {
            Ok(bytes) => decode_text(&bytes),
            Err(e) => {
                error!("Failed to read {}: {}", input, e);
                std::process::exit(1);
            }
        }
    };

    let intents: Vec<ImportIntent> = match sniff_input(&text) {
        InputKind::DeckUrl => {
            let client = match config.http_client() {
                Ok(client) => client,
                Err(e) => {
                    error!("Failed to build HTTP client: {}", e);
                    std::process::exit(1);
                }
            };
            match DeckUrlImporter::new(client).fetch_intents(text.trim()).await {
                Ok(intents) => intents,
                Err(e) => {
                    error!("Failed to fetch deck: {}", e);
                    std::process::exit(1);
                }
            }
        }
        InputKind::OrderXml => match parse_order_xml(&text) {
            Ok(order) => {
                if let Some(back) = order.global_back {
                    info!("Using order card back {} as default back", back);
                    settings.set_default_back_image_id(Some(back));
                }
                order.intents
            }
            Err(e) => {
                error!("Failed to parse order XML: {}", e);
                std::process::exit(1);
            }
        },
        InputKind::Decklist => parse_decklist(&text),
    };

    for intent in &intents {
        println!("{}", format_intent(intent));
    }
    if dry_run {
        info!("Dry run: parsed {} intent(s), nothing imported", intents.len());
        return;
    }

    let db_path = db_path.unwrap_or_else(|| config.database_path());
    if let Some(parent) = db_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!("Could not create {}: {}", parent.display(), e);
        }
    }

    let library = match LibraryManager::open(&db_path.to_string_lossy()).await {
        Ok(library) => library,
        Err(e) => {
            error!("Failed to open library at {}: {}", db_path.display(), e);
            std::process::exit(1);
        }
    };

    let orchestrator = match ImportOrchestrator::from_config(
        &config,
        Arc::new(library),
        Arc::new(TracingNotifier),
        Arc::new(settings),
    ) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!("Failed to set up providers: {}", e);
            std::process::exit(1);
        }
    };

    match orchestrator.process_cards(intents).await {
        ImportOutcome::Completed(summary) => {
            println!(
                "Imported {} card(s), {} not found",
                summary.imported(),
                summary.failed.len()
            );
            for failed in &summary.failed {
                println!("  missing: {} ({})", failed.name, failed.reason);
            }
            if let Some(ImportOutcome::Completed(tokens)) = orchestrator.wait_for_token_pass().await
            {
                println!("Imported {} token(s)", tokens.imported());
            }
        }
        ImportOutcome::NoValidCards => std::process::exit(1),
        ImportOutcome::Cancelled => {
            warn!("Import was cancelled");
            std::process::exit(1);
        }
        ImportOutcome::Failed(e) => {
            error!("Import failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_usage(program_name: &str) {
    eprintln!("Usage:");
    eprintln!("  {} [--db <library.db>] [--dry-run] <decklist|order.xml|deck url>", program_name);
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {} deck.txt", program_name);
    eprintln!("  {} --dry-run order.xml", program_name);
    eprintln!("  {} https://archidekt.com/decks/123456", program_name);
}
