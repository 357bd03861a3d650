use std::sync::Arc;

use inbox_pilot::agent::ChatResolver;
use inbox_pilot::config::AppConfig;
use inbox_pilot::llm::{InvocationClient, create_provider};
use inbox_pilot::pipeline::EmailPipeline;
use inbox_pilot::seed;
use inbox_pilot::server::{AppState, api_router};
use inbox_pilot::store::{LibSqlStore, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        eprintln!("  export ANTHROPIC_API_KEY=sk-ant-...");
        std::process::exit(1);
    });

    eprintln!("📬 Inbox Pilot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.model);
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   API: http://0.0.0.0:{}\n", config.port);

    let store: Arc<dyn Store> = Arc::new(
        LibSqlStore::new_local(&config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: failed to open database at {}: {}",
                    config.db_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );

    // First launch gets the default prompt set; edits are never overwritten
    let seeded = seed::ensure_default_templates(store.as_ref()).await?;
    if seeded > 0 {
        eprintln!("   Seeded {} default prompt templates", seeded);
    }

    let provider = create_provider(&config.llm_config())?;
    let client = Arc::new(InvocationClient::new(provider));

    let pipeline = Arc::new(EmailPipeline::new(Arc::clone(&store), Arc::clone(&client)));
    let resolver = Arc::new(ChatResolver::new(Arc::clone(&store), client));

    let app = api_router(AppState {
        store,
        pipeline,
        resolver,
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "HTTP server started");
    axum::serve(listener, app).await?;

    Ok(())
}
