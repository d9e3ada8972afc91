use apichain::api::handlers::AppState;
use apichain::api::routes::create_router;
use apichain::config::AppConfig;
use apichain::llm::OllamaClient;
use apichain::store::PostgresStore;
use axum::serve;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Initialize logging with explicit filter to suppress sqlx debug logs
    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("sqlx", LevelFilter::Warn)
        .init();

    println!("apichain: dependency-aware API test orchestration");

    let config = AppConfig::load()?;
    println!(
        "Configuration loaded: server={}:{}",
        config.server.host, config.server.port
    );

    println!("Connecting to PostgreSQL...");
    let database_url = config.database_url()?;
    let postgres_store = PostgresStore::new(&database_url).await?;

    println!("Running database migrations...");
    postgres_store.migrate().await?;

    let state = AppState {
        store: Arc::new(postgres_store),
        chat: Arc::new(OllamaClient::new(&config.llm.base_url, &config.llm.model)?),
        llm_model: config.llm.model.clone(),
    };

    run_server(create_router().with_state(state), &config).await?;

    Ok(())
}

async fn run_server(app: axum::Router, config: &AppConfig) -> anyhow::Result<()> {
    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    println!("apichain server running on http://{}", bind_address);

    serve(listener, app).await?;

    Ok(())
}
