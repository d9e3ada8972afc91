pub mod api;
pub mod config;
pub mod error;
pub mod llm;
pub mod logic;
pub mod model;
pub mod store;

pub use api::*;
pub use error::*;
pub use logic::*;
pub use model::*;
pub use store::*;

// Function for integration testing
pub async fn run_server() -> anyhow::Result<()> {
    use crate::api::handlers::AppState;
    use crate::llm::OllamaClient;
    use axum::serve;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    let _ = env_logger::try_init();

    // Load configuration
    let config = crate::config::AppConfig::load()?;

    // Connect to PostgreSQL
    let database_url = config.database_url()?;
    let postgres_store = crate::store::PostgresStore::new(&database_url).await?;

    // Run migrations
    postgres_store.migrate().await?;

    let state = AppState {
        store: Arc::new(postgres_store),
        chat: Arc::new(OllamaClient::new(&config.llm.base_url, &config.llm.model)?),
        llm_model: config.llm.model.clone(),
    };

    let app = crate::api::routes::create_router().with_state(state);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;

    serve(listener, app).await?;

    Ok(())
}
