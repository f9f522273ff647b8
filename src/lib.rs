pub mod api;
pub mod config;
pub mod logic;
pub mod model;
pub mod notify;
pub mod seed;
pub mod store;

pub use api::{create_router, AppState};
pub use config::AppConfig;
pub use logic::{DispatchError, DispatchRequest, Dispatcher};
pub use model::*;
pub use notify::{ConnectionRegistry, NotifyAction, NotifyMessage};
pub use store::{EntityStore, FileStore, PostgresStore, StoreError};

use std::sync::Arc;

/// Full server assembly: load configuration and the schema document,
/// pick the storage backend, apply seed data and serve until shutdown.
pub async fn run_server() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    let jwt_secret = config.jwt_secret()?;

    let raw = std::fs::read_to_string(&config.schema.document).map_err(|err| {
        anyhow::anyhow!("cannot read schema document {}: {err}", config.schema.document)
    })?;

    let mut document = Document::parse(&raw)?;
    model::framework::merge_into(&mut document);
    document.generate_paths();
    let document = Arc::new(document);

    log::info!(
        "loaded {} schema(s), {} route(s)",
        document.schemas.len(),
        document.paths.len()
    );

    let store: Arc<dyn EntityStore> = match config.storage.backend.as_str() {
        "postgres" => {
            let database_url = config.database_url()?;
            Arc::new(PostgresStore::new(document.clone(), &database_url).await?)
        }
        "file" => Arc::new(FileStore::new(document.clone(), &config.storage.data_dir)),
        other => anyhow::bail!("unknown storage backend {other:?}"),
    };

    store.connect().await?;

    if let Some(seed_file) = &config.schema.seed_file {
        let seed_data = seed::SeedData::load_from_file(seed_file)?;
        seed_data.apply(store.as_ref()).await?;
    }

    seed::ensure_admin(store.as_ref(), &document).await?;

    let registry = Arc::new(ConnectionRegistry::new());
    let dispatcher = Arc::new(Dispatcher::new(
        document.clone(),
        store.clone(),
        registry.clone(),
    ));

    let state = AppState {
        document,
        store,
        dispatcher,
        registry,
        jwt_secret,
        api_keys: config.auth.api_keys.clone(),
    };

    let router = create_router(state, &config.server.base_path);
    let address = config.server_address();

    log::info!("listening on {address}");
    let listener = tokio::net::TcpListener::bind(&address).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
