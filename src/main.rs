//! Message Event Bus server.
//!
//! Loads configuration from the environment, brings the bus up and serves
//! the `/eventbus` API until Ctrl-C, then shuts the bus down in order.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use message_event_bus::adapters::destinations::DestinationFactory;
use message_event_bus::adapters::http::app_router;
use message_event_bus::adapters::identity::StaticInstanceOwner;
use message_event_bus::adapters::pubsub::RedisTransport;
use message_event_bus::adapters::storage::{
    FileDestinationRepository, InMemoryDestinationRepository, InMemoryExecutionRepository,
};
use message_event_bus::adapters::store::{FileEventStore, InMemoryEventStore};
use message_event_bus::application::{ContextParts, EventBusContext, RelaySetup};
use message_event_bus::config::{AppConfig, ServerConfig};
use message_event_bus::ports::{DestinationRepository, EventStore};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = AppConfig::load()?;
    config.validate()?;
    init_tracing(&config.server);

    let context = Arc::new(build_context(&config).await?);

    let addr = config.server.socket_addr()?;
    let app = app_router(context.clone(), config.server.request_timeout());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, environment = config.server.environment.as_str(), "Event bus API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    context.shutdown().await?;
    Ok(())
}

fn init_tracing(server: &ServerConfig) {
    let filter = EnvFilter::try_new(&server.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    if server.json_logs() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn build_context(config: &AppConfig) -> Result<EventBusContext, BoxError> {
    let store: Arc<dyn EventStore> = match &config.store.log_dir {
        Some(dir) => Arc::new(
            FileEventStore::open(dir, &config.store.file_name, config.store.file_config()).await?,
        ),
        None => Arc::new(InMemoryEventStore::with_max_entries(config.store.max_entries)),
    };

    let destinations: Arc<dyn DestinationRepository> = match &config.destinations_dir {
        Some(dir) => Arc::new(FileDestinationRepository::new(dir)),
        None => Arc::new(InMemoryDestinationRepository::new()),
    };

    let owner = Arc::new(StaticInstanceOwner::new(
        config.deployment.owner_id.clone(),
        config.deployment.owner_email.clone(),
    ));
    let factory = DestinationFactory::new(
        reqwest::Client::builder()
            .user_agent(concat!("n8n-event-bus/", env!("CARGO_PKG_VERSION")))
            .build()?,
        config
            .deployment
            .info(config.server.environment.as_str()),
        owner,
    );

    let relay = match &config.redis {
        Some(redis) => Some(RelaySetup {
            transport: Arc::new(RedisTransport::new(&redis.url)?),
            bridge: redis.bridge_config(),
            mode: redis.mode,
            instance_id: redis.worker_id.clone(),
        }),
        None => None,
    };

    let context = EventBusContext::initialize(ContextParts {
        store,
        destinations,
        executions: Arc::new(InMemoryExecutionRepository::new()),
        factory,
        delivery: config.delivery.settings(),
        recover_on_start: config.delivery.recover_on_start,
        relay,
    })
    .await?;
    Ok(context)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
