//! Walk through the cache tiers with an in-memory store
//!
//! Run with `RUST_LOG=doc_cache=debug cargo run --example session_cache_demo`
//! to see every hit, miss, promotion and commit.

use doc_cache::{
    start_auto_cleanup, CacheCoordinator, CacheError, Document, EntityClient, MemoryStore,
    SharedCache, SharedCacheConfig, TransactionError, UnitOfWork,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "doc_cache=info,session_cache_demo=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SharedCacheConfig::from_env()?;
    let shared = Arc::new(SharedCache::try_new(config)?);
    let sweeper = start_auto_cleanup(&shared);

    let store = Arc::new(MemoryStore::new());
    let client = EntityClient::new(store.clone(), CacheCoordinator::new(shared.clone()));

    let car = Document::new("cars", "MyCar")
        .with_field("make", "Toyota")
        .with_field("year", 2020);

    // Request 1: create, then read back from its own session
    let request = UnitOfWork::new();
    client.create(&request, &car).await?;
    let hit = client.coordinator().read(&request, &car)?;
    info!("Request 1 read {} from the {:?} tier", car.id.as_deref().unwrap_or("?"), hit.tier);

    // Request 2: answered by the shared tier, then by its own session
    let request = UnitOfWork::new();
    let first = client.coordinator().read(&request, &car)?;
    let second = client.coordinator().read(&request, &car)?;
    info!("Request 2 tiers: {:?} then {:?}", first.tier, second.tier);

    // Request 3: a failed transaction leaves nothing behind
    let request = UnitOfWork::new();
    let result: Result<(), TransactionError<CacheError>> = client
        .transaction(&request, |tx| {
            let client = client.clone();
            async move {
                let jeep = Document::new("cars", "Jeep").with_field("make", "Jeep");
                client.create(&tx, &jeep).await?;
                Err(CacheError::Config("changed my mind".to_string()))
            }
        })
        .await;
    info!("Transaction outcome: {:?}", result.map_err(|e| e.to_string()));

    // Request 4: a missing document is remembered as absent
    let ghost = Document::new("cars", "Ghost");
    let request = UnitOfWork::new();
    let found = client.get(&request, &ghost).await?;
    let again = client.get(&UnitOfWork::new(), &ghost).await?;
    info!(
        "Ghost found: {} / {} ({} store fetches)",
        found.is_some(),
        again.is_some(),
        store.fetch_count()
    );

    println!("{}", shared.stats());
    println!("Store documents: {}", store.len().await);

    if let Some(sweeper) = sweeper {
        sweeper.shutdown().await;
    }
    Ok(())
}
