//! schedule-sync server entry point.
//!
//! Wires the stores, starts the task worker and the periodic jobs, then
//! serves the REST API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use schedule_sync::api;
use schedule_sync::app_state::AppState;
use schedule_sync::cache::{Cache, CacheKeys, MemoryCache, PostgresCache, ShardSelector};
use schedule_sync::config::BackendConfig;
use schedule_sync::persistence::{Datastore, MemoryStore, PostgresStore};
use schedule_sync::push::{NotificationBuilder, PushTransport, WebPushTransport};
use schedule_sync::queue::WorkQueue;
use schedule_sync::service::{
    ClockService, EventDataService, NotifyService, SyncService, WipeoutService,
};
use schedule_sync::upstream::{HttpManifestSource, ManifestSource};
use schedule_sync::users::{FirebaseUserStore, UserStore};
use schedule_sync::worker::{Scheduler, Worker};

const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

type Backends = (Arc<dyn Datastore>, Arc<dyn WorkQueue>, Arc<dyn Cache>);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BackendConfig::from_env().map_err(|e| anyhow::anyhow!("config: {e}"))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    tracing::info!(addr = %config.listen_addr, "starting schedule-sync");

    // Store and queue share one backend so a commit can enqueue atomically.
    // The cache lives there too so the sync guard spans instances.
    let (store, queue, cache): Backends = if config.persistence_enabled {
        let pg = Arc::new(
            PostgresStore::connect(
                &config.database_url,
                config.database_max_connections,
                config.database_min_connections,
                Duration::from_secs(config.database_connect_timeout_secs),
            )
            .await
            .context("connecting to postgres")?,
        );
        let cache = Arc::new(PostgresCache::new(pg.pool().clone()));
        (
            Arc::clone(&pg) as Arc<dyn Datastore>,
            pg as Arc<dyn WorkQueue>,
            cache as Arc<dyn Cache>,
        )
    } else {
        tracing::warn!("persistence disabled, in-memory store and cache, single instance only");
        let mem = Arc::new(MemoryStore::new());
        (
            Arc::clone(&mem) as Arc<dyn Datastore>,
            mem as Arc<dyn WorkQueue>,
            Arc::new(MemoryCache::new()) as Arc<dyn Cache>,
        )
    };

    let keys = CacheKeys::new(
        "EventData",
        config.cache_shards,
        &ShardSelector::new(config.cache_shard_seed.clone()),
    );
    let events = EventDataService::new(
        store,
        Arc::clone(&cache),
        keys,
        Duration::from_secs(config.snapshot_cache_ttl_secs),
    );

    let source: Arc<dyn ManifestSource> = Arc::new(
        HttpManifestSource::new(
            config.manifest_url.clone(),
            config.utc_offset(),
            OUTBOUND_TIMEOUT,
        )
        .context("building manifest client")?,
    );
    let users: Arc<dyn UserStore> = Arc::new(
        FirebaseUserStore::new(
            config.firebase_shards.clone(),
            config.firebase_secret.clone(),
            OUTBOUND_TIMEOUT,
        )
        .context("building user store client")?,
    );
    let transport: Arc<dyn PushTransport> = Arc::new(
        WebPushTransport::new(
            config.push_gcm_endpoint.clone(),
            config.push_gcm_key.clone(),
            config.push_ttl_secs,
            OUTBOUND_TIMEOUT,
        )
        .context("building push client")?,
    );

    let sync = SyncService::new(
        events.clone(),
        cache,
        source,
        config.sync_token.clone(),
        Duration::from_secs(config.sync_guard_ttl_secs),
    );
    let clock = ClockService::new(events.clone(), config.clock_windows());
    let wipeout = WipeoutService::new(Arc::clone(&users));
    let notify = NotifyService::new(
        users,
        transport,
        Arc::clone(&queue),
        NotificationBuilder::new(config.event_name.clone()),
    );

    Worker::new(queue, notify, config.worker()).spawn();
    let jobs = Scheduler::new(sync.clone(), clock.clone(), wipeout.clone(), config.intervals())
        .spawn();
    tracing::info!(jobs = jobs.len(), "periodic jobs started");

    if config.trust_scheduler_headers {
        tracing::warn!("trusting scheduler headers without a token");
    }
    let app_state = AppState {
        events,
        sync,
        clock,
        wipeout,
        trust_scheduler_headers: config.trust_scheduler_headers,
    };

    let app = api::build_router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
