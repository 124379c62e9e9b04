use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use hub_config::{HubConfig, Kek};
use hub_domain::{
    BillingStatus, FeatureTier, InstanceId, InstanceStatus, OwnerId, Snowflake, UserCountTier,
};
use hub_driver::{
    CaddyProxyManager, DockerEngine, Drivers, HttpDnsProvider, HttpInstanceNotifier,
    MinioObjectStore, PgDatabaseProvisioner,
};
use hub_pipeline::{Reconciler, WorkerLoop};
use hub_store::{InstanceBilling, ManagedInstance, PostgresStore, StateStore};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::TierArg;
use crate::output;

/// The hub process itself generates IDs on a reserved infrastructure
/// worker ID; 11+ belong to instances.
const HUB_WORKER_ID: u16 = 0;

fn load_config(config_path: Option<&Path>) -> Result<Arc<HubConfig>> {
    let config = match config_path {
        Some(path) => HubConfig::load_from(path),
        None => HubConfig::load(),
    }
    .context("loading hub configuration")?;
    Ok(Arc::new(config))
}

async fn connect_store(config: &HubConfig) -> Result<Arc<PostgresStore>> {
    let store = PostgresStore::connect(&config.database_url)
        .await
        .context("connecting to the hub database")?;
    Ok(Arc::new(store))
}

// ── Run ───────────────────────────────────────────────────────────────────────

pub async fn run(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;

    // Bootstrap failures are fatal by design: a worker without its KEK or
    // store cannot do anything safely.
    let kek = Arc::new(
        Kek::from_file(Path::new(&config.kek_path)).context("loading KEK file")?,
    );
    let store = connect_store(&config).await?;
    let database = PgDatabaseProvisioner::connect(&config.maintenance_database_url)
        .await
        .context("connecting to the maintenance database")?;

    let drivers = Drivers {
        engine: Arc::new(DockerEngine::new(config.engine_endpoint.clone())),
        dns: Arc::new(HttpDnsProvider::new(
            config.dns_endpoint.clone(),
            config.dns_zone_id.clone(),
            config.dns_api_token.clone(),
        )),
        proxy: Arc::new(CaddyProxyManager::new(
            config.proxy_endpoint.clone(),
            config.proxy_server.clone(),
        )),
        object_store: Arc::new(MinioObjectStore::new(
            config.object_store.endpoint.clone(),
            config.object_store.admin_endpoint.clone(),
            config.object_store.admin_access_key.clone(),
            config.object_store.admin_secret_key.clone(),
            config.object_store.region.clone(),
        )),
        notifier: Arc::new(HttpInstanceNotifier::new()),
        database: Arc::new(database),
    };

    let ids = Arc::new(Snowflake::new(HUB_WORKER_ID).context("initialising id generator")?);
    let cancel = CancellationToken::new();
    let store_dyn: Arc<dyn StateStore> = store.clone();

    let worker = WorkerLoop::new(
        store_dyn.clone(),
        drivers.clone(),
        config.clone(),
        kek.clone(),
        ids.clone(),
    );
    let reconciler = Reconciler::new(store_dyn.clone(), drivers, config.clone(), ids);

    let worker_cancel = cancel.clone();
    let worker_handle = tokio::spawn(async move { worker.run(worker_cancel).await });
    let reconciler_cancel = cancel.clone();
    let reconciler_handle =
        tokio::spawn(async move { reconciler.run(reconciler_cancel).await });

    let app = hub_api::build_app(store_dyn);
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "health/metrics endpoint listening");

    let shutdown_cancel = cancel.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown_cancel.cancelled().await });

    tokio::select! {
        result = server => result.context("http server")?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    cancel.cancel();
    let _ = worker_handle.await;
    let _ = reconciler_handle.await;
    Ok(())
}

// ── Status ────────────────────────────────────────────────────────────────────

pub async fn status(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let store = connect_store(&config).await?;
    let instances = store.list_instances().await?;
    print!("{}", output::render_instances(&instances));
    Ok(())
}

// ── Events ────────────────────────────────────────────────────────────────────

pub async fn events(config_path: Option<&Path>, instance_id: i64) -> Result<()> {
    let config = load_config(config_path)?;
    let store = connect_store(&config).await?;
    let events = store.list_events(InstanceId::new(instance_id)).await?;
    if events.is_empty() {
        println!("No events for instance {instance_id}.");
        return Ok(());
    }
    print!("{}", output::render_events(&events));
    Ok(())
}

// ── Provision ─────────────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
pub async fn provision(
    config_path: Option<&Path>,
    subdomain: String,
    owner: i64,
    name: Option<String>,
    tier: TierArg,
    max_users: u32,
    hd: bool,
) -> Result<()> {
    hub_domain::validate_subdomain(&subdomain).context("invalid subdomain")?;
    let feature_tier = match tier {
        TierArg::Chat => FeatureTier::Chat,
        TierArg::Audio => FeatureTier::Audio,
        TierArg::Video => FeatureTier::Video,
    };
    let user_count_tier =
        UserCountTier::from_max_users(max_users).context("invalid user-count tier")?;

    let config = load_config(config_path)?;
    let store = connect_store(&config).await?;
    let ids = Snowflake::new(HUB_WORKER_ID)?;

    let instance = ManagedInstance {
        id: InstanceId::new(ids.next_id()),
        owner_id: OwnerId::new(owner),
        domain: config.instance_domain(&subdomain),
        display_name: name.unwrap_or_else(|| subdomain.clone()),
        // Enqueue is a status transition; the worker picks it up from here.
        status: InstanceStatus::Provisioning,
        worker_id: None,
        created_at: Utc::now(),
        deleted_at: None,
    };
    store.insert_instance(&instance).await?;
    store
        .upsert_billing(&InstanceBilling {
            id: ids.next_id(),
            instance_id: instance.id,
            feature_tier,
            user_count_tier,
            hd_upgrade: hd,
            status: BillingStatus::Active,
            period_end: None,
            subscription_ref: None,
            price_ref: None,
        })
        .await?;

    println!("Enqueued instance {} ({})", instance.id, instance.domain);
    Ok(())
}

// ── Destroy ───────────────────────────────────────────────────────────────────

pub async fn destroy(config_path: Option<&Path>, instance_id: i64) -> Result<()> {
    let config = load_config(config_path)?;
    let store = connect_store(&config).await?;
    let id = InstanceId::new(instance_id);

    let instance = store
        .get_instance(id)
        .await?
        .with_context(|| format!("instance {instance_id} not found"))?;
    if instance.status == InstanceStatus::Destroyed {
        anyhow::bail!("instance {instance_id} is already destroyed");
    }

    store.update_instance_status(id, InstanceStatus::Destroying).await?;
    println!("Enqueued destruction of instance {} ({})", id, instance.domain);
    Ok(())
}
