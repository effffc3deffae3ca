use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use domain::models::{RuntimeLevel, RuntimeState, WELL_KNOWN_LOCKS};
use domain::services::{JobCatalog, MainDom, ServerRoleClassifier, ServerRoleSettings, TopologyProbe};
use persistence::repositories::{JobDescriptorRepository, MainDomClaimRepository, ServerRegistrationRepository};
use persistence::{DatabaseElectionProbe, DistributedLockRepository, PgJobCatalog, ScopeProvider, SqlMainDomLock};

use farmhand_api::app::{create_app, AppState};
use farmhand_api::config::Config;
use farmhand_api::jobs::{register_jobs, JobDependencies, JobGate, JobScheduler, SchedulerSettings};
use farmhand_api::middleware::{init_logging, init_metrics};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::load()?;
    init_logging(&config.logging)?;
    init_metrics()?;

    info!("Starting farmhand v{}", env!("CARGO_PKG_VERSION"));
    let runtime = Arc::new(RuntimeState::new(RuntimeLevel::Boot));

    let db_config = persistence::db::DatabaseConfig::from(&config.database);
    let pool = match persistence::db::create_pool(&db_config).await {
        Ok(pool) => pool,
        Err(e) => {
            runtime.set_level(RuntimeLevel::BootFailed);
            return Err(e).context("Could not connect to the database");
        }
    };

    runtime.set_level(RuntimeLevel::Upgrade);
    info!("Running database migrations...");
    persistence::db::run_migrations(&pool).await?;
    let locks = DistributedLockRepository::new(pool.clone(), db_config.lock_timeout());
    let provisioned = persistence::bootstrap::provision_locks(&locks, WELL_KNOWN_LOCKS).await?;
    info!(provisioned, "Migrations completed");

    let scopes = ScopeProvider::new(pool.clone());
    let main_dom_lock = SqlMainDomLock::new(
        scopes.clone(),
        locks.clone(),
        MainDomClaimRepository::new(pool.clone()),
        config.main_dom.app_id.clone(),
        config.main_dom.poll_interval(),
    );
    let main_dom = Arc::new(MainDom::new(Arc::new(main_dom_lock), config.main_dom.claim_timeout()));
    if !main_dom.acquire().await {
        warn!("Running without main-dom; scheduled work stays idle");
    }

    let addr = config.socket_addr()?;
    let identity = match &config.farm.server_identity {
        Some(identity) => identity.clone(),
        None => {
            let host = hostname::get().context("Could not read hostname")?;
            format!("{}:{}", host.to_string_lossy(), addr.port())
        }
    };
    let servers = ServerRegistrationRepository::new(pool.clone());
    let probe = DatabaseElectionProbe::new(
        servers.clone(),
        identity.clone(),
        addr.to_string(),
        config.farm.registration_window(),
    );
    let role_settings = ServerRoleSettings {
        explicit_role: config.farm.explicit_role()?,
        load_balanced: config.farm.load_balanced,
    };
    let probe: &dyn TopologyProbe = &probe;
    let role = ServerRoleClassifier::resolve(&role_settings, Some(probe))
        .await
        .current_server_role();
    info!(role = %role, identity = %identity, "Server role resolved");

    let catalog: Arc<dyn JobCatalog> = Arc::new(PgJobCatalog::new(JobDescriptorRepository::new(pool.clone())));
    let gate = JobGate::new(role, main_dom.clone(), runtime.clone());
    let mut scheduler = JobScheduler::new(
        gate,
        catalog.clone(),
        SchedulerSettings {
            default_delay: config.scheduler_default_delay(),
            idle_recheck: config.idle_recheck(),
        },
    );
    let deps = JobDependencies {
        pool: pool.clone(),
        scopes,
        locks,
        servers: servers.clone(),
        identity: identity.clone(),
        address: addr.to_string(),
    };
    register_jobs(&mut scheduler, &config.jobs, &deps)?;

    runtime.set_level(RuntimeLevel::Run);
    scheduler.start().await;

    let config = Arc::new(config);
    let state = AppState {
        pool: pool.clone(),
        config: config.clone(),
        role,
        main_dom: main_dom.clone(),
        runtime: runtime.clone(),
        catalog,
        status: scheduler.status(),
    };
    let app = create_app(state);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown();
    scheduler.wait_for_shutdown(config.shutdown_grace()).await;

    if let Err(e) = servers.deregister(&identity).await {
        warn!(error = %e, "Could not remove server registration");
    }
    main_dom.release().await;
    pool.close().await;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Could not listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
