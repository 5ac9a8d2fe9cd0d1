use game_ledger::{ AppError, Config, Result };
use game_ledger::pipelines::{
    self,
    BetPipeline,
    ClaimPipeline,
    CreditPipeline,
    DepositPipeline,
    PipelineContext,
    RedeemPipeline,
};
use game_ledger::providers::SettlementChain;
use game_ledger::queue::{ JobOptions, JobQueue, GAS_QUEUE, SETTLEMENT_QUEUE };
use game_ledger::services::{ gas_reload_service, DbNotifier, GasReloadService, Notifier, SettlementAdapter };
use migration::MigratorTrait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{ layer::SubscriberExt, util::SubscriberInitExt };

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber
        ::registry()
        .with(
            tracing_subscriber::EnvFilter
                ::try_from_default_env()
                .unwrap_or_else(|_| "game_ledger=debug,tower_http=debug".into())
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env().map_err(|e| AppError::Config(e.to_string()))?;

    tracing::info!("Starting game-ledger with network mode: {:?}", config.network_mode);

    // Initialize database connection
    let db = sea_orm::Database::connect(&config.database_url).await.map_err(AppError::Database)?;

    tracing::info!("Database connected successfully");

    // Run migrations
    migration::Migrator::up(&db, None).await.map_err(AppError::Database)?;

    tracing::info!("Migrations completed successfully");

    // Custody keys and chain access
    let encryptor = Arc::new(game_ledger::crypto::Encryptor::new(&config.encryption_key)?);
    let custody = Arc::new(game_ledger::db::CustodyKeyRepository::new(db.clone(), encryptor));

    let chain: Arc<dyn SettlementChain> = Arc::new(game_ledger::rpc::RpcManager::new(&config.chain)?);
    tracing::info!("RPC manager initialized");

    // Job queue
    let settlement = config.settlement.clone();
    let store = Arc::new(game_ledger::db::SeaOrmJobStore::new(db.clone()));
    let queue = Arc::new(
        JobQueue::new(store, JobOptions {
            attempts: settlement.job_attempts,
            backoff: settlement.job_backoff,
            delay: Duration::ZERO,
        }).with_heartbeat(settlement.job_heartbeat)
    );

    let notifier: Arc<dyn Notifier> = Arc::new(DbNotifier::new(db.clone()));
    let adapter = Arc::new(
        SettlementAdapter::new(chain, custody.clone(), queue.clone(), config.chain.clone())
    );

    // Pipelines
    let ctx = Arc::new(
        PipelineContext::new(db.clone(), adapter.clone(), queue.clone(), notifier.clone(), settlement.clone())
    );
    let deposits = Arc::new(DepositPipeline::new(ctx.clone()));
    let bets = Arc::new(BetPipeline::new(ctx.clone()));
    let claims = Arc::new(ClaimPipeline::new(ctx.clone()));
    let redeems = Arc::new(RedeemPipeline::new(ctx.clone()));
    let credits = Arc::new(CreditPipeline::new(ctx.clone()));
    let reconciler = Arc::new(game_ledger::reconciler::Reconciler::new(ctx.clone()));

    queue.register_handler(SETTLEMENT_QUEUE, pipelines::SUBMIT_BET_JOB, bets.clone()).await;
    queue.register_handler(SETTLEMENT_QUEUE, pipelines::SUBMIT_CLAIM_JOB, claims.clone()).await;
    queue.register_handler(SETTLEMENT_QUEUE, pipelines::PROCESS_REDEEM_JOB, redeems.clone()).await;
    queue.register_handler(SETTLEMENT_QUEUE, pipelines::PROCESS_PAYOUT_JOB, redeems.clone()).await;
    queue.register_handler(SETTLEMENT_QUEUE, pipelines::MINT_CREDIT_JOB, credits.clone()).await;
    queue.register_handler(SETTLEMENT_QUEUE, pipelines::REVOKE_CREDIT_JOB, credits.clone()).await;
    queue.register_handler(
        GAS_QUEUE,
        gas_reload_service::RELOAD_GAS_JOB,
        Arc::new(GasReloadService::new(adapter.clone(), notifier.clone()))
    ).await;

    // Background work
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut workers = queue
        .clone()
        .start(settlement.worker_concurrency, Duration::from_millis(500), shutdown_rx.clone());

    let scheduler = game_ledger::scheduler::Scheduler::new(
        deposits.clone(),
        redeems.clone(),
        credits.clone(),
        reconciler,
        settlement.clone()
    );
    workers.extend(scheduler.start(shutdown_rx));

    // Create app state
    let app_state = game_ledger::api::AppState {
        users: ctx.users.clone(),
        custody,
        ledger: ctx.ledger.clone(),
        deposits,
        bets,
        claims,
        redeems,
        credits,
    };

    let app = game_ledger::api::router(app_state);

    // Start server
    let addr = format!("{}:{}", config.server_host, config.server_port);
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener
        ::bind(&addr).await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    axum
        ::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        }).await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    // Stop workers and sweeps, letting in-flight runs finish
    let _ = shutdown_tx.send(true);
    for handle in workers {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
