//! Process entry point: load configuration, bring up logging and the
//! Postgres pool, start the symbol registry's refresh loop, bring up the
//! per-symbol matching engines, start the settlement consumer, and serve
//! the internal clearing/withdraw RPC surface until a shutdown signal
//! arrives.

use std::sync::Arc;
use std::time::Duration;

use exchange_core::clearing::rpc::{self, RpcState};
use exchange_core::clearing::{ClearingService, Ledger, PostgresBalanceStore};
use exchange_core::config::AppConfig;
use exchange_core::db::Database;
use exchange_core::deposit::service::NetworkConfig;
use exchange_core::deposit::DepositService;
use exchange_core::logging::init_logging;
use exchange_core::matching::{Command, EngineRouter};
use exchange_core::settlement::consumer::SettlementConsumer;
use exchange_core::settlement::stream::{EventStream, RedisEventStream};
use exchange_core::symbol::SymbolRegistry;
use exchange_core::withdraw::rpc::{self as withdraw_rpc, WithdrawRpcState};
use exchange_core::withdraw::WithdrawService;

const ORDER_STREAM: &str = "exchange:orders";
const EVENT_STREAM: &str = "exchange:events";
const ORDER_INTAKE_GROUP: &str = "matching-intake";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().unwrap_or_else(|err| {
        eprintln!("config load failed, falling back to defaults: {err}");
        AppConfig::default()
    });
    let _log_guard = init_logging(&config);
    let git_hash = option_env!("GIT_HASH").unwrap_or("unknown");
    tracing::info!(git_hash, "starting exchange-core");

    let db = Database::connect(&config.database_url, config.database_max_connections).await?;
    let pool = db.pool().clone();

    let symbol_registry = SymbolRegistry::empty();
    let loaded_symbols = SymbolRegistry::load_from_db(&pool).await?;
    tracing::info!(count = loaded_symbols.len(), "loaded symbol configs");
    let symbol_ids: Vec<_> = loaded_symbols.keys().copied().collect();
    symbol_registry.replace(loaded_symbols).await;
    tokio::spawn(symbol_registry.clone().watch(pool.clone(), Duration::from_secs(30)));

    let balance_store = Arc::new(PostgresBalanceStore::new(pool.clone()));
    let ledger = Arc::new(Ledger::new(pool.clone()));
    let clearing = Arc::new(ClearingService::new(pool.clone(), balance_store, ledger));

    let withdraw_service = Arc::new(WithdrawService::new(
        pool.clone(),
        clearing.clone(),
        config.withdraw_min_default as i64,
        config.withdraw_daily_cap_default as i64,
    ));

    let deposit_service = Arc::new(DepositService::new(pool.clone(), clearing.clone(), Vec::<NetworkConfig>::new()));
    let _ = deposit_service; // wired into a chain-specific scanner loop per deployment

    let router = EngineRouter::new(config.engine_inbox_capacity, config.engine_outbox_capacity);
    for symbol_id in symbol_ids {
        router.ensure_started(symbol_id);
    }

    let event_stream = Arc::new(RedisEventStream::connect(&config.redis_url).await?);
    spawn_event_publisher(router.clone(), event_stream.clone());
    spawn_order_intake(router.clone(), event_stream.clone());

    let consumer = Arc::new(SettlementConsumer::new(
        event_stream,
        clearing.clone(),
        symbol_registry.clone(),
        EVENT_STREAM,
        config.settlement_consumer_group.clone(),
        format!("consumer-{}", std::process::id()),
        config.settlement_claim_idle_secs as i64,
        config.settlement_dlq_retry_threshold as i64,
    ));
    tokio::spawn(consumer.run());

    let rpc_state = RpcState { clearing: clearing.clone(), internal_token: Arc::from(config.internal_rpc_token.as_str()) };
    let withdraw_state = WithdrawRpcState { service: withdraw_service };

    let app = rpc::router(rpc_state).merge(withdraw_rpc::router(withdraw_state));
    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
    tracing::info!(addr = %listener.local_addr()?, "internal RPC server listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    router.shutdown();
    tracing::info!("shutdown complete");
    Ok(())
}

/// Drains the router's shared outbox onto the durable event stream,
/// preserving the per-symbol event order the matching loops produce.
fn spawn_event_publisher(router: EngineRouter, stream: Arc<RedisEventStream>) {
    let outbox = router.outbox();
    tokio::task::spawn_blocking(move || {
        while let Ok(event) = outbox.recv() {
            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::error!(error = %err, "failed to serialize event");
                    continue;
                }
            };
            let stream = stream.clone();
            let handle = tokio::runtime::Handle::current();
            handle.block_on(async {
                if let Err(err) = stream.publish(EVENT_STREAM, &payload).await {
                    tracing::error!(error = %err, "failed to publish event to stream");
                }
            });
        }
    });
}

/// Reads gateway-submitted commands off `exchange:orders` and hands each one
/// to its symbol's matching loop, acking only once `submit` has accepted it.
fn spawn_order_intake(router: EngineRouter, stream: Arc<RedisEventStream>) {
    let consumer_name = format!("intake-{}", std::process::id());
    tokio::spawn(async move {
        if let Err(err) = stream.ensure_group(ORDER_STREAM, ORDER_INTAKE_GROUP).await {
            tracing::error!(error = %err, "failed to create order intake consumer group");
            return;
        }

        loop {
            let messages = match stream.read_group(ORDER_STREAM, ORDER_INTAKE_GROUP, &consumer_name, 64).await {
                Ok(messages) => messages,
                Err(err) => {
                    tracing::error!(error = %err, "failed to read order intake stream");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                }
            };

            if messages.is_empty() {
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            }

            for message in messages {
                let command: Command = match serde_json::from_str(&message.payload) {
                    Ok(command) => command,
                    Err(err) => {
                        tracing::warn!(error = %err, id = %message.id, "dropping malformed order command");
                        let _ = stream.ack(ORDER_STREAM, ORDER_INTAKE_GROUP, &message.id).await;
                        continue;
                    }
                };

                match router.submit(command) {
                    Ok(()) => {
                        if let Err(err) = stream.ack(ORDER_STREAM, ORDER_INTAKE_GROUP, &message.id).await {
                            tracing::error!(error = %err, id = %message.id, "failed to ack order command");
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, id = %message.id, "failed to submit order command, leaving pending for retry");
                    }
                }
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to listen for ctrl_c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
