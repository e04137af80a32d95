// Arkade Balance Ledger Server
// Off-chain chip/token economy for the arcade portal, backed by Postgres
// with read-only Over Protocol chain queries.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use arkade_ledger::http::{self, AppState};
use arkade_ledger::store::{LedgerStore, MemStore, PgStore};
use arkade_ledger::{BalanceCache, Ledger, OverRpc, WalletAddress};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("arkade_ledger=info".parse()?)
                .add_directive("sqlx=warn".parse()?),
        )
        .init();

    info!("Starting Arkade Balance Ledger");

    // Load configuration
    let database_url = std::env::var("DATABASE_URL").ok();
    let rpc_url = std::env::var("OVER_RPC_URL")
        .unwrap_or_else(|_| arkade_ledger::chain::DEFAULT_RPC_URL.to_string());
    let admin_wallets = parse_admin_wallets(std::env::var("ADMIN_WALLETS").ok().as_deref())?;
    let server_port = std::env::var("PORT")
        .unwrap_or_else(|_| "4000".to_string())
        .parse::<u16>()?;

    info!("Configuration:");
    info!("  Over RPC: {}", rpc_url);
    info!("  Admin wallets: {}", admin_wallets.len());
    info!("  Server Port: {}", server_port);

    // Initialize storage
    let store: Arc<dyn LedgerStore> = match database_url {
        Some(url) => {
            info!("Using Postgres storage");
            Arc::new(PgStore::init(&url).await?)
        }
        None => {
            warn!("DATABASE_URL not set, falling back to in-memory storage");
            Arc::new(MemStore::new())
        }
    };

    let ledger = Ledger::new(store);
    let cache = Arc::new(BalanceCache::default());

    // Keep the display cache in sync with ledger mutations
    let follower = cache.clone();
    let events = ledger.subscribe();
    tokio::spawn(async move {
        follower.follow(events).await;
    });

    let state = Arc::new(AppState {
        ledger,
        cache,
        chain: OverRpc::new(rpc_url),
        admin_wallets,
    });

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = http::router(state).layer(cors);

    // Start server
    let addr = format!("0.0.0.0:{}", server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Balance ledger listening on {}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))
}

fn parse_admin_wallets(raw: Option<&str>) -> Result<HashSet<WalletAddress>> {
    let mut wallets = HashSet::new();
    if let Some(raw) = raw {
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let wallet = WalletAddress::parse(part)
                .map_err(|e| anyhow::anyhow!("bad ADMIN_WALLETS entry: {e}"))?;
            wallets.insert(wallet);
        }
    }
    Ok(wallets)
}
