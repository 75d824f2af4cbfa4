mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use parley_api::auth::{AppState, AppStateInner};
use parley_db::Database;
use parley_gateway::connection::{self, ChannelAccess};
use parley_gateway::dispatcher::Dispatcher;
use parley_sync::EmbeddedStore;

use crate::config::ServerConfig;

#[derive(Clone)]
struct ServerState {
    dispatcher: Dispatcher,
    jwt_secret: String,
    access: Arc<dyn ChannelAccess>,
}

/// Gateway subscriptions: members may follow any channel, everyone else
/// only public ones.
struct MembershipAccess {
    db: Arc<Database>,
}

impl ChannelAccess for MembershipAccess {
    fn can_read(&self, user_id: Uuid, channel_id: Uuid) -> bool {
        let channel = channel_id.to_string();
        match self.db.get_membership(&channel, &user_id.to_string()) {
            Ok(Some(_)) => return true,
            Ok(None) => {}
            Err(e) => {
                warn!("Membership lookup for {} failed: {}", channel, e);
                return false;
            }
        }
        match self.db.get_channel_by_id(&channel) {
            Ok(Some(row)) => !row.is_private,
            Ok(None) => false,
            Err(e) => {
                warn!("Channel lookup for {} failed: {}", channel, e);
                false
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("PARLEY_LOG")
                .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // Init store and change feed
    let store = Arc::new(EmbeddedStore::open(&config.db_path)?);

    let app_state: AppState = Arc::new(AppStateInner {
        store: store.clone(),
        jwt_secret: config.jwt_secret.clone(),
        config: config.sync.clone(),
    });

    let state = ServerState {
        dispatcher: store.dispatcher().clone(),
        jwt_secret: config.jwt_secret.clone(),
        access: Arc::new(MembershipAccess {
            db: store.database().clone(),
        }),
    };

    // Routes
    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = parley_api::router(app_state)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(
    State(state): State<ServerState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher, state.jwt_secret, state.access)
    })
}
