use crate::call::{CallConnector, CallStore, DedupWindow, MemoryCallStore, RoutingResolver};
use crate::config::Config;
use crate::directory::{create_directory, Directory};
use crate::notify::{create_push_sender, NotificationDispatcher, PushSender};
use crate::provider::{create_provider, token::AccessTokenIssuer, TelephonyProvider};
use anyhow::Result;
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, info, warn};

pub struct AppStateInner {
    pub config: Arc<Config>,
    pub token: CancellationToken,
    pub dedup: Arc<DedupWindow>,
    pub store: Arc<dyn CallStore>,
    pub directory: Arc<dyn Directory>,
    pub provider: Arc<dyn TelephonyProvider>,
    pub notifier: Option<Arc<NotificationDispatcher>>,
    pub resolver: RoutingResolver,
    pub connector: CallConnector,
    /// `None` when API key credentials are missing; `/token` answers 500.
    pub tokens: Option<AccessTokenIssuer>,
}

pub type AppState = Arc<AppStateInner>;

pub struct AppStateBuilder {
    pub config: Option<Config>,
    pub provider: Option<Arc<dyn TelephonyProvider>>,
    pub directory: Option<Arc<dyn Directory>>,
    pub push_sender: Option<Arc<dyn PushSender>>,
    pub store: Option<Arc<dyn CallStore>>,
}

impl AppStateInner {
    pub fn callback_url(&self, path: &str) -> String {
        self.config.callback_url(path)
    }
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            provider: None,
            directory: None,
            push_sender: None,
            store: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn TelephonyProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn push_sender(mut self, sender: Arc<dyn PushSender>) -> Self {
        self.push_sender = Some(sender);
        self
    }

    pub fn store(mut self, store: Arc<dyn CallStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<AppState> {
        let config = Arc::new(self.config.unwrap_or_default());
        let token = CancellationToken::new();

        let provider = match self.provider {
            Some(provider) => provider,
            None => create_provider(&config.provider)?,
        };
        let directory = match self.directory {
            Some(directory) => directory,
            None => create_directory(&config.directory)?,
        };
        let push_sender = match self.push_sender {
            Some(sender) => Some(sender),
            None => create_push_sender(&config.push)?,
        };
        let notifier = push_sender
            .map(|sender| Arc::new(NotificationDispatcher::new(directory.clone(), sender)));
        if notifier.is_none() {
            info!("push notifications disabled");
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryCallStore::new()));
        let tokens = match AccessTokenIssuer::from_config(&config.provider) {
            Ok(issuer) => Some(issuer),
            Err(e) => {
                warn!("access tokens disabled: {}", e);
                None
            }
        };

        Ok(Arc::new(AppStateInner {
            dedup: Arc::new(DedupWindow::from_config(&config.dedup)),
            resolver: RoutingResolver::new(directory.clone(), config.calls.greet_on_fallback),
            connector: CallConnector::new(
                store.clone(),
                notifier.clone(),
                &config.public_url,
                &config.calls,
            ),
            config,
            token,
            store,
            directory,
            provider,
            notifier,
            tokens,
        }))
    }
}

impl Default for AppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodically drops stale dedup entries and finished call records.
pub fn spawn_sweeper(state: AppState) -> tokio::task::JoinHandle<()> {
    let token = state.token.child_token();
    let interval = Duration::from_secs(state.config.dedup.sweep_interval_secs.max(1));
    let grace = Duration::from_secs(state.config.calls.record_grace_secs);
    let max_active = Duration::from_secs(state.config.calls.max_active_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let dedup = state.dedup.sweep(crate::get_timestamp());
                    let calls = state.store.purge_finished(grace, max_active);
                    if dedup > 0 || calls > 0 {
                        debug!(dedup, calls, remaining = state.store.count(), "sweep finished");
                    }
                }
            }
        }
    })
}

pub async fn run(state: AppState) -> Result<()> {
    let token = state.token.clone();

    let app = create_router(state.clone());
    let addr: SocketAddr = state.config.http_addr.parse()?;
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            return Err(anyhow::anyhow!("Failed to bind to {}: {}", addr, e));
        }
    };
    info!("listening on http://{}", addr);

    let sweeper = spawn_sweeper(state.clone());
    let http_task = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    select! {
        http_result = http_task => {
            match http_result {
                Ok(_) => info!("Server shut down gracefully"),
                Err(e) => {
                    tracing::error!("Server error: {}", e);
                    token.cancel();
                    return Err(anyhow::anyhow!("Server error: {}", e));
                }
            }
        }
        _ = token.cancelled() => {
            info!("Application shutting down due to cancellation");
        }
    }
    token.cancel();
    sweeper.await.ok();
    Ok(())
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
            axum::http::header::ACCEPT,
            axum::http::header::ORIGIN,
        ]);

    let skip_paths = Arc::new(state.config.access_log_skip_paths.clone());
    crate::handler::router(state)
        .layer(middleware::from_fn_with_state(
            skip_paths,
            crate::handler::middleware::request_log::log_requests,
        ))
        .layer(cors)
}
