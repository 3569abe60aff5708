//! Tracker - device location tracking service
//!
//! Keeps a live view of registered tracking devices, sourcing positions and
//! geofences from a realtime push channel with a polling REST API as
//! fallback, and exposes the user-facing actions over a JSON control API.

pub mod api;
pub mod config;
pub mod control_api;
pub mod error;
pub mod fake;
pub mod firebase;
pub mod io;
pub mod model;
pub mod notifier;
pub mod preference;
pub mod realtime;
pub mod reconcile;
pub mod record;
pub mod registration;
pub mod session;
pub mod state;
pub mod synchronizer;

pub use config::{load_config, Config};
pub use error::{Result, TrackerError};
pub use session::Session;
pub use synchronizer::Synchronizer;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::api::ApiClient;
use crate::firebase::FirebaseChannel;
use crate::io::ReqwestHttpClient;
use crate::notifier::LogNotifier;
use crate::preference::{JsonFilePreferenceStore, MemoryPreferenceStore, PreferenceStore};
use crate::state::StateHandle;

/// Wire the production collaborators described by `config`
pub fn build_synchronizer(config: &Config, state: StateHandle) -> Result<Synchronizer> {
    let http: Arc<dyn io::HttpClient> = Arc::new(ReqwestHttpClient::new());

    let preferences: Arc<dyn PreferenceStore> = match &config.sync.preferences_path {
        Some(path) => Arc::new(JsonFilePreferenceStore::open(path)?),
        None => Arc::new(MemoryPreferenceStore::new()),
    };

    let realtime = Arc::new(FirebaseChannel::new(&config.realtime, Arc::clone(&http)));
    let polling = Arc::new(ApiClient::new(&config.api, Arc::clone(&http)));

    Ok(
        Synchronizer::new(realtime, polling, preferences, state)
            .with_notifier(Arc::new(LogNotifier))
            .with_customer(config.api.customer_id.clone()),
    )
}

/// Run the tracker service with the given configuration
pub async fn run(config: Config) -> Result<()> {
    let cancel = CancellationToken::new();
    let state = state::new_state_handle(config.control.history_size);
    let sync = Arc::new(build_synchronizer(&config, Arc::clone(&state))?);
    let session = Arc::new(Mutex::new(Session::new(
        Arc::clone(&sync),
        config.sync.polling_interval(),
    )));

    // Initial device list; failures were already surfaced as notifications
    if let Err(e) = session.lock().await.load().await {
        tracing::warn!("Initial device load failed: {}", e);
    }

    // Setup shutdown handler
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
        }
        tracing::info!("Shutdown signal received");
        cancel_for_signal.cancel();
    });

    // Start control API if enabled
    if config.control.enabled {
        let control_port = config.control.port;
        let router = control_api::build_router(Arc::clone(&sync), Arc::clone(&session));
        let cancel_for_control = cancel.clone();

        tokio::spawn(async move {
            let addr = SocketAddr::from(([0, 0, 0, 0], control_port));
            tracing::info!("Control API listening on http://{}", addr);

            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(e) => {
                    tracing::error!(
                        "Failed to bind control API to port {}: {}. Continuing without it.",
                        control_port,
                        e
                    );
                    return;
                }
            };

            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    cancel_for_control.cancelled().await;
                })
                .await
                .ok();

            tracing::debug!("Control API stopped");
        });
    }

    tracing::info!("Tracker started");

    cancel.cancelled().await;

    session.lock().await.shutdown().await;
    tracing::info!("Tracker stopped");

    Ok(())
}
