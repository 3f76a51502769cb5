use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    config::Config,
    error::AppResult,
    services::{
        ingestor::DEFAULT_IDLE_TIMEOUT,
        providers::{MetadataProvider, TmdbProvider},
        ContinueWatchingFeed, IngestSession, MetadataReconciler, PlayerMessageBus, ProgressStore,
        ResumeResolver,
    },
    storage::{FileStorage, StorageBackend},
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: ProgressStore,
    pub provider: Arc<dyn MetadataProvider>,
    pub resolver: ResumeResolver,
    pub feed: Arc<ContinueWatchingFeed>,
    pub bus: PlayerMessageBus,
    pub image_base_url: String,
    pub player_base_url: String,
    pub session_idle_timeout: Duration,
    pub inner: Arc<RwLock<AppStateInner>>,
}

/// Inner state that can be modified
pub struct AppStateInner {
    /// Open playback views, each with its own ingest subscription
    pub sessions: HashMap<Uuid, IngestSession>,
}

impl AppState {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        provider: Arc<dyn MetadataProvider>,
        image_base_url: String,
        player_base_url: String,
    ) -> Self {
        let store = ProgressStore::new(backend);
        let feed = ContinueWatchingFeed::new(
            store.clone(),
            MetadataReconciler::new(provider.clone()),
            image_base_url.clone(),
        );

        Self {
            resolver: ResumeResolver::new(store.clone()),
            store,
            provider,
            feed: Arc::new(feed),
            bus: PlayerMessageBus::new(),
            image_base_url,
            player_base_url,
            session_idle_timeout: DEFAULT_IDLE_TIMEOUT,
            inner: Arc::new(RwLock::new(AppStateInner {
                sessions: HashMap::new(),
            })),
        }
    }

    pub fn with_session_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.session_idle_timeout = idle_timeout;
        self
    }

    /// Forgets sessions whose ingest task has already ended (idle or bus closed)
    pub async fn prune_sessions(&self) -> usize {
        let mut inner = self.inner.write().await;
        let before = inner.sessions.len();
        inner.sessions.retain(|_, session| !session.is_finished());

        let pruned = before - inner.sessions.len();
        if pruned > 0 {
            tracing::info!(pruned, remaining = inner.sessions.len(), "Pruned ended playback sessions");
        }
        pruned
    }

    /// Periodically prunes ended sessions for the life of the process
    pub fn spawn_session_reaper(&self, every: Duration) -> JoinHandle<()> {
        let state = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                state.prune_sessions().await;
            }
        })
    }

    /// Wires the file-backed store and the TMDB provider from configuration
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let data_dir = config.resolved_data_dir();
        tracing::info!(data_dir = %data_dir.display(), "Using local progress store");

        let provider = TmdbProvider::new(
            config.tmdb_api_token.clone(),
            config.tmdb_api_url.clone(),
            Duration::from_secs(config.metadata_timeout_secs),
        )?;

        Ok(Self::new(
            Arc::new(FileStorage::new(data_dir)),
            Arc::new(provider),
            config.tmdb_image_url.clone(),
            config.player_base_url.clone(),
        )
        .with_session_idle_timeout(Duration::from_secs(config.playback_idle_timeout_secs)))
    }
}
