pub mod continue_watching;
pub mod details;
pub mod ingestor;
pub mod player;
pub mod progress_store;
pub mod providers;
pub mod reconciler;
pub mod resume;
pub mod search;

pub use continue_watching::ContinueWatchingFeed;
pub use ingestor::{IngestSession, PlayerEventIngestor, PlayerMessageBus};
pub use progress_store::ProgressStore;
pub use reconciler::MetadataReconciler;
pub use resume::{ResumeDecision, ResumeResolver};
