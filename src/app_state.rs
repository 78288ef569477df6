//! Estado compartido de la aplicación.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::chat::ChatOrchestrator;
use crate::config::AppConfig;
use crate::embeddings::EmbeddingProvider;
use crate::oracle::LanguageModelOracle;
use crate::search::WebSearchClient;
use crate::store::GraphStore;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn GraphStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub oracle: Arc<dyn LanguageModelOracle>,
    pub web_search: Option<WebSearchClient>,
    pub chat: Arc<ChatOrchestrator>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}
