// Módulos de la aplicación
mod api;
mod app_state;
mod chat;
mod config;
mod embeddings;
mod error;
mod interactions;
mod memory_store;
mod models;
mod neo4j_store;
mod oracle;
mod placement;
mod refiner;
mod search;
mod store;
mod vector_store;

use std::sync::{Arc, Mutex};

use axum::Router;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::chat::ChatOrchestrator;
use crate::embeddings::RigEmbedder;
use crate::oracle::RigOracle;
use crate::search::WebSearchClient;
use crate::store::GraphStore;

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().expect("Error al cargar la configuración");

    // 3. Elegir backend del grafo; con Neo4j, asegurar esquema e índice
    let store: Arc<dyn GraphStore> = match cfg.storage_backend {
        config::StorageBackend::Neo4j => {
            let graph = neo4j_store::connect_from_config(&cfg)
                .await
                .expect("Error conectando a Neo4j");
            let neo4j = neo4j_store::Neo4jStore::new(graph);
            neo4j
                .ensure_schema()
                .await
                .expect("Error asegurando el esquema de Neo4j");
            neo4j
                .ensure_vector_index(cfg.embedding_dimensions)
                .await
                .expect("Error asegurando el índice vectorial");
            Arc::new(neo4j)
        }
        config::StorageBackend::Memory => {
            info!("Backend en memoria activo: el estado no es persistente.");
            Arc::new(memory_store::MemoryStore::new())
        }
    };

    // 4. Inicializar proveedores LLM y búsqueda web
    let embedder = Arc::new(RigEmbedder::from_config(&cfg));
    let oracle = Arc::new(RigOracle::from_config(&cfg));
    let web_search = cfg.tavily_api_key.clone().map(WebSearchClient::new);

    let chat = Arc::new(ChatOrchestrator::new(
        store.clone(),
        embedder.clone(),
        oracle.clone(),
        web_search.clone(),
        cfg.routing.clone(),
        cfg.refinement.clone(),
    ));

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        store,
        embedder,
        oracle,
        web_search,
        chat,
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    // 6. Configurar el router de la API
    let app = Router::new()
        .nest("/", api::create_router(app_state.clone()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .expect("Error abriendo el puerto del servidor");
    info!("🚀 Servidor escuchando en http://{server_addr}");

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .expect("Error del servidor HTTP");

    info!("✅ Servidor cerrado correctamente.");
}
