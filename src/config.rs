//! Carga y gestión de configuración de la aplicación (Neo4j + LLM +
//! política de enrutamiento y refinamiento).

use std::env;
use anyhow::{anyhow, Result};

#[derive(Clone, Debug)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Backend del almacén del grafo. El backend en memoria sirve para
/// desarrollo sin Neo4j; su estado no es persistente.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Neo4j,
    Memory,
}

impl StorageBackend {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "neo4j" => Ok(Self::Neo4j),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow!("Backend de almacenamiento no soportado: {other}")),
        }
    }
}

/// Umbrales y parámetros del motor de enrutamiento.
///
/// El par 0.85/0.65 es canónico; se expone como configuración porque
/// estos umbrales tienden a ajustarse con el uso real.
#[derive(Clone, Debug)]
pub struct RoutingConfig {
    /// Similitud a partir de la cual un candidato se considera el mismo
    /// tema (prevención de duplicados).
    pub exact_threshold: f64,
    /// Similitud mínima para colgar un nodo nuevo de un candidato en
    /// lugar de la raíz.
    pub related_threshold: f64,
    /// Número de candidatos recuperados del índice vectorial.
    pub top_k: usize,
    /// Techo de latencia por llamada al oráculo LLM, en segundos.
    pub oracle_timeout_secs: u64,
}

/// Cadencia y límites del refinamiento de resúmenes.
#[derive(Clone, Debug)]
pub struct RefinementConfig {
    /// Se refina cuando interaction_count es múltiplo positivo de esto.
    pub cadence: u64,
    /// Mínimo de interacciones almacenadas para refinar.
    pub min_interactions: usize,
    /// Cuántas interacciones recientes alimentan el refinamiento.
    pub recent_window: usize,
    /// Longitud mínima aceptable del resumen refinado, en caracteres.
    pub summary_min_chars: usize,
    /// Longitud máxima aceptable del resumen refinado, en caracteres.
    pub summary_max_chars: usize,
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub storage_backend: StorageBackend,
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub server_addr: String,

    pub llm_provider: LlmProvider,
    pub llm_embedding_model: String,
    pub llm_chat_model: String,
    /// Dimensiones del modelo de embeddings (1536 para
    /// text-embedding-3-small).
    pub embedding_dimensions: usize,

    /// Clave de Tavily para el enriquecimiento web. Opcional: sin clave
    /// el enrutamiento funciona igual, solo con menos contexto.
    pub tavily_api_key: Option<String>,

    pub routing: RoutingConfig,
    pub refinement: RefinementConfig,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let storage_backend = StorageBackend::from_str(
            &env::var("STORAGE_BACKEND").unwrap_or_else(|_| "neo4j".to_string()),
        )?;

        // las credenciales de Neo4j sólo son obligatorias con ese backend
        let (neo4j_uri, neo4j_user, neo4j_password) = if storage_backend
            == StorageBackend::Neo4j
        {
            (
                env::var("NEO4J_URI").map_err(|_| anyhow!("Falta NEO4J_URI en el entorno"))?,
                env::var("NEO4J_USER").map_err(|_| anyhow!("Falta NEO4J_USER en el entorno"))?,
                env::var("NEO4J_PASSWORD")
                    .map_err(|_| anyhow!("Falta NEO4J_PASSWORD en el entorno"))?,
            )
        } else {
            (String::new(), String::new(), String::new())
        };

        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_embedding_model = env::var("LLM_EMBEDDING_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());
        let llm_chat_model =
            env::var("LLM_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let tavily_api_key = env::var("TAVILY_API_KEY").ok().filter(|k| !k.is_empty());

        Ok(Self {
            storage_backend,
            neo4j_uri,
            neo4j_user,
            neo4j_password,
            server_addr,
            llm_provider,
            llm_embedding_model,
            llm_chat_model,
            embedding_dimensions: env_parse("EMBEDDING_DIMENSIONS", 1536)?,
            tavily_api_key,
            routing: RoutingConfig {
                exact_threshold: env_parse("EXACT_MATCH_THRESHOLD", 0.85)?,
                related_threshold: env_parse("RELATED_MATCH_THRESHOLD", 0.65)?,
                top_k: env_parse("ROUTING_TOP_K", 5)?,
                oracle_timeout_secs: env_parse("ORACLE_TIMEOUT_SECS", 60)?,
            },
            refinement: RefinementConfig {
                cadence: env_parse("REFINEMENT_CADENCE", 5)?,
                min_interactions: env_parse("REFINEMENT_MIN_INTERACTIONS", 3)?,
                recent_window: env_parse("REFINEMENT_RECENT_WINDOW", 10)?,
                summary_min_chars: env_parse("SUMMARY_MIN_CHARS", 20)?,
                summary_max_chars: env_parse("SUMMARY_MAX_CHARS", 250)?,
            },
        })
    }
}

/// Lee una variable de entorno numérica con valor por defecto.
fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| anyhow!("Valor inválido para {name}: '{raw}'")),
        Err(_) => Ok(default),
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            exact_threshold: 0.85,
            related_threshold: 0.65,
            top_k: 5,
            oracle_timeout_secs: 60,
        }
    }
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            cadence: 5,
            min_interactions: 3,
            recent_window: 10,
            summary_min_chars: 20,
            summary_max_chars: 250,
        }
    }
}
