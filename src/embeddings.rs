//! Proveedor de embeddings (abstracción + implementación OpenAI vía Rig)
//! y similitud coseno explícita como métrica de respaldo.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use crate::config::{AppConfig, LlmProvider};
use crate::error::GraphError;

/// Techo de latencia por llamada al proveedor de embeddings.
const EMBED_TIMEOUT: Duration = Duration::from_secs(60);

/// Función texto → vector de dimensión fija. Tratada como oráculo externo:
/// su fallo se propaga como `EmbeddingFailed` y aborta la colocación.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, GraphError>;
}

/// Texto que representa a un nodo en el espacio vectorial.
pub fn node_embedding_text(title: &str, summary: &str) -> String {
    format!("{title}. {summary}")
}

/// Similitud coseno: `dot(a,b) / (|a| * |b|)`, 0 si alguna norma es 0.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let magnitude = norm_a.sqrt() * norm_b.sqrt();
    if magnitude == 0.0 {
        return 0.0;
    }
    dot / magnitude
}

/// Implementación sobre Rig. De momento sólo OpenAI; Gemini/Ollama quedan
/// preparados para ramas adicionales del `match`.
#[derive(Debug, Clone)]
pub struct RigEmbedder {
    provider: LlmProvider,
    model: String,
}

impl RigEmbedder {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            provider: cfg.llm_provider.clone(),
            model: cfg.llm_embedding_model.clone(),
        }
    }

    async fn embed_with_openai(&self, text: &str) -> Result<Vec<f64>, GraphError> {
        use rig::providers::openai::{self, TEXT_EMBEDDING_3_SMALL};
        // Trait para client.embedding_model(...)
        use rig::client::EmbeddingsClient as _;
        use rig::embeddings::EmbeddingModel as _;

        let client = openai::Client::from_env();

        let model_name = if self.model.is_empty() {
            TEXT_EMBEDDING_3_SMALL
        } else {
            self.model.as_str()
        };

        let embedding_model = client.embedding_model(model_name);

        let embeddings = timeout(
            EMBED_TIMEOUT,
            embedding_model.embed_texts(vec![text.to_string()]),
        )
        .await
        .map_err(|_| {
            GraphError::EmbeddingFailed(format!("timeout tras {} s", EMBED_TIMEOUT.as_secs()))
        })?
        .map_err(|e| GraphError::EmbeddingFailed(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .map(|e| e.vec)
            .ok_or_else(|| {
                GraphError::EmbeddingFailed("el proveedor devolvió una lista vacía".into())
            })
    }
}

#[async_trait]
impl EmbeddingProvider for RigEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, GraphError> {
        match self.provider {
            LlmProvider::OpenAI => self.embed_with_openai(text).await,
            ref other => Err(GraphError::EmbeddingFailed(format!(
                "proveedor {other:?} aún no implementado para embeddings"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coseno_identico_es_uno() {
        let v = vec![0.3, 0.5, -0.2];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn coseno_ortogonal_es_cero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
    }

    #[test]
    fn coseno_norma_cero_es_cero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn coseno_dimensiones_distintas_es_cero() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }
}
