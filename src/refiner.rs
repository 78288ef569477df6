//! Refinamiento periódico de resúmenes a partir del uso real.
//!
//! Cada `cadence` interacciones se reescribe el resumen del nodo con lo
//! que los estudiantes preguntaron de verdad. Todo el proceso es
//! best-effort: cualquier fallo deja el resumen anterior intacto y jamás
//! se propaga al turno de chat que lo disparó.

use tracing::{info, warn};

use crate::config::RefinementConfig;
use crate::embeddings::{node_embedding_text, EmbeddingProvider};
use crate::error::GraphError;
use crate::models::clamp_chars;
use crate::oracle::LanguageModelOracle;
use crate::store::GraphStore;

const MAX_QUESTION_CHARS: usize = 200;
const MAX_ANSWER_CHARS: usize = 300;

/// ¿Toca refinar con este contador? Sólo el turno cuyo contador cae
/// exactamente en la cadencia dispara; los demás no, aunque haya carreras.
pub fn is_refinement_due(interaction_count: i64, cfg: &RefinementConfig) -> bool {
    interaction_count > 0 && interaction_count % (cfg.cadence as i64) == 0
}

/// Refina el nodo si el contador cae en la cadencia. Devuelve `true` sólo
/// si se confirmó un resumen nuevo.
pub async fn refine_if_due(
    store: &dyn GraphStore,
    embedder: &dyn EmbeddingProvider,
    oracle: &dyn LanguageModelOracle,
    cfg: &RefinementConfig,
    node_id: &str,
    interaction_count: i64,
) -> Result<bool, GraphError> {
    if !is_refinement_due(interaction_count, cfg) {
        return Ok(false);
    }
    refine_node(store, embedder, oracle, cfg, node_id).await
}

/// Reescribe el resumen de un nodo a partir de sus interacciones
/// recientes. Cualquier fallo (oráculo, validación, embedding, escritura)
/// se degrada a `Ok(false)` con un warning.
pub async fn refine_node(
    store: &dyn GraphStore,
    embedder: &dyn EmbeddingProvider,
    oracle: &dyn LanguageModelOracle,
    cfg: &RefinementConfig,
    node_id: &str,
) -> Result<bool, GraphError> {
    let node = store.get_node(node_id).await?;

    let mut recent = store.recent_interactions(node_id, cfg.recent_window).await?;
    if recent.len() < cfg.min_interactions {
        return Ok(false);
    }
    // de la más antigua a la más reciente para el transcript
    recent.reverse();

    let mut transcript = String::new();
    for interaction in &recent {
        transcript.push_str(&format!(
            "Estudiante: {}\nTutor: {}\n",
            clamp_chars(&interaction.user_message, MAX_QUESTION_CHARS),
            clamp_chars(&interaction.ai_response, MAX_ANSWER_CHARS),
        ));
    }

    let prompt = format!(
        "## Tema\n{}\n\n## Resumen actual\n{}\n\n## Interacciones recientes\n{}\n\
         Reescribe el resumen para que refleje mejor lo que los estudiantes \
         preguntan sobre este tema. Entre 1 y 3 frases, de {} a {} caracteres.",
        node.title, node.summary, transcript, cfg.summary_min_chars, cfg.summary_max_chars,
    );

    let refined = match oracle.refine_summary(&prompt).await {
        Ok(text) => text,
        Err(e) => {
            warn!("Refinamiento del nodo '{}' fallido: {e}", node.title);
            return Ok(false);
        }
    };

    let chars = refined.chars().count();
    if chars < cfg.summary_min_chars || chars > cfg.summary_max_chars {
        warn!(
            "Resumen refinado fuera de límites ({chars} caracteres) para '{}'; se conserva el anterior",
            node.title
        );
        return Ok(false);
    }

    let embedding = match embedder
        .embed(&node_embedding_text(&node.title, &refined))
        .await
    {
        Ok(vec) => vec,
        Err(e) => {
            warn!("Embedding del resumen refinado fallido para '{}': {e}", node.title);
            return Ok(false);
        }
    };

    if let Err(e) = store.set_refined_summary(node_id, &refined, embedding).await {
        warn!("No se pudo confirmar el resumen refinado de '{}': {e}", node.title);
        return Ok(false);
    }

    info!("Resumen del nodo '{}' refinado ({chars} caracteres)", node.title);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::oracle::OracleRouting;
    use async_trait::async_trait;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f64>, GraphError> {
            Ok(vec![0.5, 0.5, 0.0])
        }
    }

    struct ScriptedRefiner(Result<String, ()>);

    #[async_trait]
    impl LanguageModelOracle for ScriptedRefiner {
        async fn decide_routing(&self, _prompt: &str) -> Result<OracleRouting, GraphError> {
            unreachable!("no se enruta en estos tests")
        }
        async fn refine_summary(&self, _prompt: &str) -> Result<String, GraphError> {
            self.0
                .clone()
                .map_err(|_| GraphError::RefinementFailed("oráculo caído".to_string()))
        }
        async fn tutor_answer(&self, _q: &str, _c: &str) -> Result<String, GraphError> {
            unreachable!("no se responde en estos tests")
        }
    }

    async fn seeded_store() -> (MemoryStore, String) {
        let store = MemoryStore::new();
        let root = store
            .create_root("Álgebra", "Curso de álgebra lineal", vec![1.0, 0.0, 0.0])
            .await
            .unwrap();
        for i in 0..5 {
            store
                .record_interaction(
                    &root.id,
                    &format!("¿Qué es un vector? ({i})"),
                    "Un elemento de un espacio vectorial.",
                )
                .await
                .unwrap();
        }
        (store, root.id)
    }

    #[test]
    fn la_cadencia_solo_dispara_en_multiplos_positivos() {
        let cfg = RefinementConfig::default();
        assert!(!is_refinement_due(0, &cfg));
        assert!(!is_refinement_due(4, &cfg));
        assert!(is_refinement_due(5, &cfg));
        assert!(!is_refinement_due(7, &cfg));
        assert!(is_refinement_due(10, &cfg));
    }

    #[tokio::test]
    async fn fuera_de_cadencia_no_toca_el_resumen() {
        let (store, root_id) = seeded_store().await;
        let oracle = ScriptedRefiner(Ok(
            "Los vectores y sus operaciones básicas en espacios vectoriales.".to_string(),
        ));

        let refined = refine_if_due(
            &store,
            &FixedEmbedder,
            &oracle,
            &RefinementConfig::default(),
            &root_id,
            4,
        )
        .await
        .unwrap();

        assert!(!refined);
        let node = store.get_node(&root_id).await.unwrap();
        assert_eq!(node.summary, "Curso de álgebra lineal");
    }

    #[tokio::test]
    async fn en_cadencia_confirma_el_resumen_nuevo() {
        let (store, root_id) = seeded_store().await;
        let nuevo = "Los vectores y sus operaciones básicas en espacios vectoriales.";
        let oracle = ScriptedRefiner(Ok(nuevo.to_string()));

        let refined = refine_if_due(
            &store,
            &FixedEmbedder,
            &oracle,
            &RefinementConfig::default(),
            &root_id,
            5,
        )
        .await
        .unwrap();

        assert!(refined);
        let node = store.get_node(&root_id).await.unwrap();
        assert_eq!(node.summary, nuevo);
    }

    #[tokio::test]
    async fn resumen_fuera_de_limites_conserva_el_anterior() {
        let (store, root_id) = seeded_store().await;
        let oracle = ScriptedRefiner(Ok("Corto.".to_string()));

        let refined = refine_node(
            &store,
            &FixedEmbedder,
            &oracle,
            &RefinementConfig::default(),
            &root_id,
        )
        .await
        .unwrap();

        assert!(!refined);
        let node = store.get_node(&root_id).await.unwrap();
        assert_eq!(node.summary, "Curso de álgebra lineal");
    }

    #[tokio::test]
    async fn oraculo_caido_se_degrada_sin_error() {
        let (store, root_id) = seeded_store().await;
        let oracle = ScriptedRefiner(Err(()));

        let refined = refine_node(
            &store,
            &FixedEmbedder,
            &oracle,
            &RefinementConfig::default(),
            &root_id,
        )
        .await
        .unwrap();

        assert!(!refined);
    }

    #[tokio::test]
    async fn pocas_interacciones_no_refinan() {
        let store = MemoryStore::new();
        let root = store
            .create_root("Geometría", "Curso de geometría", vec![1.0, 0.0, 0.0])
            .await
            .unwrap();
        store
            .record_interaction(&root.id, "¿Qué es un ángulo?", "Una abertura entre dos rectas.")
            .await
            .unwrap();

        let oracle = ScriptedRefiner(Ok(
            "Ángulos, rectas y figuras planas en el plano euclídeo.".to_string(),
        ));
        let refined = refine_node(
            &store,
            &FixedEmbedder,
            &oracle,
            &RefinementConfig::default(),
            &root.id,
        )
        .await
        .unwrap();

        assert!(!refined);
    }
}
