//! Orquestador de un turno de chat: colocar → responder → registrar →
//! refinar si toca.
//!
//! El turno sólo falla si fallan la colocación, la respuesta o el
//! registro; el refinamiento es best-effort y nunca tumba un turno que ya
//! tiene respuesta.

use std::sync::Arc;

use tracing::warn;

use crate::config::{RefinementConfig, RoutingConfig};
use crate::embeddings::{node_embedding_text, EmbeddingProvider};
use crate::error::GraphError;
use crate::interactions::record_turn;
use crate::models::{ChatMessage, NewNode, Node, RoutingDecision};
use crate::oracle::LanguageModelOracle;
use crate::placement::{route_question, PlacementRequest};
use crate::refiner::refine_if_due;
use crate::search::WebSearchClient;
use crate::store::GraphStore;

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub question: String,
    pub root_id: String,
    pub current_node_id: Option<String>,
    pub recent_messages: Vec<ChatMessage>,
}

/// Resultado de un turno completo.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatTurn {
    pub answer: String,
    pub node_id: String,
    pub node_title: String,
    /// `true` si el turno creó el nodo en lugar de reutilizar uno.
    pub node_created: bool,
    pub routing_reasoning: String,
    pub interaction_count: i64,
    pub summary_refined: bool,
}

pub struct ChatOrchestrator {
    store: Arc<dyn GraphStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    oracle: Arc<dyn LanguageModelOracle>,
    web_search: Option<WebSearchClient>,
    routing: RoutingConfig,
    refinement: RefinementConfig,
}

impl ChatOrchestrator {
    pub fn new(
        store: Arc<dyn GraphStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        oracle: Arc<dyn LanguageModelOracle>,
        web_search: Option<WebSearchClient>,
        routing: RoutingConfig,
        refinement: RefinementConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            oracle,
            web_search,
            routing,
            refinement,
        }
    }

    /// Ejecuta un turno completo de tutoría.
    pub async fn run_turn(&self, request: &ChatRequest) -> Result<ChatTurn, GraphError> {
        let placement = PlacementRequest {
            question: request.question.clone(),
            root_id: request.root_id.clone(),
            current_node_id: request.current_node_id.clone(),
            recent_messages: request.recent_messages.clone(),
        };

        let decision = route_question(
            self.store.as_ref(),
            self.embedder.as_ref(),
            self.oracle.as_ref(),
            self.web_search.as_ref(),
            &self.routing,
            &placement,
        )
        .await?;

        let (node, node_created, reasoning) = self.materialize(decision).await?;

        let context = self.node_context(&node).await?;
        let answer = self.oracle.tutor_answer(&request.question, &context).await?;

        let interaction_count =
            record_turn(self.store.as_ref(), &node.id, &request.question, &answer).await?;

        let summary_refined = match refine_if_due(
            self.store.as_ref(),
            self.embedder.as_ref(),
            self.oracle.as_ref(),
            &self.refinement,
            &node.id,
            interaction_count,
        )
        .await
        {
            Ok(refined) => refined,
            Err(e) => {
                warn!("Refinamiento tras el turno fallido para '{}': {e}", node.title);
                false
            }
        };

        Ok(ChatTurn {
            answer,
            node_id: node.id,
            node_title: node.title,
            node_created,
            routing_reasoning: reasoning,
            interaction_count,
            summary_refined,
        })
    }

    /// Convierte la decisión de colocación en un nodo concreto, creándolo
    /// si hace falta.
    async fn materialize(
        &self,
        decision: RoutingDecision,
    ) -> Result<(Node, bool, String), GraphError> {
        match decision {
            RoutingDecision::UseExisting {
                node_id, reasoning, ..
            } => {
                let node = self.store.get_node(&node_id).await?;
                Ok((node, false, reasoning))
            }
            RoutingDecision::CreateNew {
                parent_id,
                suggested_title,
                suggested_summary,
                reasoning,
            } => {
                let embedding = self
                    .embedder
                    .embed(&node_embedding_text(&suggested_title, &suggested_summary))
                    .await?;
                let node = self
                    .store
                    .create_node(NewNode {
                        title: suggested_title,
                        summary: suggested_summary,
                        parent_id,
                        tags: Vec::new(),
                        embedding,
                    })
                    .await?;
                Ok((node, true, reasoning))
            }
        }
    }

    /// Contexto del tutor: el camino de ancestros más el resumen del nodo.
    async fn node_context(&self, node: &Node) -> Result<String, GraphError> {
        let ancestors = self.store.list_ancestors(&node.id).await?;

        let mut context = String::new();
        if !ancestors.is_empty() {
            let path: Vec<&str> = ancestors.iter().map(|a| a.title.as_str()).collect();
            context.push_str(&format!("Camino del tema: {} > {}\n", path.join(" > "), node.title));
        }
        context.push_str(&format!("Tema: {}\nResumen: {}", node.title, node.summary));
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::oracle::{OracleAction, OracleRouting};
    use async_trait::async_trait;

    struct FixedEmbedder(Vec<f64>);

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f64>, GraphError> {
            Ok(self.0.clone())
        }
    }

    struct ScriptedOracle {
        routing: OracleRouting,
        answer: String,
    }

    #[async_trait]
    impl LanguageModelOracle for ScriptedOracle {
        async fn decide_routing(&self, _prompt: &str) -> Result<OracleRouting, GraphError> {
            Ok(self.routing.clone())
        }
        async fn refine_summary(&self, _prompt: &str) -> Result<String, GraphError> {
            Ok("Resumen refinado con lo que preguntan los estudiantes de verdad.".to_string())
        }
        async fn tutor_answer(&self, _q: &str, _c: &str) -> Result<String, GraphError> {
            Ok(self.answer.clone())
        }
    }

    fn orchestrator(store: Arc<MemoryStore>, routing: OracleRouting) -> ChatOrchestrator {
        ChatOrchestrator::new(
            store,
            Arc::new(FixedEmbedder(vec![0.0, 1.0, 0.0])),
            Arc::new(ScriptedOracle {
                routing,
                answer: "La derivada mide la tasa de cambio instantánea.".to_string(),
            }),
            None,
            RoutingConfig::default(),
            RefinementConfig::default(),
        )
    }

    #[tokio::test]
    async fn un_turno_crea_el_nodo_y_registra_la_interaccion() {
        let store = Arc::new(MemoryStore::new());
        let root = store
            .create_root("Cálculo", "Curso de cálculo", vec![1.0, 0.0, 0.0])
            .await
            .unwrap();

        let routing = OracleRouting {
            action: OracleAction::CreateNew,
            reasoning: "tema nuevo".to_string(),
            existing_node_id: None,
            parent_node_id: Some(root.id.clone()),
            suggested_title: Some("Derivadas".to_string()),
            suggested_summary: Some("Tasas de cambio instantáneas.".to_string()),
        };

        let turn = orchestrator(store.clone(), routing)
            .run_turn(&ChatRequest {
                question: "¿Qué es una derivada?".to_string(),
                root_id: root.id.clone(),
                current_node_id: None,
                recent_messages: Vec::new(),
            })
            .await
            .unwrap();

        assert!(turn.node_created);
        assert_eq!(turn.node_title, "Derivadas");
        assert_eq!(turn.interaction_count, 1);
        assert!(!turn.summary_refined);

        let node = store.get_node(&turn.node_id).await.unwrap();
        assert_eq!(node.parent_id.as_deref(), Some(root.id.as_str()));
        assert_eq!(node.interaction_count, 1);

        let topic = store.get_topic(&root.id).await.unwrap();
        assert_eq!(topic.node_count, 2);
    }

    #[tokio::test]
    async fn reutilizar_un_nodo_no_crea_nada() {
        let store = Arc::new(MemoryStore::new());
        let root = store
            .create_root("Historia", "Historia universal", vec![1.0, 0.0, 0.0])
            .await
            .unwrap();
        let roma = store
            .create_node(NewNode {
                title: "Roma".to_string(),
                summary: "La república y el imperio romanos.".to_string(),
                parent_id: root.id.clone(),
                tags: Vec::new(),
                embedding: vec![0.0, 1.0, 0.0],
            })
            .await
            .unwrap();

        let routing = OracleRouting {
            action: OracleAction::UseExisting,
            reasoning: "ya cubierto".to_string(),
            existing_node_id: Some(roma.id.clone()),
            parent_node_id: None,
            suggested_title: None,
            suggested_summary: None,
        };

        let turn = orchestrator(store.clone(), routing)
            .run_turn(&ChatRequest {
                question: "¿Cuándo cayó Roma?".to_string(),
                root_id: root.id.clone(),
                current_node_id: Some(roma.id.clone()),
                recent_messages: Vec::new(),
            })
            .await
            .unwrap();

        assert!(!turn.node_created);
        assert_eq!(turn.node_id, roma.id);
        assert_eq!(store.get_topic(&root.id).await.unwrap().node_count, 2);
    }

    #[tokio::test]
    async fn el_quinto_turno_refina_el_resumen() {
        let store = Arc::new(MemoryStore::new());
        let root = store
            .create_root("Física", "Curso de física", vec![1.0, 0.0, 0.0])
            .await
            .unwrap();

        let routing = OracleRouting {
            action: OracleAction::UseExisting,
            reasoning: "ya cubierto".to_string(),
            existing_node_id: Some(root.id.clone()),
            parent_node_id: None,
            suggested_title: None,
            suggested_summary: None,
        };
        let orchestrator = orchestrator(store.clone(), routing);

        let request = ChatRequest {
            question: "¿Qué es la inercia?".to_string(),
            root_id: root.id.clone(),
            current_node_id: None,
            recent_messages: Vec::new(),
        };

        for turn_number in 1..=5 {
            let turn = orchestrator.run_turn(&request).await.unwrap();
            assert_eq!(turn.interaction_count, turn_number);
            assert_eq!(turn.summary_refined, turn_number == 5);
        }

        let node = store.get_node(&root.id).await.unwrap();
        assert_eq!(
            node.summary,
            "Resumen refinado con lo que preguntan los estudiantes de verdad."
        );
    }
}
