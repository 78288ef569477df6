//! Backend embebido en memoria del `GraphStore`.
//!
//! Útil para desarrollo sin Neo4j y para los tests de invariantes del
//! árbol. La consulta vectorial es un barrido con similitud coseno
//! explícita, la misma métrica de respaldo del contrato del índice.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::embeddings::cosine_similarity;
use crate::error::GraphError;
use crate::models::{
    NewNode, Node, NodeBrief, NodeInteraction, NodeNote, NodeUpdate, RootTopic,
};
use crate::store::GraphStore;
use crate::vector_store::{SearchHit, VectorIndex};

#[derive(Default)]
struct Inner {
    topics: HashMap<String, RootTopic>,
    /// Ids de topics en orden de creación.
    topic_order: Vec<String>,
    nodes: HashMap<String, Node>,
    interactions: HashMap<String, Vec<NodeInteraction>>,
    notes: HashMap<String, Vec<NodeNote>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn brief(node: &Node) -> NodeBrief {
    NodeBrief {
        id: node.id.clone(),
        title: node.title.clone(),
        summary: node.summary.clone(),
    }
}

impl Inner {
    fn node(&self, id: &str) -> Result<&Node, GraphError> {
        self.nodes
            .get(id)
            .ok_or_else(|| GraphError::NotFound(format!("nodo {id}")))
    }

    /// El propio nodo y todos sus descendientes: un nodo desciende de X
    /// si y sólo si X figura en su `ancestor_path`.
    fn subtree_ids(&self, id: &str) -> Vec<String> {
        self.nodes
            .values()
            .filter(|n| n.ancestor_path.iter().any(|a| a == id))
            .map(|n| n.id.clone())
            .collect()
    }

    fn remove_node_records(&mut self, ids: &[String]) {
        for id in ids {
            self.nodes.remove(id);
            self.interactions.remove(id);
            self.notes.remove(id);
        }
    }
}

#[async_trait]
impl VectorIndex for MemoryStore {
    async fn search_similar(
        &self,
        vector: &[f64],
        root_id: &str,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, GraphError> {
        let inner = self.inner.read().unwrap();
        let mut hits: Vec<SearchHit> = inner
            .nodes
            .values()
            .filter(|n| n.root_id == root_id && !n.embedding.is_empty())
            .map(|n| SearchHit {
                id: n.id.clone(),
                title: n.title.clone(),
                summary: n.summary.clone(),
                parent_id: n.parent_id.clone(),
                depth: n.depth(),
                score: cosine_similarity(vector, &n.embedding),
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn create_root(
        &self,
        title: &str,
        description: &str,
        embedding: Vec<f64>,
    ) -> Result<RootTopic, GraphError> {
        let mut inner = self.inner.write().unwrap();

        if let Some(existing) = inner
            .topics
            .values()
            .find(|t| t.title.eq_ignore_ascii_case(title))
        {
            return Err(GraphError::DuplicateTitle {
                title: title.to_string(),
                existing_id: existing.id.clone(),
            });
        }

        let topic_id = Uuid::new_v4().to_string();
        let now = now_rfc3339();

        let topic = RootTopic {
            id: topic_id.clone(),
            title: title.to_string(),
            description: description.to_string(),
            node_count: 1,
            created_at: now.clone(),
        };

        let root_node = Node {
            id: topic_id.clone(),
            title: title.to_string(),
            summary: description.to_string(),
            parent_id: None,
            root_id: topic_id.clone(),
            tags: Vec::new(),
            embedding,
            children_ids: Vec::new(),
            ancestor_path: vec![topic_id.clone()],
            interaction_count: 0,
            created_at: now.clone(),
            last_refined_at: now,
        };

        inner.topics.insert(topic_id.clone(), topic.clone());
        inner.topic_order.push(topic_id.clone());
        inner.nodes.insert(topic_id, root_node);
        Ok(topic)
    }

    async fn create_node(&self, new: NewNode) -> Result<Node, GraphError> {
        let mut inner = self.inner.write().unwrap();

        let parent = inner
            .nodes
            .get(&new.parent_id)
            .ok_or_else(|| GraphError::NotFound(format!("nodo padre {}", new.parent_id)))?
            .clone();

        let node_id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let mut ancestor_path = parent.ancestor_path.clone();
        ancestor_path.push(node_id.clone());

        let node = Node {
            id: node_id.clone(),
            title: new.title,
            summary: new.summary,
            parent_id: Some(parent.id.clone()),
            root_id: parent.root_id.clone(),
            tags: new.tags,
            embedding: new.embedding,
            children_ids: Vec::new(),
            ancestor_path,
            interaction_count: 0,
            created_at: now.clone(),
            last_refined_at: now,
        };

        inner.nodes.insert(node_id.clone(), node.clone());
        inner
            .nodes
            .get_mut(&parent.id)
            .expect("el padre sigue presente bajo el mismo lock")
            .children_ids
            .push(node_id);
        if let Some(topic) = inner.topics.get_mut(&parent.root_id) {
            topic.node_count += 1;
        }

        Ok(node)
    }

    async fn get_node(&self, id: &str) -> Result<Node, GraphError> {
        let inner = self.inner.read().unwrap();
        inner.node(id).cloned()
    }

    async fn update_node(&self, id: &str, update: NodeUpdate) -> Result<Node, GraphError> {
        let mut inner = self.inner.write().unwrap();
        let node = inner
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::NotFound(format!("nodo {id}")))?;

        if let Some(title) = update.title {
            node.title = title;
        }
        if let Some(summary) = update.summary {
            node.summary = summary;
        }
        if let Some(tags) = update.tags {
            node.tags = tags;
        }
        if let Some(embedding) = update.embedding {
            node.embedding = embedding;
        }

        Ok(node.clone())
    }

    async fn delete_node(&self, id: &str) -> Result<Vec<String>, GraphError> {
        let mut inner = self.inner.write().unwrap();
        let node = inner.node(id)?.clone();

        let parent_id = node.parent_id.clone().ok_or_else(|| {
            GraphError::Forbidden(format!(
                "el nodo {id} es raíz; usa el borrado de topics"
            ))
        })?;

        let doomed = inner.subtree_ids(id);
        inner.remove_node_records(&doomed);

        if let Some(parent) = inner.nodes.get_mut(&parent_id) {
            parent.children_ids.retain(|c| c != id);
        }
        if let Some(topic) = inner.topics.get_mut(&node.root_id) {
            topic.node_count -= doomed.len() as i64;
        }

        Ok(doomed)
    }

    async fn delete_root(&self, root_id: &str) -> Result<(), GraphError> {
        let mut inner = self.inner.write().unwrap();
        if inner.topics.remove(root_id).is_none() {
            return Err(GraphError::NotFound(format!("topic {root_id}")));
        }
        inner.topic_order.retain(|t| t != root_id);

        let doomed: Vec<String> = inner
            .nodes
            .values()
            .filter(|n| n.root_id == root_id)
            .map(|n| n.id.clone())
            .collect();
        inner.remove_node_records(&doomed);
        Ok(())
    }

    async fn get_topic(&self, topic_id: &str) -> Result<RootTopic, GraphError> {
        let inner = self.inner.read().unwrap();
        inner
            .topics
            .get(topic_id)
            .cloned()
            .ok_or_else(|| GraphError::NotFound(format!("topic {topic_id}")))
    }

    async fn update_topic(
        &self,
        topic_id: &str,
        title: Option<String>,
        description: Option<String>,
        embedding: Option<Vec<f64>>,
    ) -> Result<RootTopic, GraphError> {
        let mut inner = self.inner.write().unwrap();
        let topic = inner
            .topics
            .get_mut(topic_id)
            .ok_or_else(|| GraphError::NotFound(format!("topic {topic_id}")))?;

        if let Some(title) = &title {
            topic.title = title.clone();
        }
        if let Some(description) = &description {
            topic.description = description.clone();
        }
        let updated = topic.clone();

        if let Some(root_node) = inner.nodes.get_mut(topic_id) {
            if let Some(title) = title {
                root_node.title = title;
            }
            if let Some(description) = description {
                root_node.summary = description;
            }
            if let Some(embedding) = embedding {
                root_node.embedding = embedding;
            }
        }

        Ok(updated)
    }

    async fn list_root_topics(&self) -> Result<Vec<RootTopic>, GraphError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .topic_order
            .iter()
            .rev()
            .filter_map(|id| inner.topics.get(id).cloned())
            .collect())
    }

    async fn list_nodes(&self, root_id: &str) -> Result<Vec<Node>, GraphError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .nodes
            .values()
            .filter(|n| n.root_id == root_id)
            .cloned()
            .collect())
    }

    async fn list_children(&self, id: &str) -> Result<Vec<NodeBrief>, GraphError> {
        let inner = self.inner.read().unwrap();
        let node = inner.node(id)?;
        Ok(node
            .children_ids
            .iter()
            .filter_map(|c| inner.nodes.get(c).map(brief))
            .collect())
    }

    async fn list_ancestors(&self, id: &str) -> Result<Vec<NodeBrief>, GraphError> {
        let inner = self.inner.read().unwrap();
        let node = inner.node(id)?;
        Ok(node
            .ancestor_path
            .iter()
            .filter(|a| a.as_str() != id)
            .filter_map(|a| inner.nodes.get(a).map(brief))
            .collect())
    }

    async fn record_interaction(
        &self,
        node_id: &str,
        user_message: &str,
        ai_response: &str,
    ) -> Result<i64, GraphError> {
        let mut inner = self.inner.write().unwrap();
        let node = inner
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| GraphError::NotFound(format!("nodo {node_id}")))?;
        node.interaction_count += 1;
        let count = node.interaction_count;

        inner
            .interactions
            .entry(node_id.to_string())
            .or_default()
            .push(NodeInteraction {
                node_id: node_id.to_string(),
                user_message: user_message.to_string(),
                ai_response: ai_response.to_string(),
                timestamp: now_rfc3339(),
            });

        Ok(count)
    }

    async fn list_interactions(
        &self,
        node_id: &str,
    ) -> Result<Vec<NodeInteraction>, GraphError> {
        let inner = self.inner.read().unwrap();
        inner.node(node_id)?;
        Ok(inner.interactions.get(node_id).cloned().unwrap_or_default())
    }

    async fn recent_interactions(
        &self,
        node_id: &str,
        limit: usize,
    ) -> Result<Vec<NodeInteraction>, GraphError> {
        let inner = self.inner.read().unwrap();
        inner.node(node_id)?;
        let all = inner.interactions.get(node_id).cloned().unwrap_or_default();
        Ok(all.into_iter().rev().take(limit).collect())
    }

    async fn set_refined_summary(
        &self,
        node_id: &str,
        summary: &str,
        embedding: Vec<f64>,
    ) -> Result<(), GraphError> {
        let mut inner = self.inner.write().unwrap();
        let node = inner
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| GraphError::NotFound(format!("nodo {node_id}")))?;
        node.summary = summary.to_string();
        node.embedding = embedding;
        node.last_refined_at = now_rfc3339();
        Ok(())
    }

    async fn add_note(&self, node_id: &str, content: &str) -> Result<NodeNote, GraphError> {
        let mut inner = self.inner.write().unwrap();
        inner.node(node_id)?;

        let note = NodeNote {
            id: Uuid::new_v4().to_string(),
            content: content.to_string(),
            created_at: now_rfc3339(),
        };
        inner
            .notes
            .entry(node_id.to_string())
            .or_default()
            .push(note.clone());
        Ok(note)
    }

    async fn list_notes(&self, node_id: &str) -> Result<Vec<NodeNote>, GraphError> {
        let inner = self.inner.read().unwrap();
        inner.node(node_id)?;
        Ok(inner.notes.get(node_id).cloned().unwrap_or_default())
    }

    async fn delete_note(&self, node_id: &str, note_id: &str) -> Result<(), GraphError> {
        let mut inner = self.inner.write().unwrap();
        inner.node(node_id)?;
        let notes = inner
            .notes
            .entry(node_id.to_string())
            .or_default();
        let before = notes.len();
        notes.retain(|n| n.id != note_id);
        if notes.len() == before {
            return Err(GraphError::NotFound(format!("nota {note_id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    async fn seed_tree(store: &MemoryStore) -> (String, String) {
        let topic = store
            .create_root("Cálculo", "Aprende cálculo", vec![1.0, 0.0])
            .await
            .unwrap();
        let derivadas = store
            .create_node(NewNode {
                title: "Derivadas".into(),
                summary: "Tasa de cambio instantánea de una función.".into(),
                parent_id: topic.id.clone(),
                tags: vec![],
                embedding: vec![0.9, 0.1],
            })
            .await
            .unwrap();
        (topic.id, derivadas.id)
    }

    /// Comprueba los invariantes estructurales del árbol sobre el estado
    /// completo del almacén.
    fn assert_tree_invariants(store: &MemoryStore) {
        let inner = store.inner.read().unwrap();
        for node in inner.nodes.values() {
            // ancestor_path = camino del padre + id propio
            assert_eq!(node.ancestor_path.last(), Some(&node.id));
            assert_eq!(node.ancestor_path.first(), Some(&node.root_id));
            match &node.parent_id {
                None => {
                    assert_eq!(node.id, node.root_id);
                    assert_eq!(node.ancestor_path, vec![node.id.clone()]);
                }
                Some(pid) => {
                    let parent = inner.nodes.get(pid).expect("padre vivo");
                    let mut expected = parent.ancestor_path.clone();
                    expected.push(node.id.clone());
                    assert_eq!(node.ancestor_path, expected);
                    assert!(parent.children_ids.contains(&node.id));
                }
            }
            // cada hijo listado existe y apunta de vuelta
            for child_id in &node.children_ids {
                let child = inner.nodes.get(child_id).expect("hijo vivo");
                assert_eq!(child.parent_id.as_deref(), Some(node.id.as_str()));
            }
        }
        // un id aparece en la lista de hijos de exactamente un padre
        for node in inner.nodes.values().filter(|n| n.parent_id.is_some()) {
            let owners = inner
                .nodes
                .values()
                .filter(|p| p.children_ids.contains(&node.id))
                .count();
            assert_eq!(owners, 1, "el nodo {} tiene {owners} padres", node.id);
        }
        // node_count coincide con los nodos vivos de cada árbol
        for topic in inner.topics.values() {
            let live = inner
                .nodes
                .values()
                .filter(|n| n.root_id == topic.id)
                .count() as i64;
            assert_eq!(topic.node_count, live);
        }
    }

    #[tokio::test]
    async fn crear_raiz_duplicada_devuelve_conflicto() {
        let store = MemoryStore::new();
        let topic = store
            .create_root("Cálculo", "desc", vec![1.0])
            .await
            .unwrap();
        let err = store
            .create_root("cálculo", "otra desc", vec![1.0])
            .await
            .unwrap_err();
        match err {
            GraphError::DuplicateTitle { existing_id, .. } => {
                assert_eq!(existing_id, topic.id)
            }
            other => panic!("se esperaba DuplicateTitle, no {other:?}"),
        }
    }

    #[tokio::test]
    async fn crear_nodo_extiende_el_camino_del_padre() {
        let store = MemoryStore::new();
        let (root_id, derivadas_id) = seed_tree(&store).await;

        let hijo = store
            .create_node(NewNode {
                title: "Regla de la cadena".into(),
                summary: "Derivada de una composición.".into(),
                parent_id: derivadas_id.clone(),
                tags: vec![],
                embedding: vec![0.8, 0.2],
            })
            .await
            .unwrap();

        assert_eq!(
            hijo.ancestor_path,
            vec![root_id.clone(), derivadas_id.clone(), hijo.id.clone()]
        );
        assert_eq!(hijo.depth(), 2);
        assert_eq!(store.get_topic(&root_id).await.unwrap().node_count, 3);
        assert_tree_invariants(&store);
    }

    #[tokio::test]
    async fn crear_bajo_padre_inexistente_falla() {
        let store = MemoryStore::new();
        seed_tree(&store).await;
        let err = store
            .create_node(NewNode {
                title: "Huérfano".into(),
                summary: "x".into(),
                parent_id: "no-existe".into(),
                tags: vec![],
                embedding: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::NotFound(_)));
    }

    #[tokio::test]
    async fn borrado_en_cascada_elimina_el_subarbol_completo() {
        let store = MemoryStore::new();
        let (root_id, derivadas_id) = seed_tree(&store).await;

        // derivadas con 2 hijos y 1 nieto: el borrado quita 4 nodos
        let h1 = store
            .create_node(NewNode {
                title: "Regla de la cadena".into(),
                summary: "s".into(),
                parent_id: derivadas_id.clone(),
                tags: vec![],
                embedding: vec![0.5, 0.5],
            })
            .await
            .unwrap();
        store
            .create_node(NewNode {
                title: "Regla del producto".into(),
                summary: "s".into(),
                parent_id: derivadas_id.clone(),
                tags: vec![],
                embedding: vec![0.5, 0.4],
            })
            .await
            .unwrap();
        let nieto = store
            .create_node(NewNode {
                title: "Casos compuestos".into(),
                summary: "s".into(),
                parent_id: h1.id.clone(),
                tags: vec![],
                embedding: vec![0.4, 0.4],
            })
            .await
            .unwrap();
        store
            .record_interaction(&nieto.id, "¿qué es?", "una composición")
            .await
            .unwrap();

        let deleted = store.delete_node(&derivadas_id).await.unwrap();
        assert_eq!(deleted.len(), 4);
        assert_eq!(store.get_topic(&root_id).await.unwrap().node_count, 1);
        assert!(store.get_node(&nieto.id).await.is_err());
        assert!(store
            .inner
            .read()
            .unwrap()
            .interactions
            .get(&nieto.id)
            .is_none());
        assert_tree_invariants(&store);
    }

    #[tokio::test]
    async fn borrar_la_raiz_por_la_ruta_de_nodos_esta_prohibido() {
        let store = MemoryStore::new();
        let (root_id, _) = seed_tree(&store).await;
        let err = store.delete_node(&root_id).await.unwrap_err();
        assert!(matches!(err, GraphError::Forbidden(_)));
        // el árbol queda intacto
        assert_eq!(store.get_topic(&root_id).await.unwrap().node_count, 2);
        assert_tree_invariants(&store);
    }

    #[tokio::test]
    async fn borrar_topic_arrastra_nodos_e_interacciones() {
        let store = MemoryStore::new();
        let (root_id, derivadas_id) = seed_tree(&store).await;
        store
            .record_interaction(&derivadas_id, "q", "a")
            .await
            .unwrap();

        store.delete_root(&root_id).await.unwrap();
        assert!(store.get_topic(&root_id).await.is_err());
        assert!(store.get_node(&derivadas_id).await.is_err());
        assert!(store.inner.read().unwrap().nodes.is_empty());
        assert!(store.inner.read().unwrap().interactions.is_empty());
    }

    #[tokio::test]
    async fn actualizar_resumen_con_embedding_es_visible_en_la_busqueda() {
        let store = MemoryStore::new();
        let (_, derivadas_id) = seed_tree(&store).await;

        let new_embedding = vec![0.0, 1.0];
        store
            .update_node(
                &derivadas_id,
                NodeUpdate {
                    summary: Some("texto nuevo".into()),
                    embedding: Some(new_embedding.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // round-trip: el vector del texto nuevo recupera el nodo primero
        let hits = store
            .search_similar(&new_embedding, &store.get_node(&derivadas_id).await.unwrap().root_id, 5)
            .await
            .unwrap();
        assert_eq!(hits.first().map(|h| h.id.as_str()), Some(derivadas_id.as_str()));
        assert!((hits[0].score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn contador_de_interacciones_es_secuencial() {
        let store = MemoryStore::new();
        let (_, derivadas_id) = seed_tree(&store).await;
        for expected in 1..=4 {
            let count = store
                .record_interaction(&derivadas_id, "q", "a")
                .await
                .unwrap();
            assert_eq!(count, expected);
        }
        let recent = store.recent_interactions(&derivadas_id, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
    }

    #[tokio::test]
    async fn notas_alta_listado_y_borrado() {
        let store = MemoryStore::new();
        let (_, derivadas_id) = seed_tree(&store).await;
        let note = store.add_note(&derivadas_id, "repasar antes del examen").await.unwrap();
        assert_eq!(store.list_notes(&derivadas_id).await.unwrap().len(), 1);
        store.delete_note(&derivadas_id, &note.id).await.unwrap();
        assert!(store.list_notes(&derivadas_id).await.unwrap().is_empty());
    }

    /// Propiedad: tras una secuencia aleatoria de altas y bajas los
    /// invariantes estructurales se conservan en todo momento.
    #[tokio::test]
    async fn secuencia_aleatoria_de_operaciones_conserva_invariantes() {
        let store = MemoryStore::new();
        let topic = store
            .create_root("Historia", "desc", vec![1.0, 0.0])
            .await
            .unwrap();
        let mut live: Vec<String> = vec![topic.id.clone()];
        let mut rng = StdRng::seed_from_u64(0xCAFE);

        for i in 0..200 {
            let delete = rng.gen_bool(0.3) && live.len() > 1;
            if delete {
                let idx = rng.gen_range(1..live.len());
                let victim = live[idx].clone();
                let deleted = store.delete_node(&victim).await.unwrap();
                live.retain(|id| !deleted.contains(id));
            } else {
                let parent = live[rng.gen_range(0..live.len())].clone();
                let node = store
                    .create_node(NewNode {
                        title: format!("Tema {i}"),
                        summary: format!("resumen {i}"),
                        parent_id: parent,
                        tags: vec![],
                        embedding: vec![rng.gen(), rng.gen()],
                    })
                    .await
                    .unwrap();
                live.push(node.id);
            }
            assert_tree_invariants(&store);
        }
    }
}
