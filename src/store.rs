//! Contrato del almacén autoritativo del árbol de conocimiento.
//!
//! El almacén es la única fuente de verdad para identidad y adyacencia;
//! el índice vectorial es una proyección. Cada operación es atómica desde
//! el punto de vista del llamador: o se confirman todos sus efectos
//! (nodo + lista de hijos del padre + contador del topic + vector) o
//! ninguno.

use async_trait::async_trait;

use crate::error::GraphError;
use crate::models::{
    NewNode, Node, NodeBrief, NodeInteraction, NodeNote, NodeUpdate, RootTopic,
};
use crate::vector_store::VectorIndex;

#[async_trait]
pub trait GraphStore: VectorIndex {
    /// Crea un root topic y su nodo raíz (mismo id, `node_count = 1`).
    /// Falla con `DuplicateTitle` si ya existe un topic con el mismo
    /// título ignorando mayúsculas.
    async fn create_root(
        &self,
        title: &str,
        description: &str,
        embedding: Vec<f64>,
    ) -> Result<RootTopic, GraphError>;

    /// Crea un subtema bajo `parent_id`, copiando y extendiendo el
    /// `ancestor_path` del padre. `NotFound` si el padre no existe.
    async fn create_node(&self, node: NewNode) -> Result<Node, GraphError>;

    async fn get_node(&self, id: &str) -> Result<Node, GraphError>;

    /// Actualiza título/resumen/tags. Si cambió el texto, `update.embedding`
    /// debe traer el vector nuevo: texto y embedding se confirman juntos.
    async fn update_node(&self, id: &str, update: NodeUpdate) -> Result<Node, GraphError>;

    /// Borra un nodo y todos sus descendientes. `Forbidden` para raíces.
    /// Devuelve los ids borrados (el propio nodo incluido).
    async fn delete_node(&self, id: &str) -> Result<Vec<String>, GraphError>;

    /// Borra el topic completo: todos sus nodos, interacciones y notas.
    async fn delete_root(&self, root_id: &str) -> Result<(), GraphError>;

    async fn get_topic(&self, topic_id: &str) -> Result<RootTopic, GraphError>;

    /// Actualiza título/descripción del topic. Un cambio de título renombra
    /// también el nodo raíz; `embedding` trae entonces el vector nuevo.
    async fn update_topic(
        &self,
        topic_id: &str,
        title: Option<String>,
        description: Option<String>,
        embedding: Option<Vec<f64>>,
    ) -> Result<RootTopic, GraphError>;

    /// Root topics ordenados del más reciente al más antiguo.
    async fn list_root_topics(&self) -> Result<Vec<RootTopic>, GraphError>;

    /// Todos los nodos de un árbol (sin orden garantizado).
    async fn list_nodes(&self, root_id: &str) -> Result<Vec<Node>, GraphError>;

    /// Hijos directos, en orden de inserción.
    async fn list_children(&self, id: &str) -> Result<Vec<NodeBrief>, GraphError>;

    /// Ancestros en orden raíz → padre (excluye el propio nodo).
    async fn list_ancestors(&self, id: &str) -> Result<Vec<NodeBrief>, GraphError>;

    /// Añade una interacción e incrementa `interaction_count` en la misma
    /// operación. Devuelve el contador resultante: sólo el turno cuyo
    /// contador cae exactamente en la cadencia dispara refinamiento.
    async fn record_interaction(
        &self,
        node_id: &str,
        user_message: &str,
        ai_response: &str,
    ) -> Result<i64, GraphError>;

    /// Interacciones en orden cronológico ascendente.
    async fn list_interactions(&self, node_id: &str) -> Result<Vec<NodeInteraction>, GraphError>;

    /// Las `limit` interacciones más recientes, de la más nueva a la más
    /// antigua.
    async fn recent_interactions(
        &self,
        node_id: &str,
        limit: usize,
    ) -> Result<Vec<NodeInteraction>, GraphError>;

    /// Confirma un resumen refinado junto con su embedding y sella
    /// `last_refined_at`.
    async fn set_refined_summary(
        &self,
        node_id: &str,
        summary: &str,
        embedding: Vec<f64>,
    ) -> Result<(), GraphError>;

    async fn add_note(&self, node_id: &str, content: &str) -> Result<NodeNote, GraphError>;

    async fn list_notes(&self, node_id: &str) -> Result<Vec<NodeNote>, GraphError>;

    async fn delete_note(&self, node_id: &str, note_id: &str) -> Result<(), GraphError>;
}
