//! Modelos de dominio del árbol de conocimiento (nodos, topics,
//! interacciones, notas y la decisión de enrutamiento).

use serde::{Deserialize, Serialize};

/// Longitud máxima del título de un nodo.
pub const MAX_TITLE_LEN: usize = 50;
/// Longitud máxima del resumen de un nodo.
pub const MAX_SUMMARY_LEN: usize = 200;
/// Longitud máxima del título de un root topic.
pub const MAX_TOPIC_TITLE_LEN: usize = 100;
/// Longitud máxima de la descripción de un root topic.
pub const MAX_TOPIC_DESCRIPTION_LEN: usize = 500;

/// Un tema del árbol de conocimiento (raíz o subtema).
///
/// Invariantes:
/// - `parent_id == None` exactamente para la raíz, cuyo `id == root_id`.
/// - `ancestor_path` = camino del padre + el propio id; nunca se muta.
/// - `embedding` corresponde siempre al último `title`/`summary`
///   confirmado en el almacén.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub parent_id: Option<String>,
    pub root_id: String,
    pub tags: Vec<String>,
    /// Vector de title+summary; no se serializa hacia la API.
    #[serde(skip_serializing)]
    pub embedding: Vec<f64>,
    /// Hijos directos en orden de inserción; sólo crece, salvo borrado.
    pub children_ids: Vec<String>,
    /// Ids desde la raíz hasta este nodo, ambos inclusive.
    pub ancestor_path: Vec<String>,
    pub interaction_count: i64,
    pub created_at: String,
    pub last_refined_at: String,
}

impl Node {
    /// Profundidad en el árbol (la raíz tiene profundidad 0).
    pub fn depth(&self) -> usize {
        self.ancestor_path.len().saturating_sub(1)
    }
}

/// Registro agregado de un árbol completo, emparejado 1:1 con su nodo raíz.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootTopic {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Contador de nodos vivos del árbol, mantenido en cada alta/baja.
    pub node_count: i64,
    pub created_at: String,
}

/// Registro inmutable de un turno de chat contra un nodo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInteraction {
    pub node_id: String,
    pub user_message: String,
    pub ai_response: String,
    pub timestamp: String,
}

/// Anotación libre del usuario sobre un nodo. No participa en el
/// enrutamiento ni se embebe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeNote {
    pub id: String,
    pub content: String,
    pub created_at: String,
}

/// Proyección ligera de un nodo para listados y contexto de prompts.
#[derive(Debug, Clone, Serialize)]
pub struct NodeBrief {
    pub id: String,
    pub title: String,
    pub summary: String,
}

/// Campos editables de un nodo. El embedding se recalcula fuera del
/// almacén y se confirma en la misma escritura que title/summary.
#[derive(Debug, Clone, Default)]
pub struct NodeUpdate {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub tags: Option<Vec<String>>,
    pub embedding: Option<Vec<f64>>,
}

/// Parámetros de creación de un nodo ya embebido.
#[derive(Debug, Clone)]
pub struct NewNode {
    pub title: String,
    pub summary: String,
    pub parent_id: String,
    pub tags: Vec<String>,
    pub embedding: Vec<f64>,
}

/// Mensaje de una ventana corta de conversación, para resolver
/// referencias pronominales en el enrutamiento.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Salida del motor de colocación. No lleva efectos secundarios: el
/// llamador decide si materializa un `CreateNew`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RoutingDecision {
    UseExisting {
        node_id: String,
        node_title: String,
        reasoning: String,
    },
    CreateNew {
        parent_id: String,
        suggested_title: String,
        suggested_summary: String,
        reasoning: String,
    },
}

/// Recorta una cadena a `max` caracteres respetando límites UTF-8.
pub fn clamp_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_respeta_utf8() {
        assert_eq!(clamp_chars("cálculo diferencial", 7), "cálculo");
        assert_eq!(clamp_chars("abc", 10), "abc");
    }
}
