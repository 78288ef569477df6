//! Taxonomía de errores del núcleo del grafo.
//!
//! Los errores de la ruta de escritura (`NotFound`, `Forbidden`,
//! `DuplicateTitle`, `Storage`) se propagan siempre al llamador sin efectos
//! parciales. `SearchDegraded` y `RefinementFailed` son recuperables por
//! diseño: el llamador degrada y continúa.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    /// El nodo, topic o padre referenciado no existe.
    #[error("no encontrado: {0}")]
    NotFound(String),

    /// Operación estructuralmente prohibida (ej.: borrar un nodo raíz
    /// por la ruta de nodos).
    #[error("operación prohibida: {0}")]
    Forbidden(String),

    /// Ya existe un root topic con el mismo título (comparación
    /// insensible a mayúsculas). Incluye el id existente para que el
    /// llamador pueda ofrecer navegación en lugar de crear.
    #[error("ya existe un topic con el título '{title}' (id {existing_id})")]
    DuplicateTitle { title: String, existing_id: String },

    /// El proveedor de embeddings falló. Nunca se enruta sin embedding:
    /// una decisión sin base es peor que un rechazo.
    #[error("fallo generando embedding: {0}")]
    EmbeddingFailed(String),

    /// El oráculo LLM falló o devolvió una salida no parseable.
    #[error("fallo en la decisión de enrutamiento: {0}")]
    RoutingFailed(String),

    /// El oráculo devolvió ids que no existen en el grafo.
    #[error("decisión de enrutamiento inválida: {0}")]
    InvalidRouting(String),

    /// El refinamiento de resumen falló; se conserva el resumen anterior.
    #[error("fallo refinando el resumen: {0}")]
    RefinementFailed(String),

    /// El índice vectorial o la búsqueda web no están disponibles.
    #[error("búsqueda degradada: {0}")]
    SearchDegraded(String),

    /// Fallo generando la respuesta de tutoría.
    #[error("fallo generando la respuesta: {0}")]
    CompletionFailed(String),

    /// Error del almacén de documentos (Neo4j / backend embebido).
    #[error("error de almacenamiento: {0}")]
    Storage(String),
}

impl From<neo4rs::Error> for GraphError {
    fn from(e: neo4rs::Error) -> Self {
        GraphError::Storage(e.to_string())
    }
}
