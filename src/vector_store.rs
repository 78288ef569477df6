//! Contrato del índice vectorial sobre los embeddings de nodos.
//!
//! El índice es una proyección secundaria del almacén de documentos: los
//! vectores se escriben junto con el nodo (insert-on-write) y aquí sólo se
//! consulta. Un índice vacío o caído devuelve `SearchDegraded`, que los
//! llamadores degradan a "sin candidatos", nunca a error fatal.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::GraphError;

/// Resultado de una consulta de similitud, restringida a un árbol.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub parent_id: Option<String>,
    /// Profundidad del nodo en su árbol (raíz = 0); desempata entre
    /// candidatos con la misma similitud.
    pub depth: usize,
    /// Similitud coseno en [0, 1] tras la normalización del proveedor.
    pub score: f64,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Devuelve hasta `top_k` nodos del árbol `root_id` ordenados por
    /// similitud coseno descendente frente a `vector`.
    async fn search_similar(
        &self,
        vector: &[f64],
        root_id: &str,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, GraphError>;
}
