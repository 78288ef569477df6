//! Registro de interacciones de chat contra nodos.
//!
//! El registro y el incremento de `interaction_count` van en la misma
//! operación del almacén; el contador devuelto es el que decide si toca
//! refinar, así que dos turnos concurrentes nunca disparan el mismo
//! refinamiento dos veces.

use crate::error::GraphError;
use crate::models::clamp_chars;
use crate::store::GraphStore;

/// Tope de almacenamiento por mensaje registrado.
const MAX_STORED_MESSAGE_CHARS: usize = 2000;

/// Registra un turno (pregunta + respuesta) contra un nodo y devuelve el
/// contador de interacciones resultante.
pub async fn record_turn(
    store: &dyn GraphStore,
    node_id: &str,
    user_message: &str,
    ai_response: &str,
) -> Result<i64, GraphError> {
    let user_message = clamp_chars(user_message.trim(), MAX_STORED_MESSAGE_CHARS);
    let ai_response = clamp_chars(ai_response.trim(), MAX_STORED_MESSAGE_CHARS);
    store
        .record_interaction(node_id, &user_message, &ai_response)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;

    #[tokio::test]
    async fn el_contador_crece_de_uno_en_uno() {
        let store = MemoryStore::new();
        let root = store
            .create_root("Música", "Teoría musical", vec![1.0, 0.0])
            .await
            .unwrap();

        for expected in 1..=3 {
            let count = record_turn(&store, &root.id, "¿Qué es una escala?", "Una sucesión...")
                .await
                .unwrap();
            assert_eq!(count, expected);
        }

        let stored = store.list_interactions(&root.id).await.unwrap();
        assert_eq!(stored.len(), 3);
    }

    #[tokio::test]
    async fn nodo_inexistente_es_not_found() {
        let store = MemoryStore::new();
        let err = record_turn(&store, "fantasma", "hola", "mundo")
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::NotFound(_)));
    }
}
