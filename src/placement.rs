//! Motor de colocación: decide a qué nodo del árbol pertenece una
//! pregunta, o dónde crear uno nuevo.
//!
//! El flujo es recuperar → preguntar al oráculo → imponer la política.
//! El oráculo propone; la política dispone: los umbrales de similitud y
//! la validación de ids se aplican SIEMPRE en código, de modo que un
//! oráculo caprichoso no puede duplicar temas ni colgar nodos de ids
//! inexistentes.

use tracing::{info, warn};

use crate::config::RoutingConfig;
use crate::embeddings::{cosine_similarity, EmbeddingProvider};
use crate::error::GraphError;
use crate::models::{clamp_chars, ChatMessage, Node, RoutingDecision, MAX_SUMMARY_LEN, MAX_TITLE_LEN};
use crate::oracle::{LanguageModelOracle, OracleAction, OracleRouting};
use crate::search::WebSearchClient;
use crate::store::GraphStore;
use crate::vector_store::SearchHit;

/// Pregunta a colocar, con el contexto conversacional que ayuda a
/// resolver referencias pronominales ("¿y su edad?").
#[derive(Debug, Clone)]
pub struct PlacementRequest {
    pub question: String,
    pub root_id: String,
    /// Nodo sobre el que el usuario está conversando ahora mismo, si hay.
    pub current_node_id: Option<String>,
    /// Últimos mensajes del hilo, del más antiguo al más reciente.
    pub recent_messages: Vec<ChatMessage>,
}

/// Enruta una pregunta dentro del árbol `root_id`. Sin efectos
/// secundarios: devolver `CreateNew` no crea nada.
pub async fn route_question(
    store: &dyn GraphStore,
    embedder: &dyn EmbeddingProvider,
    oracle: &dyn LanguageModelOracle,
    web_search: Option<&WebSearchClient>,
    cfg: &RoutingConfig,
    request: &PlacementRequest,
) -> Result<RoutingDecision, GraphError> {
    let question_vec = embedder.embed(&request.question).await?;

    let (hits_res, nodes_res) = tokio::join!(
        store.search_similar(&question_vec, &request.root_id, cfg.top_k),
        store.list_nodes(&request.root_id),
    );

    let nodes = nodes_res?;
    let root = nodes
        .iter()
        .find(|n| n.id == request.root_id)
        .ok_or_else(|| GraphError::NotFound(format!("árbol {}", request.root_id)))?
        .clone();

    // el índice es una proyección: si se cae, se enruta sin candidatos
    let mut hits = match hits_res {
        Ok(hits) => hits,
        Err(GraphError::SearchDegraded(reason)) => {
            warn!("Búsqueda vectorial degradada, enrutando sin candidatos: {reason}");
            Vec::new()
        }
        Err(e) => return Err(e),
    };

    // la raíz siempre figura como candidata, con su similitud real
    if !hits.iter().any(|h| h.id == root.id) {
        hits.push(SearchHit {
            id: root.id.clone(),
            title: root.title.clone(),
            summary: root.summary.clone(),
            parent_id: None,
            depth: 0,
            score: cosine_similarity(&question_vec, &root.embedding),
        });
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    }

    let web_context = match web_search {
        Some(client) => client.search(&request.question).await,
        None => None,
    };

    let current_node = match &request.current_node_id {
        Some(id) => Some(store.get_node(id).await?),
        None => None,
    };

    let prompt = build_routing_prompt(
        request,
        current_node.as_ref(),
        &hits,
        &nodes,
        web_context.as_deref(),
        cfg,
    );

    let oracle_routing = oracle.decide_routing(&prompt).await?;
    let decision = enforce_policy(&oracle_routing, &hits, &nodes, &request.root_id, cfg)?;

    match &decision {
        RoutingDecision::UseExisting { node_title, .. } => {
            info!("Pregunta enrutada al nodo existente '{node_title}'");
        }
        RoutingDecision::CreateNew {
            suggested_title, ..
        } => {
            info!("Pregunta enrutada a nodo nuevo '{suggested_title}'");
        }
    }

    Ok(decision)
}

/// Impone la política de colocación sobre la propuesta del oráculo.
///
/// Garantías tras esta función:
/// - todo id de la decisión existe en el árbol;
/// - nunca se crea un nodo cuyo título coincide con un candidato por
///   encima del umbral exacto (se reutiliza ese candidato);
/// - el padre de un nodo nuevo es el candidato mejor puntuado por encima
///   del umbral de parentesco (a igual puntuación, el más profundo), o la
///   raíz si no lo hay.
pub fn enforce_policy(
    routing: &OracleRouting,
    hits: &[SearchHit],
    nodes: &[Node],
    root_id: &str,
    cfg: &RoutingConfig,
) -> Result<RoutingDecision, GraphError> {
    let find_node = |id: &str| nodes.iter().find(|n| n.id == id);

    match routing.action {
        OracleAction::UseExisting => {
            let node_id = routing.existing_node_id.as_deref().ok_or_else(|| {
                GraphError::InvalidRouting(
                    "use_existing sin existingNodeId".to_string(),
                )
            })?;
            let node = find_node(node_id).ok_or_else(|| {
                GraphError::InvalidRouting(format!(
                    "el oráculo apuntó a un nodo inexistente: {node_id}"
                ))
            })?;
            Ok(RoutingDecision::UseExisting {
                node_id: node.id.clone(),
                node_title: node.title.clone(),
                reasoning: routing.reasoning.clone(),
            })
        }
        OracleAction::CreateNew => {
            let title = routing
                .suggested_title
                .as_deref()
                .filter(|t| !t.trim().is_empty())
                .map(|t| clamp_chars(t.trim(), MAX_TITLE_LEN))
                .ok_or_else(|| {
                    GraphError::InvalidRouting(
                        "create_new sin suggestedTitle".to_string(),
                    )
                })?;
            let summary = routing
                .suggested_summary
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| clamp_chars(s, MAX_SUMMARY_LEN))
                .unwrap_or_else(|| format!("Explorando: {title}"));

            // prevención de duplicados: un candidato casi idéntico con el
            // mismo título ES el tema que se pretende crear
            if let Some(twin) = hits.iter().find(|h| {
                h.score >= cfg.exact_threshold && titles_match(&h.title, &title)
            }) {
                return Ok(RoutingDecision::UseExisting {
                    node_id: twin.id.clone(),
                    node_title: twin.title.clone(),
                    reasoning: format!(
                        "Candidato casi idéntico '{}' (similitud {:.2}); se reutiliza en lugar de duplicar",
                        twin.title, twin.score
                    ),
                });
            }

            if let Some(requested) = routing.parent_node_id.as_deref() {
                if find_node(requested).is_none() {
                    return Err(GraphError::InvalidRouting(format!(
                        "el oráculo propuso un padre inexistente: {requested}"
                    )));
                }
            }

            let parent_id = hits
                .iter()
                .filter(|h| h.score >= cfg.related_threshold)
                .max_by(|a, b| {
                    a.score
                        .total_cmp(&b.score)
                        .then(a.depth.cmp(&b.depth))
                })
                .map(|best| best.id.clone())
                .unwrap_or_else(|| root_id.to_string());

            Ok(RoutingDecision::CreateNew {
                parent_id,
                suggested_title: title,
                suggested_summary: summary,
                reasoning: routing.reasoning.clone(),
            })
        }
    }
}

/// Dos títulos hablan del mismo tema si, normalizados, uno contiene al
/// otro ("LeBron James" ~ "LeBron James edad").
fn titles_match(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    !a.is_empty() && !b.is_empty() && (a.contains(&b) || b.contains(&a))
}

fn build_routing_prompt(
    request: &PlacementRequest,
    current_node: Option<&Node>,
    hits: &[SearchHit],
    nodes: &[Node],
    web_context: Option<&str>,
    cfg: &RoutingConfig,
) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!("## Pregunta\n{}\n", request.question));

    if let Some(node) = current_node {
        prompt.push_str(&format!(
            "\n## Nodo actual de la conversación\n'{}' (id: {}). Si la pregunta usa \
             pronombres o referencias implícitas, lo más probable es que se refiera \
             a este tema.\n",
            node.title, node.id
        ));
    }

    if !request.recent_messages.is_empty() {
        prompt.push_str("\n## Conversación reciente\n");
        for msg in &request.recent_messages {
            prompt.push_str(&format!(
                "{}: {}\n",
                msg.role,
                clamp_chars(&msg.content, 300)
            ));
        }
    }

    prompt.push_str(&format!(
        "\n## Candidatos por similitud (umbral exacto {:.2}, umbral de parentesco {:.2})\n",
        cfg.exact_threshold, cfg.related_threshold
    ));
    if hits.is_empty() {
        prompt.push_str("(sin candidatos: el índice vectorial no devolvió resultados)\n");
    }
    for hit in hits {
        prompt.push_str(&format!(
            "- [{:.3}] '{}' (id: {}, profundidad {}): {}\n",
            hit.score,
            hit.title,
            hit.id,
            hit.depth,
            clamp_chars(&hit.summary, 150)
        ));
    }

    prompt.push_str("\n## Árbol completo\n");
    prompt.push_str(&tree_outline(nodes));

    if let Some(web) = web_context {
        prompt.push_str(&format!("\n## Contexto web\n{web}\n"));
    }

    prompt.push_str(
        "\nDecide si la pregunta pertenece a un nodo existente (use_existing) o \
         requiere crear uno nuevo (create_new), conforme a tus reglas y al esquema.\n",
    );

    prompt
}

/// Esquema indentado del árbol, ordenado raíz → hojas.
fn tree_outline(nodes: &[Node]) -> String {
    let mut sorted: Vec<&Node> = nodes.iter().collect();
    sorted.sort_by(|a, b| a.ancestor_path.cmp(&b.ancestor_path));

    let mut outline = String::new();
    for node in sorted {
        let indent = "  ".repeat(node.depth());
        outline.push_str(&format!("{indent}- '{}' (id: {})\n", node.title, node.id));
    }
    outline
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoutingConfig;
    use crate::memory_store::MemoryStore;
    use crate::models::NewNode;
    use async_trait::async_trait;

    fn hit(id: &str, title: &str, depth: usize, score: f64) -> SearchHit {
        SearchHit {
            id: id.to_string(),
            title: title.to_string(),
            summary: String::new(),
            parent_id: None,
            depth,
            score,
        }
    }

    fn node(id: &str, title: &str, path: &[&str]) -> Node {
        Node {
            id: id.to_string(),
            title: title.to_string(),
            summary: format!("Resumen de {title}"),
            parent_id: path.iter().rev().nth(1).map(|p| p.to_string()),
            root_id: path[0].to_string(),
            tags: Vec::new(),
            embedding: Vec::new(),
            children_ids: Vec::new(),
            ancestor_path: path.iter().map(|p| p.to_string()).collect(),
            interaction_count: 0,
            created_at: String::new(),
            last_refined_at: String::new(),
        }
    }

    fn create_new(parent: Option<&str>, title: &str) -> OracleRouting {
        OracleRouting {
            action: OracleAction::CreateNew,
            reasoning: "tema nuevo".to_string(),
            existing_node_id: None,
            parent_node_id: parent.map(|p| p.to_string()),
            suggested_title: Some(title.to_string()),
            suggested_summary: Some(format!("Sobre {title}")),
        }
    }

    fn use_existing(id: &str) -> OracleRouting {
        OracleRouting {
            action: OracleAction::UseExisting,
            reasoning: "ya cubierto".to_string(),
            existing_node_id: Some(id.to_string()),
            parent_node_id: None,
            suggested_title: None,
            suggested_summary: None,
        }
    }

    #[test]
    fn candidato_casi_identico_evita_el_duplicado() {
        let cfg = RoutingConfig::default();
        let nodes = vec![node("r", "Baloncesto", &["r"]), node("lj", "LeBron James", &["r", "lj"])];
        let hits = vec![hit("lj", "LeBron James", 1, 0.91)];

        let decision =
            enforce_policy(&create_new(Some("r"), "LeBron James edad"), &hits, &nodes, "r", &cfg)
                .unwrap();

        match decision {
            RoutingDecision::UseExisting { node_id, .. } => assert_eq!(node_id, "lj"),
            other => panic!("se esperaba use_existing, fue {other:?}"),
        }
    }

    #[test]
    fn sin_candidato_relacionado_el_padre_es_la_raiz() {
        let cfg = RoutingConfig::default();
        let nodes = vec![node("r", "Historia", &["r"]), node("a", "Roma", &["r", "a"])];
        let hits = vec![hit("a", "Roma", 1, 0.40), hit("r", "Historia", 0, 0.30)];

        let decision =
            enforce_policy(&create_new(Some("a"), "Mitología nórdica"), &hits, &nodes, "r", &cfg)
                .unwrap();

        match decision {
            RoutingDecision::CreateNew { parent_id, .. } => assert_eq!(parent_id, "r"),
            other => panic!("se esperaba create_new, fue {other:?}"),
        }
    }

    #[test]
    fn el_padre_es_el_candidato_mas_afin_no_el_ancestro_generico() {
        let cfg = RoutingConfig::default();
        let nodes = vec![
            node("r", "Cálculo", &["r"]),
            node("d", "Derivadas", &["r", "d"]),
        ];
        // el oráculo propone colgar de la raíz, pero 'Derivadas' puntúa 0.90
        let hits = vec![hit("d", "Derivadas", 1, 0.90), hit("r", "Cálculo", 0, 0.70)];

        let decision = enforce_policy(
            &create_new(Some("r"), "Regla de la cadena"),
            &hits,
            &nodes,
            "r",
            &cfg,
        )
        .unwrap();

        match decision {
            RoutingDecision::CreateNew { parent_id, .. } => assert_eq!(parent_id, "d"),
            other => panic!("se esperaba create_new, fue {other:?}"),
        }
    }

    #[test]
    fn a_igual_puntuacion_gana_el_mas_profundo() {
        let cfg = RoutingConfig::default();
        let nodes = vec![
            node("r", "Física", &["r"]),
            node("m", "Mecánica", &["r", "m"]),
            node("c", "Cinemática", &["r", "m", "c"]),
        ];
        let hits = vec![hit("m", "Mecánica", 1, 0.80), hit("c", "Cinemática", 2, 0.80)];

        let decision =
            enforce_policy(&create_new(None, "Caída libre"), &hits, &nodes, "r", &cfg).unwrap();

        match decision {
            RoutingDecision::CreateNew { parent_id, .. } => assert_eq!(parent_id, "c"),
            other => panic!("se esperaba create_new, fue {other:?}"),
        }
    }

    #[test]
    fn id_desconocido_del_oraculo_es_invalid_routing() {
        let cfg = RoutingConfig::default();
        let nodes = vec![node("r", "Química", &["r"])];

        let err = enforce_policy(&use_existing("fantasma"), &[], &nodes, "r", &cfg).unwrap_err();
        assert!(matches!(err, GraphError::InvalidRouting(_)));

        let err = enforce_policy(&create_new(Some("fantasma"), "Enlaces"), &[], &nodes, "r", &cfg)
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidRouting(_)));
    }

    #[test]
    fn create_new_sin_titulo_es_invalid_routing() {
        let cfg = RoutingConfig::default();
        let nodes = vec![node("r", "Arte", &["r"])];
        let mut routing = create_new(None, "x");
        routing.suggested_title = Some("   ".to_string());

        let err = enforce_policy(&routing, &[], &nodes, "r", &cfg).unwrap_err();
        assert!(matches!(err, GraphError::InvalidRouting(_)));
    }

    #[test]
    fn use_existing_valido_conserva_el_razonamiento() {
        let cfg = RoutingConfig::default();
        let nodes = vec![node("r", "Biología", &["r"]), node("c", "La célula", &["r", "c"])];

        let decision = enforce_policy(&use_existing("c"), &[], &nodes, "r", &cfg).unwrap();
        assert_eq!(
            decision,
            RoutingDecision::UseExisting {
                node_id: "c".to_string(),
                node_title: "La célula".to_string(),
                reasoning: "ya cubierto".to_string(),
            }
        );
    }

    // ---- flujo completo con dobles del oráculo y del embedder ----

    struct FixedEmbedder(Vec<f64>);

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f64>, GraphError> {
            Ok(self.0.clone())
        }
    }

    struct ScriptedOracle(OracleRouting);

    #[async_trait]
    impl LanguageModelOracle for ScriptedOracle {
        async fn decide_routing(&self, _prompt: &str) -> Result<OracleRouting, GraphError> {
            Ok(self.0.clone())
        }
        async fn refine_summary(&self, _prompt: &str) -> Result<String, GraphError> {
            unreachable!("no se refina en estos tests")
        }
        async fn tutor_answer(&self, _q: &str, _c: &str) -> Result<String, GraphError> {
            unreachable!("no se responde en estos tests")
        }
    }

    #[tokio::test]
    async fn enruta_contra_un_arbol_real_en_memoria() {
        let store = MemoryStore::new();
        let root = store
            .create_root("Cálculo", "Curso de cálculo", vec![1.0, 0.0, 0.0])
            .await
            .unwrap();
        let derivadas = store
            .create_node(NewNode {
                title: "Derivadas".to_string(),
                summary: "Tasas de cambio".to_string(),
                parent_id: root.id.clone(),
                tags: Vec::new(),
                embedding: vec![0.0, 1.0, 0.0],
            })
            .await
            .unwrap();

        // la pregunta apunta de lleno a 'Derivadas'
        let embedder = FixedEmbedder(vec![0.0, 1.0, 0.0]);
        let oracle = ScriptedOracle(create_new(Some(root.id.as_str()), "Regla de la cadena"));
        let request = PlacementRequest {
            question: "¿Cómo se aplica la regla de la cadena?".to_string(),
            root_id: root.id.clone(),
            current_node_id: None,
            recent_messages: Vec::new(),
        };

        let decision = route_question(
            &store,
            &embedder,
            &oracle,
            None,
            &RoutingConfig::default(),
            &request,
        )
        .await
        .unwrap();

        match decision {
            RoutingDecision::CreateNew { parent_id, .. } => {
                assert_eq!(parent_id, derivadas.id);
            }
            other => panic!("se esperaba create_new, fue {other:?}"),
        }
    }
}
