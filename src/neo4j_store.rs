//! Implementación del `GraphStore` sobre Neo4j.
//!
//! El grafo guarda tres etiquetas: `:Topic` (agregado por árbol), `:Node`
//! (temas, con su embedding como propiedad indexada vectorialmente) y los
//! registros planos `:Interaction` y `:Note`. Las escrituras multi-
//! documento (alta de nodo, borrados en cascada) van en una única
//! transacción Bolt.

use async_trait::async_trait;
use chrono::Utc;
use neo4rs::{query, Graph, Query, Row};
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::GraphError;
use crate::models::{
    NewNode, Node, NodeBrief, NodeInteraction, NodeNote, NodeUpdate, RootTopic,
};
use crate::store::GraphStore;
use crate::vector_store::{SearchHit, VectorIndex};

const VECTOR_INDEX_NAME: &str = "nodeEmbeddingIndex";

pub async fn connect_from_config(cfg: &AppConfig) -> anyhow::Result<Graph> {
    let url = Url::parse(&cfg.neo4j_uri)?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, &cfg.neo4j_user, &cfg.neo4j_password).await?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

pub struct Neo4jStore {
    graph: Graph,
}

impl Neo4jStore {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    /// Crea los constraints básicos para :Topic, :Node y :Note.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        let statements = [
            "CREATE CONSTRAINT topic_id IF NOT EXISTS
             FOR (t:Topic)
             REQUIRE t.id IS UNIQUE",
            "CREATE CONSTRAINT node_id IF NOT EXISTS
             FOR (n:Node)
             REQUIRE n.id IS UNIQUE",
            "CREATE CONSTRAINT note_id IF NOT EXISTS
             FOR (nt:Note)
             REQUIRE nt.id IS UNIQUE",
        ];

        for stmt in statements {
            self.graph.run(query(stmt)).await?;
        }

        info!("Esquema de Neo4j asegurado (constraints básicos creados).");
        Ok(())
    }

    /// Garantiza que el índice vectorial sobre `:Node(embedding)` exista.
    pub async fn ensure_vector_index(&self, dimensions: usize) -> anyhow::Result<()> {
        let mut cursor = self
            .graph
            .execute(
                query("SHOW VECTOR INDEXES YIELD name WHERE name = $name RETURN name")
                    .param("name", VECTOR_INDEX_NAME),
            )
            .await?;

        if cursor.next().await?.is_some() {
            info!("Índice vectorial '{VECTOR_INDEX_NAME}' ya existe.");
            return Ok(());
        }

        let cypher = format!(
            "\
CREATE VECTOR INDEX {VECTOR_INDEX_NAME}
FOR (n:Node)
ON (n.embedding)
OPTIONS {{
  indexConfig: {{
    `vector.dimensions`: {dimensions},
    `vector.similarity_function`: 'cosine'
  }}
}}"
        );

        self.graph.run(query(&cypher)).await?;
        info!("Índice vectorial '{VECTOR_INDEX_NAME}' creado.");
        Ok(())
    }

    async fn run_txn(&self, queries: Vec<Query>) -> Result<(), GraphError> {
        let txn = self.graph.start_txn().await?;
        txn.run_queries(queries).await?;
        txn.commit().await?;
        Ok(())
    }

    /// Ids del nodo y de todos sus descendientes, vía pertenencia al
    /// `ancestor_path`.
    async fn subtree_ids(&self, id: &str) -> Result<Vec<String>, GraphError> {
        let mut cursor = self
            .graph
            .execute(
                query("MATCH (d:Node) WHERE $id IN d.ancestor_path RETURN d.id AS id")
                    .param("id", id),
            )
            .await?;

        let mut ids = Vec::new();
        while let Some(row) = cursor.next().await? {
            let id: String = row
                .get("id")
                .ok_or_else(|| GraphError::Storage("falta 'id' en el subárbol".into()))?;
            ids.push(id);
        }
        Ok(ids)
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

const NODE_COLUMNS: &str = "n.id AS id, n.title AS title, n.summary AS summary, \
     n.parent_id AS parent_id, n.root_id AS root_id, n.tags AS tags, \
     n.embedding AS embedding, n.children_ids AS children_ids, \
     n.ancestor_path AS ancestor_path, n.interaction_count AS interaction_count, \
     n.created_at AS created_at, n.last_refined_at AS last_refined_at";

fn node_from_row(row: &Row) -> Result<Node, GraphError> {
    let missing = |field: &str| GraphError::Storage(format!("falta '{field}' en la fila de nodo"));
    Ok(Node {
        id: row.get("id").ok_or_else(|| missing("id"))?,
        title: row.get("title").ok_or_else(|| missing("title"))?,
        summary: row.get("summary").ok_or_else(|| missing("summary"))?,
        parent_id: row.get("parent_id"),
        root_id: row.get("root_id").ok_or_else(|| missing("root_id"))?,
        tags: row.get::<Vec<String>>("tags").unwrap_or_default(),
        embedding: row.get::<Vec<f64>>("embedding").unwrap_or_default(),
        children_ids: row.get::<Vec<String>>("children_ids").unwrap_or_default(),
        ancestor_path: row
            .get("ancestor_path")
            .ok_or_else(|| missing("ancestor_path"))?,
        interaction_count: row.get("interaction_count").unwrap_or(0),
        created_at: row.get("created_at").ok_or_else(|| missing("created_at"))?,
        last_refined_at: row
            .get("last_refined_at")
            .ok_or_else(|| missing("last_refined_at"))?,
    })
}

fn topic_from_row(row: &Row) -> Result<RootTopic, GraphError> {
    let missing = |field: &str| GraphError::Storage(format!("falta '{field}' en la fila de topic"));
    Ok(RootTopic {
        id: row.get("id").ok_or_else(|| missing("id"))?,
        title: row.get("title").ok_or_else(|| missing("title"))?,
        description: row.get("description").ok_or_else(|| missing("description"))?,
        node_count: row.get("node_count").unwrap_or(0),
        created_at: row.get("created_at").ok_or_else(|| missing("created_at"))?,
    })
}

#[async_trait]
impl VectorIndex for Neo4jStore {
    async fn search_similar(
        &self,
        vector: &[f64],
        root_id: &str,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, GraphError> {
        // queryNodes no filtra por árbol: sobremuestreamos y filtramos.
        let oversample = (top_k * 4) as i64;
        let result = self
            .graph
            .execute(
                query(
                    "CALL db.index.vector.queryNodes($index_name, $k, $embedding)
                     YIELD node, score
                     WHERE node.root_id = $root_id
                     RETURN node.id AS id, node.title AS title,
                            node.summary AS summary, node.parent_id AS parent_id,
                            size(node.ancestor_path) - 1 AS depth, score
                     ORDER BY score DESC
                     LIMIT $limit",
                )
                .param("index_name", VECTOR_INDEX_NAME)
                .param("k", oversample)
                .param("embedding", vector.to_vec())
                .param("root_id", root_id)
                .param("limit", top_k as i64),
            )
            .await;

        let mut cursor = match result {
            Ok(cursor) => cursor,
            Err(e) => return Err(GraphError::SearchDegraded(e.to_string())),
        };

        let mut hits = Vec::new();
        loop {
            let row = match cursor.next().await {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(e) => return Err(GraphError::SearchDegraded(e.to_string())),
            };
            let (Some(id), Some(title), Some(score)) = (
                row.get::<String>("id"),
                row.get::<String>("title"),
                row.get::<f64>("score"),
            ) else {
                warn!("Fila incompleta del índice vectorial; se ignora");
                continue;
            };
            hits.push(SearchHit {
                id,
                title,
                summary: row.get::<String>("summary").unwrap_or_default(),
                parent_id: row.get("parent_id"),
                depth: row.get::<i64>("depth").unwrap_or(0).max(0) as usize,
                score,
            });
        }

        Ok(hits)
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn create_root(
        &self,
        title: &str,
        description: &str,
        embedding: Vec<f64>,
    ) -> Result<RootTopic, GraphError> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (t:Topic) WHERE toLower(t.title) = toLower($title)
                     RETURN t.id AS id LIMIT 1",
                )
                .param("title", title),
            )
            .await?;
        if let Some(row) = cursor.next().await? {
            let existing_id: String = row
                .get("id")
                .ok_or_else(|| GraphError::Storage("falta 'id' en el duplicado".into()))?;
            return Err(GraphError::DuplicateTitle {
                title: title.to_string(),
                existing_id,
            });
        }

        let topic_id = Uuid::new_v4().to_string();
        let now = now_rfc3339();

        self.run_txn(vec![
            query(
                "CREATE (t:Topic {id: $id, title: $title, description: $description,
                                  node_count: 1, created_at: $now})",
            )
            .param("id", topic_id.clone())
            .param("title", title)
            .param("description", description)
            .param("now", now.clone()),
            query(
                "CREATE (n:Node {id: $id, title: $title, summary: $summary,
                                 root_id: $id, tags: [], embedding: $embedding,
                                 children_ids: [], ancestor_path: [$id],
                                 interaction_count: 0, created_at: $now,
                                 last_refined_at: $now})",
            )
            .param("id", topic_id.clone())
            .param("title", title)
            .param("summary", description)
            .param("embedding", embedding)
            .param("now", now.clone()),
        ])
        .await?;

        Ok(RootTopic {
            id: topic_id,
            title: title.to_string(),
            description: description.to_string(),
            node_count: 1,
            created_at: now,
        })
    }

    async fn create_node(&self, new: NewNode) -> Result<Node, GraphError> {
        let parent = self.get_node(&new.parent_id).await.map_err(|e| match e {
            GraphError::NotFound(_) => {
                GraphError::NotFound(format!("nodo padre {}", new.parent_id))
            }
            other => other,
        })?;

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
            last_refined_at: now.clone(),
        };

        self.run_txn(vec![
            query(
                "CREATE (n:Node {id: $id, title: $title, summary: $summary,
                                 parent_id: $parent_id, root_id: $root_id,
                                 tags: $tags, embedding: $embedding,
                                 children_ids: [], ancestor_path: $ancestor_path,
                                 interaction_count: 0, created_at: $now,
                                 last_refined_at: $now})",
            )
            .param("id", node.id.clone())
            .param("title", node.title.clone())
            .param("summary", node.summary.clone())
            .param("parent_id", parent.id.clone())
            .param("root_id", node.root_id.clone())
            .param("tags", node.tags.clone())
            .param("embedding", node.embedding.clone())
            .param("ancestor_path", node.ancestor_path.clone())
            .param("now", now),
            query(
                "MATCH (p:Node {id: $parent_id})
                 SET p.children_ids = coalesce(p.children_ids, []) + $id",
            )
            .param("parent_id", parent.id.clone())
            .param("id", node.id.clone()),
            query("MATCH (t:Topic {id: $root_id}) SET t.node_count = t.node_count + 1")
                .param("root_id", node.root_id.clone()),
        ])
        .await?;

        Ok(node)
    }

    async fn get_node(&self, id: &str) -> Result<Node, GraphError> {
        let mut cursor = self
            .graph
            .execute(
                query(&format!("MATCH (n:Node {{id: $id}}) RETURN {NODE_COLUMNS}"))
                    .param("id", id),
            )
            .await?;
        match cursor.next().await? {
            Some(row) => node_from_row(&row),
            None => Err(GraphError::NotFound(format!("nodo {id}"))),
        }
    }

    async fn update_node(&self, id: &str, update: NodeUpdate) -> Result<Node, GraphError> {
        let mut node = self.get_node(id).await?;

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

        // texto y embedding viajan en la misma escritura
        self.graph
            .run(
                query(
                    "MATCH (n:Node {id: $id})
                     SET n.title = $title, n.summary = $summary,
                         n.tags = $tags, n.embedding = $embedding",
                )
                .param("id", id)
                .param("title", node.title.clone())
                .param("summary", node.summary.clone())
                .param("tags", node.tags.clone())
                .param("embedding", node.embedding.clone()),
            )
            .await?;

        Ok(node)
    }

    async fn delete_node(&self, id: &str) -> Result<Vec<String>, GraphError> {
        let node = self.get_node(id).await?;
        let parent_id = node.parent_id.clone().ok_or_else(|| {
            GraphError::Forbidden(format!("el nodo {id} es raíz; usa el borrado de topics"))
        })?;

        let doomed = self.subtree_ids(id).await?;

        self.run_txn(vec![
            query("MATCH (d:Node) WHERE d.id IN $ids DETACH DELETE d")
                .param("ids", doomed.clone()),
            query("MATCH (i:Interaction) WHERE i.node_id IN $ids DELETE i")
                .param("ids", doomed.clone()),
            query("MATCH (nt:Note) WHERE nt.node_id IN $ids DELETE nt")
                .param("ids", doomed.clone()),
            query(
                "MATCH (p:Node {id: $parent_id})
                 SET p.children_ids = [c IN p.children_ids WHERE c <> $id]",
            )
            .param("parent_id", parent_id)
            .param("id", id),
            query(
                "MATCH (t:Topic {id: $root_id})
                 SET t.node_count = t.node_count - $removed",
            )
            .param("root_id", node.root_id)
            .param("removed", doomed.len() as i64),
        ])
        .await?;

        Ok(doomed)
    }

    async fn delete_root(&self, root_id: &str) -> Result<(), GraphError> {
        self.get_topic(root_id).await?;

        self.run_txn(vec![
            query(
                "MATCH (n:Node {root_id: $root_id})
                 WITH collect(n.id) AS ids
                 MATCH (i:Interaction) WHERE i.node_id IN ids
                 DELETE i",
            )
            .param("root_id", root_id),
            query(
                "MATCH (n:Node {root_id: $root_id})
                 WITH collect(n.id) AS ids
                 MATCH (nt:Note) WHERE nt.node_id IN ids
                 DELETE nt",
            )
            .param("root_id", root_id),
            query("MATCH (n:Node {root_id: $root_id}) DETACH DELETE n")
                .param("root_id", root_id),
            query("MATCH (t:Topic {id: $root_id}) DELETE t").param("root_id", root_id),
        ])
        .await
    }

    async fn get_topic(&self, topic_id: &str) -> Result<RootTopic, GraphError> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (t:Topic {id: $id})
                     RETURN t.id AS id, t.title AS title, t.description AS description,
                            t.node_count AS node_count, t.created_at AS created_at",
                )
                .param("id", topic_id),
            )
            .await?;
        match cursor.next().await? {
            Some(row) => topic_from_row(&row),
            None => Err(GraphError::NotFound(format!("topic {topic_id}"))),
        }
    }

    async fn update_topic(
        &self,
        topic_id: &str,
        title: Option<String>,
        description: Option<String>,
        embedding: Option<Vec<f64>>,
    ) -> Result<RootTopic, GraphError> {
        let mut topic = self.get_topic(topic_id).await?;
        if let Some(title) = &title {
            topic.title = title.clone();
        }
        if let Some(description) = &description {
            topic.description = description.clone();
        }

        let mut queries = vec![query(
            "MATCH (t:Topic {id: $id}) SET t.title = $title, t.description = $description",
        )
        .param("id", topic_id)
        .param("title", topic.title.clone())
        .param("description", topic.description.clone())];

        // el nodo raíz comparte título/resumen con el topic
        if title.is_some() || description.is_some() {
            let base = query(
                "MATCH (n:Node {id: $id})
                 SET n.title = $title, n.summary = $summary",
            )
            .param("id", topic_id)
            .param("title", topic.title.clone())
            .param("summary", topic.description.clone());
            queries.push(base);
            if let Some(embedding) = embedding {
                queries.push(
                    query("MATCH (n:Node {id: $id}) SET n.embedding = $embedding")
                        .param("id", topic_id)
                        .param("embedding", embedding),
                );
            }
        }

        self.run_txn(queries).await?;
        Ok(topic)
    }

    async fn list_root_topics(&self) -> Result<Vec<RootTopic>, GraphError> {
        let mut cursor = self
            .graph
            .execute(query(
                "MATCH (t:Topic)
                 RETURN t.id AS id, t.title AS title, t.description AS description,
                        t.node_count AS node_count, t.created_at AS created_at
                 ORDER BY t.created_at DESC
                 LIMIT 50",
            ))
            .await?;

        let mut topics = Vec::new();
        while let Some(row) = cursor.next().await? {
            topics.push(topic_from_row(&row)?);
        }
        Ok(topics)
    }

    async fn list_nodes(&self, root_id: &str) -> Result<Vec<Node>, GraphError> {
        let mut cursor = self
            .graph
            .execute(
                query(&format!(
                    "MATCH (n:Node {{root_id: $root_id}}) RETURN {NODE_COLUMNS}"
                ))
                .param("root_id", root_id),
            )
            .await?;

        let mut nodes = Vec::new();
        while let Some(row) = cursor.next().await? {
            nodes.push(node_from_row(&row)?);
        }
        Ok(nodes)
    }

    async fn list_children(&self, id: &str) -> Result<Vec<NodeBrief>, GraphError> {
        let node = self.get_node(id).await?;
        let briefs = self.briefs_by_ids(&node.children_ids).await?;
        Ok(order_briefs(&node.children_ids, briefs))
    }

    async fn list_ancestors(&self, id: &str) -> Result<Vec<NodeBrief>, GraphError> {
        let node = self.get_node(id).await?;
        let ancestor_ids: Vec<String> = node
            .ancestor_path
            .iter()
            .filter(|a| a.as_str() != id)
            .cloned()
            .collect();
        let briefs = self.briefs_by_ids(&ancestor_ids).await?;
        Ok(order_briefs(&ancestor_ids, briefs))
    }

    async fn record_interaction(
        &self,
        node_id: &str,
        user_message: &str,
        ai_response: &str,
    ) -> Result<i64, GraphError> {
        // incremento y alta del registro en una sola sentencia: el contador
        // devuelto decide el disparo del refinamiento sin carreras
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (n:Node {id: $id})
                     SET n.interaction_count = coalesce(n.interaction_count, 0) + 1
                     CREATE (i:Interaction {node_id: $id, user_message: $user_message,
                                            ai_response: $ai_response, timestamp: $now})
                     RETURN n.interaction_count AS count",
                )
                .param("id", node_id)
                .param("user_message", user_message)
                .param("ai_response", ai_response)
                .param("now", now_rfc3339()),
            )
            .await?;

        match cursor.next().await? {
            Some(row) => row
                .get("count")
                .ok_or_else(|| GraphError::Storage("falta 'count' en la interacción".into())),
            None => Err(GraphError::NotFound(format!("nodo {node_id}"))),
        }
    }

    async fn list_interactions(
        &self,
        node_id: &str,
    ) -> Result<Vec<NodeInteraction>, GraphError> {
        self.get_node(node_id).await?;
        self.fetch_interactions(node_id, "ASC", None).await
    }

    async fn recent_interactions(
        &self,
        node_id: &str,
        limit: usize,
    ) -> Result<Vec<NodeInteraction>, GraphError> {
        self.get_node(node_id).await?;
        self.fetch_interactions(node_id, "DESC", Some(limit)).await
    }

    async fn set_refined_summary(
        &self,
        node_id: &str,
        summary: &str,
        embedding: Vec<f64>,
    ) -> Result<(), GraphError> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (n:Node {id: $id})
                     SET n.summary = $summary, n.embedding = $embedding,
                         n.last_refined_at = $now
                     RETURN n.id AS id",
                )
                .param("id", node_id)
                .param("summary", summary)
                .param("embedding", embedding)
                .param("now", now_rfc3339()),
            )
            .await?;

        match cursor.next().await? {
            Some(_) => Ok(()),
            None => Err(GraphError::NotFound(format!("nodo {node_id}"))),
        }
    }

    async fn add_note(&self, node_id: &str, content: &str) -> Result<NodeNote, GraphError> {
        self.get_node(node_id).await?;

        let note = NodeNote {
            id: Uuid::new_v4().to_string(),
            content: content.to_string(),
            created_at: now_rfc3339(),
        };
        self.graph
            .run(
                query(
                    "CREATE (nt:Note {id: $id, node_id: $node_id,
                                      content: $content, created_at: $now})",
                )
                .param("id", note.id.clone())
                .param("node_id", node_id)
                .param("content", note.content.clone())
                .param("now", note.created_at.clone()),
            )
            .await?;
        Ok(note)
    }

    async fn list_notes(&self, node_id: &str) -> Result<Vec<NodeNote>, GraphError> {
        self.get_node(node_id).await?;
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (nt:Note {node_id: $node_id})
                     RETURN nt.id AS id, nt.content AS content, nt.created_at AS created_at
                     ORDER BY nt.created_at ASC",
                )
                .param("node_id", node_id),
            )
            .await?;

        let mut notes = Vec::new();
        while let Some(row) = cursor.next().await? {
            let missing =
                |field: &str| GraphError::Storage(format!("falta '{field}' en la fila de nota"));
            notes.push(NodeNote {
                id: row.get("id").ok_or_else(|| missing("id"))?,
                content: row.get("content").ok_or_else(|| missing("content"))?,
                created_at: row.get("created_at").ok_or_else(|| missing("created_at"))?,
            });
        }
        Ok(notes)
    }

    async fn delete_note(&self, node_id: &str, note_id: &str) -> Result<(), GraphError> {
        self.get_node(node_id).await?;
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (nt:Note {id: $note_id, node_id: $node_id})
                     WITH nt, nt.id AS deleted
                     DELETE nt
                     RETURN deleted",
                )
                .param("note_id", note_id)
                .param("node_id", node_id),
            )
            .await?;

        match cursor.next().await? {
            Some(_) => Ok(()),
            None => Err(GraphError::NotFound(format!("nota {note_id}"))),
        }
    }
}

impl Neo4jStore {
    async fn briefs_by_ids(&self, ids: &[String]) -> Result<Vec<NodeBrief>, GraphError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (n:Node) WHERE n.id IN $ids
                     RETURN n.id AS id, n.title AS title, n.summary AS summary",
                )
                .param("ids", ids.to_vec()),
            )
            .await?;

        let mut briefs = Vec::new();
        while let Some(row) = cursor.next().await? {
            let missing =
                |field: &str| GraphError::Storage(format!("falta '{field}' en la proyección"));
            briefs.push(NodeBrief {
                id: row.get("id").ok_or_else(|| missing("id"))?,
                title: row.get("title").ok_or_else(|| missing("title"))?,
                summary: row.get::<String>("summary").unwrap_or_default(),
            });
        }
        Ok(briefs)
    }

    async fn fetch_interactions(
        &self,
        node_id: &str,
        order: &str,
        limit: Option<usize>,
    ) -> Result<Vec<NodeInteraction>, GraphError> {
        let limit_clause = limit.map(|l| format!(" LIMIT {l}")).unwrap_or_default();
        let cypher = format!(
            "MATCH (i:Interaction {{node_id: $node_id}})
             RETURN i.node_id AS node_id, i.user_message AS user_message,
                    i.ai_response AS ai_response, i.timestamp AS timestamp
             ORDER BY i.timestamp {order}{limit_clause}"
        );

        let mut cursor = self
            .graph
            .execute(query(&cypher).param("node_id", node_id))
            .await?;

        let mut interactions = Vec::new();
        while let Some(row) = cursor.next().await? {
            let missing = |field: &str| {
                GraphError::Storage(format!("falta '{field}' en la fila de interacción"))
            };
            interactions.push(NodeInteraction {
                node_id: row.get("node_id").ok_or_else(|| missing("node_id"))?,
                user_message: row
                    .get("user_message")
                    .ok_or_else(|| missing("user_message"))?,
                ai_response: row
                    .get("ai_response")
                    .ok_or_else(|| missing("ai_response"))?,
                timestamp: row.get("timestamp").ok_or_else(|| missing("timestamp"))?,
            });
        }
        Ok(interactions)
    }
}

/// Reordena las proyecciones según la lista de ids de referencia.
fn order_briefs(ids: &[String], briefs: Vec<NodeBrief>) -> Vec<NodeBrief> {
    ids.iter()
        .filter_map(|id| briefs.iter().find(|b| &b.id == id).cloned())
        .collect()
}
