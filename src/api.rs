//! API HTTP del árbol de conocimiento.
//!
//! Los handlers validan y recortan la entrada, delegan en el núcleo y
//! traducen la taxonomía de errores a códigos HTTP. Todo el cuerpo de
//! error es `{"error": ...}`; el duplicado de topic añade `existingId`
//! para que el cliente pueda ofrecer navegación en lugar de crear.

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{
    app_state::AppState,
    chat::ChatRequest,
    embeddings::node_embedding_text,
    error::GraphError,
    models::{
        clamp_chars, ChatMessage, NewNode, NodeUpdate, MAX_SUMMARY_LEN, MAX_TITLE_LEN,
        MAX_TOPIC_DESCRIPTION_LEN, MAX_TOPIC_TITLE_LEN,
    },
    placement::{self, PlacementRequest},
    refiner,
};

// --- Payloads de la API ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTopicPayload {
    title: String,
    description: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTopicPayload {
    title: Option<String>,
    description: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodePayload {
    parent_id: String,
    title: String,
    summary: String,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNodePayload {
    title: Option<String>,
    summary: Option<String>,
    tags: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionPayload {
    user_message: String,
    ai_response: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotePayload {
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteQuestionPayload {
    question: String,
    root_id: String,
    current_node_id: Option<String>,
    #[serde(default)]
    recent_messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    question: String,
    root_id: String,
    current_node_id: Option<String>,
    #[serde(default)]
    recent_messages: Vec<ChatMessage>,
}

// --- Traducción de errores ---

type ApiError = (StatusCode, Json<serde_json::Value>);

fn map_error(e: GraphError) -> ApiError {
    let status = match &e {
        GraphError::NotFound(_) => StatusCode::NOT_FOUND,
        GraphError::Forbidden(_) => StatusCode::FORBIDDEN,
        GraphError::DuplicateTitle { .. } => StatusCode::CONFLICT,
        GraphError::InvalidRouting(_) => StatusCode::UNPROCESSABLE_ENTITY,
        GraphError::EmbeddingFailed(_)
        | GraphError::RoutingFailed(_)
        | GraphError::RefinementFailed(_)
        | GraphError::CompletionFailed(_) => StatusCode::BAD_GATEWAY,
        GraphError::SearchDegraded(_) => StatusCode::SERVICE_UNAVAILABLE,
        GraphError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let body = match &e {
        GraphError::DuplicateTitle { existing_id, .. } => {
            json!({ "error": e.to_string(), "existingId": existing_id })
        }
        _ => json!({ "error": e.to_string() }),
    };

    (status, Json(body))
}

fn bad_request(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .route("/api/topics", get(list_topics_handler).post(create_topic_handler))
        .route(
            "/api/topics/:topic_id",
            get(get_topic_handler)
                .patch(update_topic_handler)
                .delete(delete_topic_handler),
        )
        .route("/api/topics/:topic_id/nodes", get(list_nodes_handler))
        .route("/api/nodes", post(create_node_handler))
        .route(
            "/api/nodes/:node_id",
            get(get_node_handler)
                .patch(update_node_handler)
                .delete(delete_node_handler),
        )
        .route("/api/nodes/:node_id/children", get(list_children_handler))
        .route("/api/nodes/:node_id/ancestors", get(list_ancestors_handler))
        .route(
            "/api/nodes/:node_id/interactions",
            get(list_interactions_handler).post(record_interaction_handler),
        )
        .route("/api/nodes/:node_id/refine", post(refine_node_handler))
        .route(
            "/api/nodes/:node_id/notes",
            get(list_notes_handler).post(add_note_handler),
        )
        .route("/api/nodes/:node_id/notes/:note_id", delete(delete_note_handler))
        .route("/api/route-question", post(route_question_handler))
        .route("/api/chat", post(chat_handler))
        .with_state(app_state)
}

// --- Handlers: topics ---

#[axum::debug_handler]
async fn create_topic_handler(
    State(state): State<AppState>,
    Json(payload): Json<CreateTopicPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let title = clamp_chars(payload.title.trim(), MAX_TOPIC_TITLE_LEN);
    let description = clamp_chars(payload.description.trim(), MAX_TOPIC_DESCRIPTION_LEN);
    if title.is_empty() {
        return Err(bad_request("El título del topic no puede estar vacío."));
    }

    let embedding = state
        .embedder
        .embed(&node_embedding_text(&title, &description))
        .await
        .map_err(map_error)?;

    let topic = state
        .store
        .create_root(&title, &description, embedding)
        .await
        .map_err(map_error)?;

    info!("Topic '{}' creado (id {})", topic.title, topic.id);
    Ok((StatusCode::CREATED, Json(topic)))
}

#[axum::debug_handler]
async fn list_topics_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let topics = state.store.list_root_topics().await.map_err(map_error)?;
    Ok(Json(topics))
}

#[axum::debug_handler]
async fn get_topic_handler(
    State(state): State<AppState>,
    Path(topic_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let topic = state.store.get_topic(&topic_id).await.map_err(map_error)?;
    Ok(Json(topic))
}

#[axum::debug_handler]
async fn update_topic_handler(
    State(state): State<AppState>,
    Path(topic_id): Path<String>,
    Json(payload): Json<UpdateTopicPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let title = payload
        .title
        .map(|t| clamp_chars(t.trim(), MAX_TOPIC_TITLE_LEN))
        .filter(|t| !t.is_empty());
    let description = payload
        .description
        .map(|d| clamp_chars(d.trim(), MAX_TOPIC_DESCRIPTION_LEN));

    // al cambiar el texto, el nodo raíz necesita un embedding nuevo
    let embedding = if title.is_some() || description.is_some() {
        let current = state.store.get_topic(&topic_id).await.map_err(map_error)?;
        let new_title = title.clone().unwrap_or(current.title);
        let new_description = description.clone().unwrap_or(current.description);
        Some(
            state
                .embedder
                .embed(&node_embedding_text(&new_title, &new_description))
                .await
                .map_err(map_error)?,
        )
    } else {
        None
    };

    let topic = state
        .store
        .update_topic(&topic_id, title, description, embedding)
        .await
        .map_err(map_error)?;
    Ok(Json(topic))
}

#[axum::debug_handler]
async fn delete_topic_handler(
    State(state): State<AppState>,
    Path(topic_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.delete_root(&topic_id).await.map_err(map_error)?;
    info!("Topic {topic_id} borrado con todo su árbol");
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
async fn list_nodes_handler(
    State(state): State<AppState>,
    Path(topic_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // la existencia del topic valida el id antes de listar
    state.store.get_topic(&topic_id).await.map_err(map_error)?;
    let nodes = state.store.list_nodes(&topic_id).await.map_err(map_error)?;
    Ok(Json(nodes))
}

// --- Handlers: nodos ---

#[axum::debug_handler]
async fn create_node_handler(
    State(state): State<AppState>,
    Json(payload): Json<CreateNodePayload>,
) -> Result<impl IntoResponse, ApiError> {
    let title = clamp_chars(payload.title.trim(), MAX_TITLE_LEN);
    let summary = clamp_chars(payload.summary.trim(), MAX_SUMMARY_LEN);
    if title.is_empty() {
        return Err(bad_request("El título del nodo no puede estar vacío."));
    }

    let embedding = state
        .embedder
        .embed(&node_embedding_text(&title, &summary))
        .await
        .map_err(map_error)?;

    let node = state
        .store
        .create_node(NewNode {
            title,
            summary,
            parent_id: payload.parent_id,
            tags: payload.tags,
            embedding,
        })
        .await
        .map_err(map_error)?;

    info!("Nodo '{}' creado bajo {:?}", node.title, node.parent_id);
    Ok((StatusCode::CREATED, Json(node)))
}

#[axum::debug_handler]
async fn get_node_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let node = state.store.get_node(&node_id).await.map_err(map_error)?;
    Ok(Json(node))
}

#[axum::debug_handler]
async fn update_node_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Json(payload): Json<UpdateNodePayload>,
) -> Result<impl IntoResponse, ApiError> {
    let title = payload
        .title
        .map(|t| clamp_chars(t.trim(), MAX_TITLE_LEN))
        .filter(|t| !t.is_empty());
    let summary = payload
        .summary
        .map(|s| clamp_chars(s.trim(), MAX_SUMMARY_LEN));

    // texto nuevo ⇒ embedding nuevo, confirmados en la misma escritura
    let embedding = if title.is_some() || summary.is_some() {
        let current = state.store.get_node(&node_id).await.map_err(map_error)?;
        let new_title = title.clone().unwrap_or(current.title);
        let new_summary = summary.clone().unwrap_or(current.summary);
        Some(
            state
                .embedder
                .embed(&node_embedding_text(&new_title, &new_summary))
                .await
                .map_err(map_error)?,
        )
    } else {
        None
    };

    let node = state
        .store
        .update_node(
            &node_id,
            NodeUpdate {
                title,
                summary,
                tags: payload.tags,
                embedding,
            },
        )
        .await
        .map_err(map_error)?;
    Ok(Json(node))
}

#[axum::debug_handler]
async fn delete_node_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted_ids = state.store.delete_node(&node_id).await.map_err(map_error)?;
    info!("Nodo {node_id} borrado junto con {} descendientes", deleted_ids.len() - 1);
    Ok(Json(json!({ "deletedIds": deleted_ids })))
}

#[axum::debug_handler]
async fn list_children_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let children = state.store.list_children(&node_id).await.map_err(map_error)?;
    Ok(Json(children))
}

#[axum::debug_handler]
async fn list_ancestors_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let ancestors = state.store.list_ancestors(&node_id).await.map_err(map_error)?;
    Ok(Json(ancestors))
}

// --- Handlers: interacciones y refinamiento ---

#[axum::debug_handler]
async fn list_interactions_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let interactions = state
        .store
        .list_interactions(&node_id)
        .await
        .map_err(map_error)?;
    Ok(Json(interactions))
}

#[axum::debug_handler]
async fn record_interaction_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Json(payload): Json<InteractionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.user_message.trim().is_empty() {
        return Err(bad_request("El mensaje del usuario no puede estar vacío."));
    }

    let count = crate::interactions::record_turn(
        state.store.as_ref(),
        &node_id,
        &payload.user_message,
        &payload.ai_response,
    )
    .await
    .map_err(map_error)?;

    Ok((StatusCode::CREATED, Json(json!({ "interactionCount": count }))))
}

#[axum::debug_handler]
async fn refine_node_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let node = state.store.get_node(&node_id).await.map_err(map_error)?;

    let refined = refiner::refine_if_due(
        state.store.as_ref(),
        state.embedder.as_ref(),
        state.oracle.as_ref(),
        &state.config.refinement,
        &node_id,
        node.interaction_count,
    )
    .await
    .map_err(map_error)?;

    Ok(Json(json!({ "refined": refined })))
}

// --- Handlers: notas ---

#[axum::debug_handler]
async fn add_note_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Json(payload): Json<NotePayload>,
) -> Result<impl IntoResponse, ApiError> {
    let content = payload.content.trim();
    if content.is_empty() {
        return Err(bad_request("La nota no puede estar vacía."));
    }

    let note = state
        .store
        .add_note(&node_id, content)
        .await
        .map_err(map_error)?;
    Ok((StatusCode::CREATED, Json(note)))
}

#[axum::debug_handler]
async fn list_notes_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let notes = state.store.list_notes(&node_id).await.map_err(map_error)?;
    Ok(Json(notes))
}

#[axum::debug_handler]
async fn delete_note_handler(
    State(state): State<AppState>,
    Path((node_id, note_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .delete_note(&node_id, &note_id)
        .await
        .map_err(map_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Handlers: enrutamiento y chat ---

#[axum::debug_handler]
async fn route_question_handler(
    State(state): State<AppState>,
    Json(payload): Json<RouteQuestionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.question.trim().is_empty() {
        return Err(bad_request("La pregunta no puede estar vacía."));
    }

    // sin efectos secundarios: un create_new aquí no crea nada
    let decision = placement::route_question(
        state.store.as_ref(),
        state.embedder.as_ref(),
        state.oracle.as_ref(),
        state.web_search.as_ref(),
        &state.config.routing,
        &PlacementRequest {
            question: payload.question,
            root_id: payload.root_id,
            current_node_id: payload.current_node_id,
            recent_messages: payload.recent_messages,
        },
    )
    .await
    .map_err(map_error)?;

    Ok(Json(decision))
}

#[axum::debug_handler]
async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatPayload>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.question.trim().is_empty() {
        return Err(bad_request("La pregunta no puede estar vacía."));
    }

    let turn = state
        .chat
        .run_turn(&ChatRequest {
            question: payload.question,
            root_id: payload.root_id,
            current_node_id: payload.current_node_id,
            recent_messages: payload.recent_messages,
        })
        .await
        .map_err(map_error)?;

    Ok(Json(turn))
}

// --- Handlers: salud y apagado ---

#[axum::debug_handler]
async fn health_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let topics = state.store.list_root_topics().await.map_err(map_error)?;
    Ok(Json(json!({ "status": "ok", "topics": topics.len() })))
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}
