//! Oráculo LLM: abstracción sobre Rig para la decisión de enrutamiento
//! estructurada, el refinamiento de resúmenes y las respuestas de tutoría.
//!
//! El oráculo se trata como no confiable: su salida estructurada se parsea
//! contra un esquema estricto y los ids que devuelve se validan después
//! contra el almacén. Cada llamada lleva un techo de latencia.

use std::time::Duration;

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use tokio::time::timeout;

use crate::config::{AppConfig, LlmProvider};
use crate::error::GraphError;

/// Acción elegida por el oráculo para una pregunta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OracleAction {
    UseExisting,
    CreateNew,
}

/// Salida estructurada de la decisión de enrutamiento, tal y como la
/// declara el esquema embebido en el prompt.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct OracleRouting {
    pub action: OracleAction,
    pub reasoning: String,
    #[serde(default, rename = "existingNodeId")]
    pub existing_node_id: Option<String>,
    #[serde(default, rename = "parentNodeId")]
    pub parent_node_id: Option<String>,
    #[serde(default, rename = "suggestedTitle")]
    pub suggested_title: Option<String>,
    #[serde(default, rename = "suggestedSummary")]
    pub suggested_summary: Option<String>,
}

#[async_trait]
pub trait LanguageModelOracle: Send + Sync {
    /// Decide el enrutamiento de una pregunta dado el contexto del grafo.
    /// Salida no parseable o proveedor caído ⇒ `RoutingFailed`; nunca se
    /// adivina una acción por defecto.
    async fn decide_routing(&self, prompt: &str) -> Result<OracleRouting, GraphError>;

    /// Reescribe el resumen de un nodo a partir de un transcript condensado.
    async fn refine_summary(&self, prompt: &str) -> Result<String, GraphError>;

    /// Respuesta de tutoría en el contexto del nodo resuelto.
    async fn tutor_answer(&self, question: &str, context: &str) -> Result<String, GraphError>;
}

const ROUTING_PREAMBLE: &str = r#"
Eres el sistema de enrutamiento de un grafo de conocimiento para estudio.
Decides si una pregunta pertenece a un nodo existente o requiere crear uno nuevo.

Reglas de decisión:
- USE_EXISTING sólo cuando la pregunta pide MÁS INFORMACIÓN de algo ya cubierto
  por el resumen de ese nodo, o cuando nombra exactamente la entidad del nodo.
- Una pregunta "<entidad> <atributo>" (ej. "LeBron James edad") con un nodo
  titulado como esa entidad va SIEMPRE a ese nodo, nunca a un ancestro genérico.
- CREATE_NEW cuando la pregunta trata un tema, persona o concepto aún no
  cubierto. "¿Quién es X?" o "¿Qué es X?" casi siempre crean nodo nuevo.
- El padre del nodo nuevo es el candidato MÁS relacionado semánticamente,
  prefiriendo el más específico (más profundo) sobre un ancestro genérico.
  Sin candidato relacionado, el padre es la raíz.
- suggestedTitle: máximo 3-4 palabras. suggestedSummary: 1-2 frases claras.

La salida DEBE ser un único objeto JSON válido conforme al esquema dado.
No incluyas explicaciones fuera del JSON.
"#;

const REFINER_PREAMBLE: &str = r#"
Refinas el resumen de un nodo de un grafo de conocimiento a partir de
interacciones reales de estudiantes. Devuelve SOLO el texto del resumen
mejorado: sin explicaciones, sin formato, sin comillas.
"#;

const TUTOR_PREAMBLE: &str = r#"
Eres un tutor experto y cercano. Respondes de forma clara y concisa en el
contexto del tema indicado, conectando con el resto del árbol de temas
cuando ayude a entender.
"#;

/// Implementación del oráculo sobre Rig. De momento OpenAI; otros
/// proveedores quedan preparados en el `match` de cada llamada.
#[derive(Debug, Clone)]
pub struct RigOracle {
    provider: LlmProvider,
    chat_model: String,
    timeout_secs: u64,
}

impl RigOracle {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            provider: cfg.llm_provider.clone(),
            chat_model: cfg.llm_chat_model.clone(),
            timeout_secs: cfg.routing.oracle_timeout_secs,
        }
    }

    fn model_name(&self) -> &str {
        if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        }
    }

    /// Lanza un prompt con preámbulo y techo de latencia.
    async fn prompt_with_timeout(
        &self,
        preamble: &str,
        prompt: &str,
    ) -> Result<String, anyhow::Error> {
        use rig::providers::openai;
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;
        use rig::completion::Prompt as _;

        if !matches!(self.provider, LlmProvider::OpenAI) {
            anyhow::bail!("proveedor {:?} aún no implementado para chat", self.provider);
        }

        let client = openai::Client::from_env();
        let agent = client
            .agent(self.model_name())
            .preamble(preamble)
            .build();

        let answer = timeout(
            Duration::from_secs(self.timeout_secs),
            agent.prompt(prompt.to_string()),
        )
        .await
        .map_err(|_| anyhow::anyhow!("timeout tras {} s", self.timeout_secs))??;

        Ok(answer)
    }
}

/// Limpia la respuesta del LLM para quedarnos sólo con el JSON.
fn strip_json_fences(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Esquema JSON de la decisión, embebido en el prompt para que el modelo
/// y el parser no se desincronicen.
pub fn routing_schema_text() -> String {
    let schema = schema_for!(OracleRouting);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

#[async_trait]
impl LanguageModelOracle for RigOracle {
    async fn decide_routing(&self, prompt: &str) -> Result<OracleRouting, GraphError> {
        let preamble = format!(
            "{ROUTING_PREAMBLE}\n## Esquema de salida\n{}",
            routing_schema_text()
        );

        let response = self
            .prompt_with_timeout(&preamble, prompt)
            .await
            .map_err(|e| GraphError::RoutingFailed(e.to_string()))?;

        let json_response = strip_json_fences(&response);
        serde_json::from_str::<OracleRouting>(json_response).map_err(|e| {
            GraphError::RoutingFailed(format!(
                "salida no parseable del oráculo: {e}. Respuesta: '{response}'"
            ))
        })
    }

    async fn refine_summary(&self, prompt: &str) -> Result<String, GraphError> {
        let refined = self
            .prompt_with_timeout(REFINER_PREAMBLE, prompt)
            .await
            .map_err(|e| GraphError::RefinementFailed(e.to_string()))?;
        Ok(refined.trim().to_string())
    }

    async fn tutor_answer(&self, question: &str, context: &str) -> Result<String, GraphError> {
        let full_prompt = format!("Contexto:\n{context}\n\nPregunta del estudiante:\n{question}");
        self.prompt_with_timeout(TUTOR_PREAMBLE, &full_prompt)
            .await
            .map_err(|e| GraphError::CompletionFailed(e.to_string()))
    }
}
