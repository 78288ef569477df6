//! Enriquecimiento web best-effort vía Tavily.
//!
//! Su fallo nunca aborta la colocación: sólo retira el contexto extra del
//! prompt de enrutamiento.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::warn;

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";
const MAX_RESULTS: usize = 3;
const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    title: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Clone)]
pub struct WebSearchClient {
    api_key: String,
    http: reqwest::Client,
}

impl WebSearchClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            http: reqwest::Client::new(),
        }
    }

    /// Busca hechos y conexiones candidatas para la pregunta. Devuelve un
    /// bloque de texto listo para el prompt, o `None` si la búsqueda falló
    /// o no aportó nada.
    pub async fn search(&self, query: &str) -> Option<String> {
        match self.search_inner(query).await {
            Ok(text) if !text.is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                warn!("Búsqueda web degradada para '{query}': {e}");
                None
            }
        }
    }

    async fn search_inner(&self, query: &str) -> Result<String, anyhow::Error> {
        let body = json!({
            "api_key": self.api_key,
            "query": query,
            "max_results": MAX_RESULTS,
            "search_depth": "basic",
            "include_answer": true,
        });

        let response = self
            .http
            .post(TAVILY_ENDPOINT)
            .timeout(SEARCH_TIMEOUT)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<TavilyResponse>()
            .await?;

        let mut blocks = Vec::new();
        if let Some(answer) = response.answer.filter(|a| !a.is_empty()) {
            blocks.push(answer);
        }
        for r in response.results.into_iter().take(MAX_RESULTS) {
            if !r.content.is_empty() {
                blocks.push(format!("- {}: {}", r.title, r.content));
            }
        }

        Ok(blocks.join("\n"))
    }
}
