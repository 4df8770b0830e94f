//! Model catalog with a TTL cache.
//!
//! The engine only needs `context_length` and `max_output` per model to
//! size chunks; prices ride along for the cost estimator. Fetched from the
//! provider's `/models` endpoint (OpenRouter format) and cached for an
//! hour — rebuilding is cheap, so a failed refresh just surfaces an error
//! to the caller.

use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::sync::RwLock;

/// One catalog entry, reduced to what the engine consumes.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub context_length: usize,
    pub max_output: Option<usize>,
    /// Dollars per million prompt tokens.
    pub input_price_per_m: f64,
    /// Dollars per million completion tokens.
    pub output_price_per_m: f64,
    pub is_free: bool,
}

/// Cached view of the provider's model list.
pub struct ModelCatalog {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    ttl: Duration,
    cache: RwLock<Option<(Instant, Vec<ModelInfo>)>>,
}

impl ModelCatalog {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_ttl(base_url, api_key, Duration::from_secs(3_600))
    }

    pub fn with_ttl(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("failed to build HTTP client"),
            ttl,
            cache: RwLock::new(None),
        }
    }

    /// Look up one model by id, refreshing the cache when needed.
    pub async fn model(&self, id: &str) -> anyhow::Result<Option<ModelInfo>> {
        let models = self.models().await?;
        Ok(models.into_iter().find(|m| m.id == id))
    }

    /// The full model list, served from cache while fresh.
    pub async fn models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        {
            let cache = self.cache.read().await;
            if let Some((fetched_at, models)) = cache.as_ref() {
                if fetched_at.elapsed() < self.ttl {
                    return Ok(models.clone());
                }
            }
        }

        let models = self.fetch().await?;
        let mut cache = self.cache.write().await;
        *cache = Some((Instant::now(), models.clone()));
        Ok(models)
    }

    async fn fetch(&self) -> anyhow::Result<Vec<ModelInfo>> {
        let mut req = self.client.get(format!("{}/models", self.base_url));
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }
        let resp = req.send().await.context("fetching model catalog")?;
        if !resp.status().is_success() {
            anyhow::bail!("model catalog returned {}", resp.status());
        }
        let json: serde_json::Value = resp.json().await.context("parsing model catalog")?;
        let models = parse_models(&json);
        tracing::debug!(count = models.len(), "model catalog refreshed");
        Ok(models)
    }
}

/// Parse an OpenRouter-style `/models` response.
///
/// Prices arrive as per-token strings ("0.000003"); stored per million.
pub fn parse_models(json: &serde_json::Value) -> Vec<ModelInfo> {
    let Some(rows) = json["data"].as_array() else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| {
            let id = row["id"].as_str()?.to_string();
            let name = row["name"].as_str().unwrap_or(&id).to_string();
            let context_length = row["context_length"].as_u64().unwrap_or(0) as usize;
            let max_output = row["top_provider"]["max_completion_tokens"]
                .as_u64()
                .map(|v| v as usize);
            let input_price_per_m = price_per_million(&row["pricing"]["prompt"]);
            let output_price_per_m = price_per_million(&row["pricing"]["completion"]);
            let is_free = input_price_per_m == 0.0 && output_price_per_m == 0.0;
            Some(ModelInfo {
                id,
                name,
                context_length,
                max_output,
                input_price_per_m,
                output_price_per_m,
                is_free,
            })
        })
        .collect()
}

fn price_per_million(value: &serde_json::Value) -> f64 {
    let per_token = match value {
        serde_json::Value::String(s) => s.parse::<f64>().unwrap_or(0.0),
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    };
    per_token * 1_000_000.0
}
