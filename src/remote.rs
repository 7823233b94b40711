//! Clients for the two document sources the rehearsal starts from: the
//! service config endpoint and the script repository.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;

use crate::types::ScriptDocument;

#[derive(Debug, Default, Deserialize)]
struct ServiceConfigSource {
    #[serde(default, alias = "asr")]
    recognition: BTreeMap<String, String>,
    #[serde(default, alias = "tts")]
    synthesis: BTreeMap<String, String>,
    #[serde(default, alias = "llm")]
    classification: ClassificationSource,
}

#[derive(Debug, Default, Deserialize)]
struct ClassificationSource {
    #[serde(default, rename = "apiKey")]
    api_key: String,
    #[serde(default, rename = "baseUrl")]
    base_url: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

/// Credentials for the intent classifier.
#[derive(Debug)]
pub struct ClassificationCredentials {
    pub api_key: SecretString,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

/// Credential groups by category. Vendor credentials for the two streaming
/// services are only meaningful to the gateway proxy and are kept opaque.
#[derive(Debug, Default)]
pub struct ServiceConfig {
    pub recognition: BTreeMap<String, SecretString>,
    pub synthesis: BTreeMap<String, SecretString>,
    /// `None` when no classifier key is configured; intent checking is off.
    pub classification: Option<ClassificationCredentials>,
}

impl From<ServiceConfigSource> for ServiceConfig {
    fn from(source: ServiceConfigSource) -> Self {
        let secrets = |group: BTreeMap<String, String>| -> BTreeMap<String, SecretString> {
            group
                .into_iter()
                .map(|(key, value)| (key, SecretString::from(value)))
                .collect()
        };
        let classification = source.classification;
        let enabled = !classification.api_key.trim().is_empty();
        let classification = enabled.then(|| ClassificationCredentials {
            api_key: SecretString::from(classification.api_key),
            base_url: classification.base_url.filter(|url| !url.is_empty()),
            model: classification.model.filter(|model| !model.is_empty()),
        });

        Self {
            recognition: secrets(source.recognition),
            synthesis: secrets(source.synthesis),
            classification,
        }
    }
}

impl ServiceConfig {
    /// Parses a config document. Categories may be missing, but the document
    /// itself must be a JSON object.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(text).context("invalid service config")?;
        if !value.is_object() {
            anyhow::bail!("invalid service config: expected an object");
        }
        let source: ServiceConfigSource =
            serde_json::from_value(value).context("invalid service config")?;
        Ok(source.into())
    }
}

pub async fn fetch_service_config(api_base: &str) -> Result<ServiceConfig> {
    let url = format!("{}/config", api_base.trim_end_matches('/'));
    let text = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to fetch {url}"))?
        .error_for_status()?
        .text()
        .await
        .with_context(|| format!("failed to read {url}"))?;
    let config = ServiceConfig::from_json(&text)?;
    tracing::info!(
        "service config loaded, intent checking {}",
        if config.classification.is_some() { "enabled" } else { "disabled" }
    );
    Ok(config)
}

pub async fn fetch_script(api_base: &str, id: Option<&str>) -> Result<ScriptDocument> {
    let url = format!("{}/script", api_base.trim_end_matches('/'));
    let mut request = reqwest::Client::new().get(&url);
    if let Some(id) = id {
        request = request.query(&[("id", id)]);
    }
    let script = request
        .send()
        .await
        .with_context(|| format!("failed to fetch {url}"))?
        .error_for_status()?
        .json::<ScriptDocument>()
        .await
        .context("invalid script document")?;
    Ok(script)
}

pub fn load_script_file(path: impl AsRef<Path>) -> Result<ScriptDocument> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    ScriptDocument::from_json(&text)
        .with_context(|| format!("invalid script document in {}", path.display()))
}
