//! HTTP completion client for the configured model provider.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};

use leadbot_agent::llm::LlmClient;
use leadbot_core::config::{LlmConfig, LlmProvider};

const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct HttpLlmClient {
    client: Client,
    provider: LlmProvider,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OllamaGeneration {
    response: String,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("failed to build llm http client")?;
        let base_url = match (&config.base_url, config.provider) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, LlmProvider::OpenAi) => OPENAI_DEFAULT_BASE_URL.to_string(),
            (None, LlmProvider::Ollama) => {
                return Err(anyhow!("llm.base_url is required for the ollama provider"))
            }
        };
        Ok(Self {
            client,
            provider: config.provider,
            base_url,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn request_body(&self, prompt: &str) -> (String, Value) {
        match self.provider {
            LlmProvider::OpenAi => (
                format!("{}/chat/completions", self.base_url),
                json!({
                    "model": self.model,
                    "temperature": 0,
                    "messages": [{ "role": "user", "content": prompt }],
                }),
            ),
            LlmProvider::Ollama => (
                format!("{}/api/generate", self.base_url),
                json!({ "model": self.model, "prompt": prompt, "stream": false }),
            ),
        }
    }
}

pub fn parse_completion(provider: LlmProvider, body: Value) -> Result<String> {
    match provider {
        LlmProvider::OpenAi => {
            let completion: ChatCompletion =
                serde_json::from_value(body).context("unexpected chat completion shape")?;
            completion
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .ok_or_else(|| anyhow!("chat completion carried no content"))
        }
        LlmProvider::Ollama => {
            let generation: OllamaGeneration =
                serde_json::from_value(body).context("unexpected ollama generation shape")?;
            Ok(generation.response)
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let (url, body) = self.request_body(prompt);
        let mut request = self.client.post(&url).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.context("llm request failed")?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("llm provider returned {status}"));
        }
        let body: Value = response.json().await.context("llm response was not JSON")?;
        parse_completion(self.provider, body)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use leadbot_core::config::{AppConfig, LlmProvider};

    use super::{parse_completion, HttpLlmClient};

    #[test]
    fn parses_openai_and_ollama_bodies() {
        let openai = json!({"choices": [{"message": {"role": "assistant", "content": "{\"label\":\"valid\"}"}}]});
        assert_eq!(
            parse_completion(LlmProvider::OpenAi, openai).expect("openai"),
            "{\"label\":\"valid\"}"
        );

        let ollama = json!({"model": "llama3.1", "response": "hola", "done": true});
        assert_eq!(parse_completion(LlmProvider::Ollama, ollama).expect("ollama"), "hola");

        assert!(parse_completion(LlmProvider::OpenAi, json!({"choices": []})).is_err());
    }

    #[test]
    fn request_targets_provider_endpoint() {
        let mut config = AppConfig::default().llm;
        config.base_url = Some("http://localhost:11434/".to_string());
        let client = HttpLlmClient::from_config(&config).expect("client");
        let (url, body) = client.request_body("hola");
        assert_eq!(url, "http://localhost:11434/api/generate");
        assert_eq!(body["stream"], false);

        config.provider = LlmProvider::OpenAi;
        config.base_url = None;
        let client = HttpLlmClient::from_config(&config).expect("client");
        let (url, body) = client.request_body("hola");
        assert_eq!(url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(body["messages"][0]["content"], "hola");
    }
}
