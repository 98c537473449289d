
use std::io::{BufRead, BufReader, Lines};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::config::OllamaConfig;
use crate::{Result, SemdexError};

const CONNECT_TIMEOUT_SECONDS: u64 = 5;

/// Blocking client for Ollama's generation and model-listing endpoints.
///
/// Generation responses can take minutes, so no global timeout is set; callers
/// run this behind `spawn_blocking` or on a dedicated thread.
#[derive(Debug, Clone)]
pub struct GenerationClient {
    base_url: Url,
    model: String,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateLine {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    message: Option<GenerateMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

impl GenerationClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .endpoint_url()
            .map_err(|error| SemdexError::Generation(format!("Invalid Ollama URL: {error}")))?;

        let agent = ureq::Agent::config_builder()
            .timeout_connect(Some(Duration::from_secs(CONNECT_TIMEOUT_SECONDS)))
            .build()
            .into();

        Ok(Self {
            base_url,
            model: config.generation_model.clone(),
            agent,
        })
    }

    /// Probe for a reachable Ollama server. Never errors; unreachable is
    /// `false`.
    #[inline]
    pub fn check_connection(&self) -> bool {
        match self.fetch_tags() {
            Ok(_) => true,
            Err(error) => {
                debug!("Ollama connection check failed: {error}");
                false
            }
        }
    }

    /// Names of locally available models. Fail-soft: any error yields an
    /// empty list.
    #[inline]
    pub fn list_models(&self) -> Vec<String> {
        match self.fetch_tags() {
            Ok(tags) => tags.models.into_iter().map(|tag| tag.name).collect(),
            Err(error) => {
                warn!("Failed to list Ollama models: {error}");
                Vec::new()
            }
        }
    }

    /// Whether a model is available locally, matching either the full
    /// `name:tag` or the bare name.
    #[inline]
    pub fn has_model(&self, name: &str) -> bool {
        self.list_models()
            .iter()
            .any(|available| model_name_matches(available, name))
    }

    /// The configured generation model name.
    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Starts a streaming generation. The returned iterator yields response
    /// fragments in order and ends after the server reports completion.
    #[inline]
    pub fn generate_stream(&self, prompt: &str) -> Result<TokenStream> {
        let url = self
            .base_url
            .join("/api/generate")
            .map_err(|error| SemdexError::Generation(format!("Invalid generate URL: {error}")))?;

        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: true,
        };
        let request_json = serde_json::to_string(&request)
            .map_err(|error| SemdexError::Generation(format!("Request serialization: {error}")))?;

        debug!(model = %self.model, "starting generation stream");

        let response = self
            .agent
            .post(url.as_str())
            .config()
            .http_status_as_error(false)
            .build()
            .header("Content-Type", "application/json")
            .send(&request_json)
            .map_err(|error| SemdexError::Generation(format!("Request failed: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .into_body()
                .read_to_string()
                .unwrap_or_else(|_| String::new());
            return Err(SemdexError::Generation(format!(
                "Generation request failed with HTTP {status}: {body}"
            )));
        }

        let reader = BufReader::new(response.into_body().into_reader());
        Ok(TokenStream {
            lines: reader.lines(),
            finished: false,
        })
    }

    /// Runs a generation to completion and concatenates the fragments.
    #[inline]
    pub fn generate_full(&self, prompt: &str) -> Result<String> {
        let mut output = String::new();
        for fragment in self.generate_stream(prompt)? {
            output.push_str(&fragment?);
        }
        Ok(output)
    }

    fn fetch_tags(&self) -> Result<TagsResponse> {
        let url = self
            .base_url
            .join("/api/tags")
            .map_err(|error| SemdexError::Generation(format!("Invalid tags URL: {error}")))?;

        let body = self
            .agent
            .get(url.as_str())
            .call()
            .map_err(|error| SemdexError::Generation(format!("Tags request failed: {error}")))?
            .into_body()
            .read_to_string()
            .map_err(|error| SemdexError::Generation(format!("Tags response read: {error}")))?;

        serde_json::from_str(&body)
            .map_err(|error| SemdexError::Generation(format!("Tags response parse: {error}")))
    }
}

fn model_name_matches(available: &str, wanted: &str) -> bool {
    available == wanted
        || available
            .split(':')
            .next()
            .is_some_and(|base| base == wanted)
}

/// Response fragments from one in-flight generation, decoded from
/// newline-delimited JSON. Finite and not restartable; dropping it closes the
/// connection.
pub struct TokenStream {
    lines: Lines<BufReader<ureq::BodyReader<'static>>>,
    finished: bool,
}

impl std::fmt::Debug for TokenStream {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStream")
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl Iterator for TokenStream {
    type Item = Result<String>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let line = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(error)) => {
                    self.finished = true;
                    return Some(Err(SemdexError::Generation(format!(
                        "Stream read failed: {error}"
                    ))));
                }
                None => {
                    self.finished = true;
                    return None;
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            let parsed: GenerateLine = match serde_json::from_str(&line) {
                Ok(parsed) => parsed,
                Err(error) => {
                    self.finished = true;
                    return Some(Err(SemdexError::Generation(format!(
                        "Malformed stream line: {error}"
                    ))));
                }
            };

            if parsed.done {
                self.finished = true;
            }

            let fragment = parsed
                .response
                .or_else(|| parsed.message.map(|message| message.content))
                .unwrap_or_default();

            if fragment.is_empty() {
                if self.finished {
                    return None;
                }
                continue;
            }
            return Some(Ok(fragment));
        }
    }
}
