//! vLLM backend: runs the engine as a `vllm serve` child process and talks to
//! its OpenAI-compatible HTTP API.
//!
//! The prompt is rendered by the analysis pipeline, so requests carry a
//! pass-through chat template: the engine sees exactly the text we built.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::{
    Engine, EngineBackend, EngineError, EngineParams, GenerationRequest, MemoryHeadroom,
};
use crate::catalog::DEFAULT_MAX_MODEL_LEN;
use crate::config::EngineSettings;

const MAX_RETRIES: u32 = 3;
const READINESS_POLL_INTERVAL: Duration = Duration::from_secs(2);
const RECLAIM_POLL_INTERVAL: Duration = Duration::from_millis(500);
const RECLAIM_MAX_POLLS: u32 = 20;

/// Renders only the text parts of the first message, verbatim.
const PASSTHROUGH_CHAT_TEMPLATE: &str = "{% for message in messages %}\
{% if message['content'] is string %}{{ message['content'] }}\
{% else %}{% for part in message['content'] %}\
{% if part['type'] == 'text' %}{{ part['text'] }}{% endif %}\
{% endfor %}{% endif %}{% endfor %}";

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    chat_template: &'a str,
    max_tokens: u32,
    temperature: f64,
    repetition_penalty: f64,
    guided_json: &'a Value,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

fn build_chat_request<'a>(
    served_name: &'a str,
    request: &'a GenerationRequest,
) -> ChatRequest<'a> {
    let mut content = Vec::with_capacity(request.images.len() + 1);
    content.push(ContentPart::Text {
        text: request.prompt.clone(),
    });
    content.extend(request.images.iter().map(|image| ContentPart::ImageUrl {
        image_url: ImageUrl {
            url: image.to_data_url(),
        },
    }));

    ChatRequest {
        model: served_name,
        messages: vec![ChatMessage {
            role: "user",
            content,
        }],
        chat_template: PASSTHROUGH_CHAT_TEMPLATE,
        max_tokens: request.sampling.max_tokens,
        temperature: request.sampling.temperature,
        repetition_penalty: request.sampling.repetition_penalty,
        guided_json: &request.sampling.guided_json,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Backend
// ────────────────────────────────────────────────────────────────────────────

/// Launches vLLM engine processes. Holds the environment every launch gets.
pub struct VllmBackend {
    settings: EngineSettings,
    env: Vec<(String, String)>,
    client: Client,
}

impl VllmBackend {
    pub fn new(settings: EngineSettings, env: Vec<(String, String)>) -> Result<Self, EngineError> {
        let client = Client::builder().timeout(settings.request_timeout).build()?;
        Ok(Self {
            settings,
            env,
            client,
        })
    }

    fn base_url(&self) -> String {
        format!("http://{}:{}", self.settings.host, self.settings.port)
    }

    /// Polls `/health` until the server answers 200, the child exits, or the
    /// startup timeout elapses.
    async fn wait_until_ready(&self, child: &mut Child) -> Result<(), EngineError> {
        let health_url = format!("{}/health", self.base_url());
        let deadline = tokio::time::Instant::now() + self.settings.startup_timeout;

        loop {
            if let Some(status) = child.try_wait()? {
                return Err(EngineError::ExitedDuringStartup(status.to_string()));
            }

            match self.client.get(&health_url).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => debug!("Engine not ready yet: {}", response.status()),
                Err(e) => debug!("Engine not reachable yet: {e}"),
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(EngineError::StartupTimeout(
                    self.settings.startup_timeout.as_secs(),
                ));
            }
            tokio::time::sleep(READINESS_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl EngineBackend for VllmBackend {
    async fn construct(&self, params: &EngineParams) -> Result<Box<dyn Engine>, EngineError> {
        let served_name = params
            .served_name()
            .ok_or(EngineError::MissingParam("model"))?
            .to_string();

        let mut command = Command::new(&self.settings.vllm_bin);
        command
            .arg("serve")
            .args(params.to_cli_args())
            .arg("--host")
            .arg(&self.settings.host)
            .arg("--port")
            .arg(self.settings.port.to_string())
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        info!(
            "Launching {} serve for {} on {}",
            self.settings.vllm_bin,
            served_name,
            self.base_url()
        );
        let mut child = command.spawn()?;

        if let Err(e) = self.wait_until_ready(&mut child).await {
            warn!("Engine startup failed, terminating process: {e}");
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(e);
        }

        Ok(Box::new(VllmEngine {
            child,
            client: self.client.clone(),
            base_url: self.base_url(),
            served_name,
            max_model_len: params.max_model_len().unwrap_or(DEFAULT_MAX_MODEL_LEN),
        }))
    }

    /// Waits for the device's free memory to stop rising, then reports it.
    /// Without `nvidia-smi` there is nothing to observe and headroom is unknown.
    async fn reclaim_memory(&self) -> Result<MemoryHeadroom, EngineError> {
        let mut previous = match query_gpu_memory().await {
            Some(reading) => reading,
            None => return Ok(MemoryHeadroom::default()),
        };

        for _ in 0..RECLAIM_MAX_POLLS {
            tokio::time::sleep(RECLAIM_POLL_INTERVAL).await;
            let Some(current) = query_gpu_memory().await else {
                break;
            };
            if current.free_mib <= previous.free_mib {
                previous = current;
                break;
            }
            previous = current;
        }

        Ok(previous)
    }
}

/// Sums free/total memory across all visible GPUs.
async fn query_gpu_memory() -> Option<MemoryHeadroom> {
    let output = Command::new("nvidia-smi")
        .args([
            "--query-gpu=memory.free,memory.total",
            "--format=csv,noheader,nounits",
        ])
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }
    parse_gpu_memory(&String::from_utf8_lossy(&output.stdout))
}

fn parse_gpu_memory(csv: &str) -> Option<MemoryHeadroom> {
    let mut free = 0u64;
    let mut total = 0u64;
    let mut rows = 0;

    for line in csv.lines().filter(|l| !l.trim().is_empty()) {
        let mut fields = line.split(',').map(str::trim);
        free += fields.next()?.parse::<u64>().ok()?;
        total += fields.next()?.parse::<u64>().ok()?;
        rows += 1;
    }

    (rows > 0).then_some(MemoryHeadroom {
        free_mib: Some(free),
        total_mib: Some(total),
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Engine handle
// ────────────────────────────────────────────────────────────────────────────

pub struct VllmEngine {
    child: Child,
    client: Client,
    base_url: String,
    served_name: String,
    max_model_len: u32,
}

#[async_trait]
impl Engine for VllmEngine {
    fn max_model_len(&self) -> u32 {
        self.max_model_len
    }

    /// Retries connection failures and 5xx responses with exponential backoff.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, EngineError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = build_chat_request(&self.served_name, request);

        let mut last_error: Option<EngineError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s
                let delay = Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(
                    "Engine call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = match self.client.post(&url).json(&body).send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(EngineError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.is_server_error() {
                let message = response.text().await.unwrap_or_default();
                warn!("Engine returned {}: {}", status, message);
                last_error = Some(EngineError::Api {
                    status: status.as_u16(),
                    message,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ApiErrorBody>(&body)
                    .map(|e| e.message)
                    .unwrap_or(body);
                return Err(EngineError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let chat: ChatResponse = response.json().await?;
            if let Some(usage) = &chat.usage {
                debug!(
                    "Engine call succeeded: prompt_tokens={}, completion_tokens={}",
                    usage.prompt_tokens, usage.completion_tokens
                );
            }

            return chat
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .filter(|text| !text.trim().is_empty())
                .ok_or(EngineError::EmptyContent);
        }

        Err(last_error.unwrap_or(EngineError::Other(format!(
            "engine call failed after {MAX_RETRIES} attempts"
        ))))
    }

    async fn release(self: Box<Self>) -> Result<(), EngineError> {
        let mut engine = *self;
        info!("Stopping engine process for {}", engine.served_name);
        if engine.child.try_wait()?.is_none() {
            engine.child.start_kill()?;
        }
        let status = engine.child.wait().await?;
        debug!("Engine process exited: {status}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{PageImage, SamplingParams};
    use serde_json::json;

    fn sample_request() -> GenerationRequest {
        GenerationRequest {
            prompt: "<|im_start|>system\nJudge.<|im_end|>\n".to_string(),
            images: vec![
                PageImage::new(vec![0x89, b'P', b'N', b'G']),
                PageImage::new(vec![0xFF, 0xD8, 0xFF, 0xE0]),
            ],
            sampling: SamplingParams {
                temperature: 0.1,
                repetition_penalty: 1.05,
                max_tokens: 1500,
                guided_json: json!({"type": "object"}),
            },
        }
    }

    #[test]
    fn test_chat_request_keeps_prompt_and_page_order() {
        let request = sample_request();
        let body = serde_json::to_value(build_chat_request("glm-4v", &request)).unwrap();

        assert_eq!(body["model"], "glm-4v");
        assert_eq!(body["max_tokens"], 1500);
        assert_eq!(body["guided_json"], json!({"type": "object"}));
        assert_eq!(body["chat_template"], PASSTHROUGH_CHAT_TEMPLATE);

        let content = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 3);
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[0]["text"], request.prompt);
        assert!(content[1]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
        assert!(content[2]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_parse_gpu_memory_sums_devices() {
        let headroom = parse_gpu_memory("20000, 24576\n1000, 24576\n").unwrap();
        assert_eq!(headroom.free_mib, Some(21000));
        assert_eq!(headroom.total_mib, Some(49152));
    }

    #[test]
    fn test_parse_gpu_memory_rejects_garbage() {
        assert!(parse_gpu_memory("").is_none());
        assert!(parse_gpu_memory("N/A, N/A").is_none());
    }

    #[tokio::test]
    async fn test_construct_fails_when_binary_is_missing() {
        let settings = EngineSettings {
            vllm_bin: "/nonexistent/vllm-binary".to_string(),
            ..EngineSettings::default()
        };
        let backend = VllmBackend::new(settings, vec![]).unwrap();
        let mut params = EngineParams::new();
        params.set("model", "Qwen/x");

        let err = backend.construct(&params).await.err().unwrap();
        assert!(matches!(err, EngineError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_construct_requires_model_param() {
        let backend = VllmBackend::new(EngineSettings::default(), vec![]).unwrap();
        let err = backend.construct(&EngineParams::new()).await.err().unwrap();
        assert!(matches!(err, EngineError::MissingParam("model")));
    }
}
