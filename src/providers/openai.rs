use async_stream::try_stream;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};

use crate::config::{OpenAiConfig, DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::domains::chat::{Message, Role};
use crate::error::{ChaiRelayError, Result};
use crate::interfaces::providers::{FragmentStream, GenerationEngine};

/// Streams chat completions from any OpenAI-compatible `/chat/completions`
/// endpoint (OpenAI itself, or a local Ollama server).
#[derive(Clone)]
pub struct OpenAiEngine {
    model: String,
    api_key: Option<String>,
    base_url: String,
    http: reqwest::Client,
}

impl OpenAiEngine {
    pub fn new(api_key: Option<String>, model: Option<String>, base_url: Option<String>) -> Self {
        let model = model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let api_key = api_key.filter(|key| !key.trim().is_empty());
        Self {
            model,
            api_key,
            base_url,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &OpenAiConfig) -> Self {
        Self::new(
            config.api_key.clone(),
            config.model.clone(),
            config.base_url.clone(),
        )
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn build_message(message: &Message) -> Result<ChatCompletionRequestMessage> {
        let content = message.content.clone();
        let built: std::result::Result<ChatCompletionRequestMessage, _> = match message.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(content)
                .build()
                .map(Into::into),
            Role::User => ChatCompletionRequestUserMessageArgs::default()
                .content(content)
                .build()
                .map(Into::into),
            Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(content)
                .build()
                .map(Into::into),
        };
        built.map_err(|e| ChaiRelayError::Runtime(e.to_string()))
    }

    fn request_body(&self, messages: &[Message]) -> Result<Value> {
        let request_messages = messages
            .iter()
            .map(Self::build_message)
            .collect::<Result<Vec<_>>>()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .messages(request_messages)
            .build()
            .map_err(|e| ChaiRelayError::Runtime(e.to_string()))?;

        let mut body = serde_json::to_value(&request)
            .map_err(|e| ChaiRelayError::Serialization(e.to_string()))?;
        body["stream"] = json!(true);
        Ok(body)
    }
}

impl GenerationEngine for OpenAiEngine {
    fn model(&self) -> &str {
        &self.model
    }

    fn chat_stream(&self, messages: Vec<Message>) -> FragmentStream {
        let engine = self.clone();

        Box::pin(try_stream! {
            let body = engine.request_body(&messages)?;
            let url = engine.completions_url();
            debug!(model = %engine.model, messages = messages.len(), "Starting chat completion stream");

            let mut request = engine.http.post(url).json(&body);
            if let Some(key) = engine.api_key.as_deref() {
                request = request.bearer_auth(key);
            }
            let response = request.send().await.map_err(|e| {
                ChaiRelayError::Generation(format!("chat completion transport failed: {e}"))
            })?;

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                warn!(%status, "Chat completion request rejected");
                match Err::<std::convert::Infallible, _>(ChaiRelayError::Generation(format!(
                    "chat completion failed ({status}): {text}"
                )))? {}
            }

            let mut decoder = SseDecoder::default();
            let mut completed = false;
            let mut bytes = response.bytes_stream();
            while !completed {
                let payloads = match bytes.next().await {
                    Some(chunk) => {
                        let chunk = chunk.map_err(|e| {
                            ChaiRelayError::Generation(format!("chat completion read failed: {e}"))
                        })?;
                        decoder.push(&chunk)
                    }
                    None => {
                        let tail = decoder.finish();
                        if tail.is_empty() {
                            break;
                        }
                        tail
                    }
                };

                for payload in payloads {
                    let chunk = parse_stream_payload(&payload)?;
                    if let Some(delta) = chunk.delta {
                        yield delta;
                    }
                    if chunk.finished {
                        completed = true;
                    }
                    if chunk.done {
                        completed = true;
                        break;
                    }
                }
            }

            if !completed {
                Err::<(), _>(ChaiRelayError::Generation(
                    "chat completion stream ended before the model finished".to_string(),
                ))?;
            }
        })
    }
}

/// Splits a server-sent-event byte stream into `data:` payloads.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(payload) = data_payload(&line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    fn finish(&mut self) -> Vec<String> {
        let line = std::mem::take(&mut self.buffer);
        data_payload(&line).into_iter().collect()
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let data = line.trim().strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    Some(data.to_string())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct StreamChunk {
    delta: Option<String>,
    finished: bool,
    done: bool,
}

fn parse_stream_payload(payload: &str) -> Result<StreamChunk> {
    if payload == "[DONE]" {
        return Ok(StreamChunk {
            done: true,
            ..StreamChunk::default()
        });
    }

    let value: Value = serde_json::from_str(payload).map_err(|e| {
        ChaiRelayError::Generation(format!("malformed chat completion event: {e}"))
    })?;

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(ChaiRelayError::Generation(message));
    }

    let choice = value
        .get("choices")
        .and_then(|choices| choices.as_array())
        .and_then(|choices| choices.first());
    let delta = choice
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    let finished = choice
        .and_then(|c| c.get("finish_reason"))
        .is_some_and(|reason| !reason.is_null());

    Ok(StreamChunk {
        delta,
        finished,
        done: false,
    })
}
