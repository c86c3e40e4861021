//! Hosted LLM access behind a small trait so the chat loop can be exercised
//! with a scripted model in tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Mutex;

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Single-shot completion.
    async fn complete(&self, messages: &[ChatTurn]) -> Result<String>;

    /// Streaming completion; yields content tokens as they arrive.
    async fn complete_stream(&self, messages: &[ChatTurn]) -> Result<TokenStream>;
}

#[derive(Clone)]
pub struct OpenAiChat {
    http: Client,
    api_key: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(http: Client, api_key: String, model: String) -> Self {
        Self {
            http,
            api_key,
            model,
        }
    }

    async fn send(&self, messages: &[ChatTurn], stream: bool) -> Result<reqwest::Response> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.7,
            "stream": stream,
        });
        let resp = self
            .http
            .post(CHAT_COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("OpenAI request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI returned status {}: {}", status, body);
        }
        Ok(resp)
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, messages: &[ChatTurn]) -> Result<String> {
        let resp = self.send(messages, false).await?;
        let payload: Value = resp.json().await.context("OpenAI response was not JSON")?;
        let content = payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(content.to_string())
    }

    async fn complete_stream(&self, messages: &[ChatTurn]) -> Result<TokenStream> {
        let resp = self.send(messages, true).await?;
        let mut bytes = resp.bytes_stream();

        // Relay chunk-by-chunk, splitting on the provider's event-stream
        // line framing. Lines may span chunk boundaries, so keep a buffer.
        let stream = async_stream::stream! {
            let mut buf = String::new();
            let mut done = false;
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(anyhow::Error::new(e).context("OpenAI stream error"));
                        break;
                    }
                };
                buf.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buf.find('\n') {
                    let line: String = buf.drain(..=pos).collect();
                    match parse_stream_line(line.trim_end()) {
                        StreamLine::Token(token) => yield Ok(token),
                        StreamLine::Done => {
                            done = true;
                            break;
                        }
                        StreamLine::Skip => {}
                    }
                }
                if done {
                    break;
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

enum StreamLine {
    Token(String),
    Done,
    Skip,
}

/// Parse one line of the chat-completions event stream.
fn parse_stream_line(line: &str) -> StreamLine {
    let Some(data) = line.strip_prefix("data: ") else {
        return StreamLine::Skip;
    };
    if data.trim() == "[DONE]" {
        return StreamLine::Done;
    }
    let Ok(value) = serde_json::from_str::<Value>(data) else {
        tracing::debug!("unparseable stream chunk: {}", data);
        return StreamLine::Skip;
    };
    match value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
    {
        Some(token) if !token.is_empty() => StreamLine::Token(token.to_string()),
        _ => StreamLine::Skip,
    }
}

/// Test double that replays queued replies in order. When the queue runs
/// dry the last reply is repeated, which keeps bounded-loop tests simple.
pub struct ScriptedChat {
    replies: Mutex<VecDeque<String>>,
    last: Mutex<Option<String>>,
}

impl ScriptedChat {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            last: Mutex::new(None),
        }
    }

    fn next_reply(&self) -> Result<String> {
        let mut queue = self.replies.lock().unwrap();
        if let Some(reply) = queue.pop_front() {
            *self.last.lock().unwrap() = Some(reply.clone());
            return Ok(reply);
        }
        self.last
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("scripted chat has no replies"))
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(&self, _messages: &[ChatTurn]) -> Result<String> {
        self.next_reply()
    }

    async fn complete_stream(&self, _messages: &[ChatTurn]) -> Result<TokenStream> {
        let reply = self.next_reply()?;
        // Emit in two chunks to exercise the relay path
        let mid = reply.len() / 2;
        let mut cut = mid;
        while cut > 0 && !reply.is_char_boundary(cut) {
            cut -= 1;
        }
        let (a, b) = reply.split_at(cut);
        let parts = vec![Ok(a.to_string()), Ok(b.to_string())];
        Ok(Box::pin(futures::stream::iter(parts)))
    }
}
