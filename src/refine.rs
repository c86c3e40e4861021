//! The chat refinement loop: answer a question grounded in computed chart
//! data, fetching additional divisional charts just-in-time when the model
//! asks for them, under a hard iteration bound.

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::analysis::{extract_facts, fact_summary};
use crate::charts::{classify_topics, parse_next_charts, strip_control_line, NEXT_CHARTS_MARKER};
use crate::errors::AppError;
use crate::models::{ChatResponse, ComputeResponse};
use crate::providers::{AstroProvider, ChatModel, ChatTurn};
use std::sync::Arc;

pub const DEFAULT_ITERATIONS: u32 = 2;
pub const ITERATION_CEILING: u32 = 5;

pub fn clamp_iterations(requested: Option<u32>) -> u32 {
    requested.unwrap_or(DEFAULT_ITERATIONS).clamp(1, ITERATION_CEILING)
}

/// Where additional divisional charts come from during the loop.
#[async_trait]
pub trait ChartSource: Send + Sync {
    async fn fetch(&self, chart_key: &str) -> anyhow::Result<Value>;
}

/// Chart source backed by the astrology provider, bound to one birth record.
pub struct ProviderCharts {
    pub client: Arc<dyn AstroProvider>,
    pub coordinates: String,
    pub datetime: String,
    pub ayanamsa: i64,
    pub la: String,
}

#[async_trait]
impl ChartSource for ProviderCharts {
    async fn fetch(&self, chart_key: &str) -> anyhow::Result<Value> {
        self.client
            .divisional(
                &self.coordinates,
                &self.datetime,
                chart_key,
                self.ayanamsa,
                &self.la,
            )
            .await
    }
}

/// Incremental events for the SSE variant. The serialized `Done` payload is
/// whatever the endpoint would have returned as its JSON body.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Trace(String),
    Token(String),
    Done(Value),
    Error(String),
}

pub struct RefinementInput<'a> {
    pub message: &'a str,
    pub context: &'a ComputeResponse,
    pub bound: u32,
    pub stream_tokens: bool,
}

const CHAT_SYSTEM_PROMPT: &str = "You are an expert Vedic astrologer assistant. \
Answer the user's question using only the chart facts provided. Keep answers \
grounded in the data and avoid making health or financial guarantees. \
After your answer, append one final line of the form \
'NEXT_CHARTS: <comma-separated divisional chart names or D-numbers>' naming any \
additional divisional charts you still need to answer well, or \
'NEXT_CHARTS: none' if the provided charts suffice.";

/// Replay the buffered reply to the client in its original chunking, minus
/// the trailing control line. The concatenation of the emitted tokens equals
/// the cleaned reply exactly.
fn relay_tokens(tx: &UnboundedSender<ChatEvent>, chunks: &[String], clean: &str) {
    let mut rest = clean;
    for chunk in chunks {
        if rest.is_empty() {
            break;
        }
        let mut cut = chunk.len().min(rest.len());
        while cut > 0 && !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            continue;
        }
        let _ = tx.send(ChatEvent::Token(rest[..cut].to_string()));
        rest = &rest[cut..];
    }
    if !rest.is_empty() {
        let _ = tx.send(ChatEvent::Token(rest.to_string()));
    }
}

fn emit(
    trace: &mut Vec<String>,
    events: Option<&UnboundedSender<ChatEvent>>,
    message: String,
) {
    if let Some(tx) = events {
        let _ = tx.send(ChatEvent::Trace(message.clone()));
    }
    trace.push(message);
}

/// Run the bounded refinement loop.
///
/// Termination: the loop runs at most `bound` iterations no matter what the
/// model requests. An individual chart fetch failure is skipped (the model
/// simply sees fewer charts); a model failure aborts the whole request.
pub async fn run_refinement(
    model: &dyn ChatModel,
    charts: &dyn ChartSource,
    input: RefinementInput<'_>,
    events: Option<&UnboundedSender<ChatEvent>>,
) -> Result<ChatResponse, AppError> {
    let mut trace = Vec::new();

    // Working set of chart payloads, seeded from the caller's context.
    // Inline error markers from the compute step do not count as available.
    let mut working = serde_json::Map::new();
    for (key, value) in &input.context.divisional {
        if value.get("error").is_none() {
            working.insert(key.clone(), value.clone());
        }
    }

    let mut needed = classify_topics(input.message);
    emit(
        &mut trace,
        events,
        format!("classified question; starting charts: {}", needed.join(", ")),
    );

    let mut consulted: Vec<String> = needed.clone();
    let mut reply_text = String::new();
    let mut iterations = 0;

    for iteration in 1..=input.bound {
        iterations = iteration;

        for key in needed.clone() {
            if working.contains_key(&key) {
                continue;
            }
            match charts.fetch(&key).await {
                Ok(payload) => {
                    emit(&mut trace, events, format!("fetched {} chart", key));
                    working.insert(key, payload);
                }
                Err(e) => {
                    emit(
                        &mut trace,
                        events,
                        format!("could not fetch {} chart, continuing without it: {}", key, e),
                    );
                }
            }
        }

        let grounded = ComputeResponse {
            kundli: input.context.kundli.clone(),
            divisional: working.clone(),
            transits: input.context.transits.clone(),
            meta: input.context.meta.clone(),
        };
        let facts = extract_facts(&grounded, Utc::now());
        let available: Vec<String> = working.keys().cloned().collect();
        let summary = fact_summary(&facts, &available);

        let messages = vec![
            ChatTurn::system(CHAT_SYSTEM_PROMPT),
            ChatTurn::user(format!(
                "Chart facts:\n{}\nQuestion: {}\n\nRemember to end with a {} line.",
                summary, input.message, NEXT_CHARTS_MARKER
            )),
        ];

        emit(
            &mut trace,
            events,
            format!("iteration {}: asking model with {} charts", iteration, available.len()),
        );

        // Tokens are buffered, not relayed: intermediate answers get
        // discarded once the model asks for more charts, so only the
        // concluding iteration's answer may reach the client.
        let mut token_chunks = Vec::new();
        let reply = if input.stream_tokens {
            let mut stream = model
                .complete_stream(&messages)
                .await
                .map_err(|e| AppError::upstream("openai_failed", e))?;
            let mut acc = String::new();
            while let Some(token) = stream.next().await {
                let token = token.map_err(|e| AppError::upstream("openai_failed", e))?;
                acc.push_str(&token);
                token_chunks.push(token);
            }
            acc
        } else {
            model
                .complete(&messages)
                .await
                .map_err(|e| AppError::upstream("openai_failed", e))?
        };

        let requested = parse_next_charts(&reply);

        let new: Vec<String> = requested
            .into_iter()
            .filter(|key| !working.contains_key(key) && !needed.contains(key))
            .collect();

        let concluding = new.is_empty() || iteration == input.bound;
        if concluding && input.stream_tokens {
            if let Some(tx) = events {
                relay_tokens(tx, &token_chunks, &strip_control_line(&reply));
            }
        }
        reply_text = reply;

        if new.is_empty() {
            emit(
                &mut trace,
                events,
                format!("iteration {}: model needs no further charts", iteration),
            );
            break;
        }

        emit(
            &mut trace,
            events,
            format!("iteration {}: model requested {}", iteration, new.join(", ")),
        );
        for key in new {
            consulted.push(key.clone());
            needed.push(key);
        }

        if iteration == input.bound {
            emit(&mut trace, events, "iteration budget exhausted".to_string());
        }
    }

    let mut used_charts = Vec::new();
    for key in consulted {
        if !used_charts.contains(&key) {
            used_charts.push(key);
        }
    }

    let response = ChatResponse {
        reply: strip_control_line(&reply_text),
        used_charts,
        trace,
        refinement: iterations,
    };

    if let Some(tx) = events {
        if let Ok(payload) = serde_json::to_value(&response) {
            let _ = tx.send(ChatEvent::Done(payload));
        }
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BirthEcho, Meta};
    use crate::providers::ScriptedChat;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubCharts {
        fetches: AtomicUsize,
        fail: bool,
    }

    impl StubCharts {
        fn new() -> Self {
            Self {
                fetches: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fetches: AtomicUsize::new(0),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl ChartSource for StubCharts {
        async fn fetch(&self, chart_key: &str) -> anyhow::Result<Value> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("upstream unavailable");
            }
            Ok(json!({"data": {"divisional_positions": []}, "chart": chart_key}))
        }
    }

    fn context() -> ComputeResponse {
        ComputeResponse {
            kundli: json!({"data": {}}),
            divisional: serde_json::Map::new(),
            transits: None,
            meta: Meta {
                provider: "prokerala".into(),
                ayanamsa: 1,
                language: "en".into(),
                advanced: true,
                birth: BirthEcho {
                    date: "1990-04-12".into(),
                    time: "06:45:00".into(),
                    timezone: Some("+05:30".into()),
                    latitude: Some(12.9716),
                    longitude: Some(77.5946),
                    location: Some("Bangalore, India".into()),
                },
                effective_datetime: "1990-04-12T06:45:00+05:30".into(),
            },
        }
    }

    #[test]
    fn clamps_iteration_bound() {
        assert_eq!(clamp_iterations(None), 2);
        assert_eq!(clamp_iterations(Some(0)), 1);
        assert_eq!(clamp_iterations(Some(3)), 3);
        assert_eq!(clamp_iterations(Some(99)), 5);
    }

    #[tokio::test]
    async fn stops_when_model_requests_nothing_new() {
        let model = ScriptedChat::new(["The outlook is steady.\nNEXT_CHARTS: none"]);
        let charts = StubCharts::new();
        let ctx = context();
        let out = run_refinement(
            &model,
            &charts,
            RefinementInput {
                message: "how is my career?",
                context: &ctx,
                bound: 5,
                stream_tokens: false,
            },
            None,
        )
        .await
        .unwrap();
        assert_eq!(out.refinement, 1);
        assert_eq!(out.reply, "The outlook is steady.");
        assert!(out.used_charts.contains(&"lagna".to_string()));
        assert!(out.used_charts.contains(&"dasamsa".to_string()));
    }

    #[tokio::test]
    async fn fetches_requested_charts_then_concludes() {
        let model = ScriptedChat::new([
            "Need the marriage chart.\nNEXT_CHARTS: D9",
            "Venus placement looks supportive.\nNEXT_CHARTS: none",
        ]);
        let charts = StubCharts::new();
        let ctx = context();
        let out = run_refinement(
            &model,
            &charts,
            RefinementInput {
                message: "tell me about myself",
                context: &ctx,
                bound: 5,
                stream_tokens: false,
            },
            None,
        )
        .await
        .unwrap();
        assert_eq!(out.refinement, 2);
        assert_eq!(out.reply, "Venus placement looks supportive.");
        assert!(out.used_charts.contains(&"navamsa".to_string()));
    }

    #[tokio::test]
    async fn terminates_within_bound_even_when_model_keeps_asking() {
        // Each reply requests a chart the loop has not seen yet
        let model = ScriptedChat::new([
            "more\nNEXT_CHARTS: D2",
            "more\nNEXT_CHARTS: D3",
            "more\nNEXT_CHARTS: D4",
            "more\nNEXT_CHARTS: D7",
            "more\nNEXT_CHARTS: D10",
            "more\nNEXT_CHARTS: D12",
        ]);
        let charts = StubCharts::new();
        let ctx = context();
        for bound in 1..=5u32 {
            let out = run_refinement(
                &model,
                &charts,
                RefinementInput {
                    message: "tell me everything",
                    context: &ctx,
                    bound,
                    stream_tokens: false,
                },
                None,
            )
            .await
            .unwrap();
            assert!(out.refinement <= bound, "bound {} exceeded", bound);
        }
    }

    #[tokio::test]
    async fn chart_fetch_failures_are_skipped() {
        let model = ScriptedChat::new(["Answer from what is available.\nNEXT_CHARTS: none"]);
        let charts = StubCharts::failing();
        let ctx = context();
        let out = run_refinement(
            &model,
            &charts,
            RefinementInput {
                message: "career outlook?",
                context: &ctx,
                bound: 2,
                stream_tokens: false,
            },
            None,
        )
        .await
        .unwrap();
        assert_eq!(out.reply, "Answer from what is available.");
        assert!(out
            .trace
            .iter()
            .any(|t| t.contains("continuing without it")));
    }

    #[tokio::test]
    async fn streaming_emits_tokens_and_done() {
        let model = ScriptedChat::new(["Streamed answer.\nNEXT_CHARTS: none"]);
        let charts = StubCharts::new();
        let ctx = context();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let out = run_refinement(
            &model,
            &charts,
            RefinementInput {
                message: "hello",
                context: &ctx,
                bound: 2,
                stream_tokens: true,
            },
            Some(&tx),
        )
        .await
        .unwrap();
        drop(tx);
        assert_eq!(out.reply, "Streamed answer.");

        let mut saw_token = false;
        let mut saw_done = false;
        while let Some(ev) = rx.recv().await {
            match ev {
                ChatEvent::Token(_) => saw_token = true,
                ChatEvent::Done(_) => saw_done = true,
                _ => {}
            }
        }
        assert!(saw_token);
        assert!(saw_done);
    }

    #[tokio::test]
    async fn streaming_relays_only_the_final_answer() {
        // The first reply is superseded once the model asks for another
        // chart; none of it, and no control line, may reach the client.
        let model = ScriptedChat::new([
            "Intermediate thoughts that get discarded.\nNEXT_CHARTS: D9",
            "Final answer.\nNEXT_CHARTS: none",
        ]);
        let charts = StubCharts::new();
        let ctx = context();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let out = run_refinement(
            &model,
            &charts,
            RefinementInput {
                message: "tell me about myself",
                context: &ctx,
                bound: 5,
                stream_tokens: true,
            },
            Some(&tx),
        )
        .await
        .unwrap();
        drop(tx);
        assert_eq!(out.reply, "Final answer.");

        let mut streamed = String::new();
        while let Some(ev) = rx.recv().await {
            if let ChatEvent::Token(t) = ev {
                streamed.push_str(&t);
            }
        }
        assert_eq!(streamed, out.reply);
        assert!(!streamed.contains("NEXT_CHARTS"));
        assert!(!streamed.contains("Intermediate"));
    }

    #[tokio::test]
    async fn streaming_relays_last_iteration_when_bound_hit() {
        // The bound cuts the loop off while the model still wants more;
        // the last reply is what the client gets, again without the
        // control line.
        let model = ScriptedChat::new([
            "Partial take.\nNEXT_CHARTS: D2",
            "Better take.\nNEXT_CHARTS: D3",
        ]);
        let charts = StubCharts::new();
        let ctx = context();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let out = run_refinement(
            &model,
            &charts,
            RefinementInput {
                message: "hello",
                context: &ctx,
                bound: 2,
                stream_tokens: true,
            },
            Some(&tx),
        )
        .await
        .unwrap();
        drop(tx);
        assert_eq!(out.refinement, 2);

        let mut streamed = String::new();
        while let Some(ev) = rx.recv().await {
            if let ChatEvent::Token(t) = ev {
                streamed.push_str(&t);
            }
        }
        assert_eq!(streamed, out.reply);
        assert_eq!(streamed, "Better take.");
    }
}
