#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chat_replay::{ChatRequest, ExtrasSchema, ParamKind, ProducerFn, ResponseProducer};

/// Trace output for a failing test; `RUST_LOG` overrides the filter.
pub fn tracing() {
    // Another test in this binary may have installed it first.
    let _ = chat_replay::init_tracing_with("chat_replay=trace");
}

pub fn prefixes(text: &str, limit: usize) -> Vec<String> {
    text.char_indices()
        .map(|(idx, ch)| text[..idx + ch.len_utf8()].to_string())
        .take(limit)
        .collect()
}

pub fn double() -> ResponseProducer {
    ResponseProducer::builder()
        .name("double")
        .function(ProducerFn::final_sync(|req| {
            Ok(format!("{} {}", req.message, req.message))
        }))
        .build()
        .expect("double is a valid producer")
}

pub fn stream() -> ResponseProducer {
    ResponseProducer::builder()
        .name("stream")
        .function(ProducerFn::stream_iter(|req| {
            prefixes(&req.message, usize::MAX)
        }))
        .build()
        .expect("stream is a valid producer")
}

pub fn count() -> ResponseProducer {
    ResponseProducer::builder()
        .name("count")
        .function(ProducerFn::final_sync(|req| Ok(req.history.len().to_string())))
        .build()
        .expect("count is a valid producer")
}

pub fn prompt_schema() -> ExtrasSchema {
    ExtrasSchema::new()
        .with("system_prompt", ParamKind::Text)
        .with("tokens", ParamKind::Number)
}

fn echo_frames(req: &ChatRequest) -> Vec<String> {
    let system_prompt = req.extra(0).and_then(|v| v.as_str()).unwrap_or_default();
    let tokens = req.extra(1).and_then(|v| v.as_i64()).unwrap_or(0).max(0) as usize;
    prefixes(&format!("{system_prompt} {}", req.message), tokens)
}

pub fn echo_system_prompt_plus_message() -> ResponseProducer {
    ResponseProducer::builder()
        .name("echo_system_prompt_plus_message")
        .function(ProducerFn::stream_iter(echo_frames))
        .schema(prompt_schema())
        .declared_parameters(4)
        .build()
        .expect("echo is a valid producer")
}

/// Counts invocations; fails on messages equal to "boom".
pub fn counting(calls: Arc<AtomicUsize>) -> ResponseProducer {
    ResponseProducer::builder()
        .name("counting")
        .function(ProducerFn::final_sync(move |req| {
            calls.fetch_add(1, Ordering::SeqCst);
            if req.message == "boom" {
                anyhow::bail!("refusing to answer {}", req.message);
            }
            Ok(req.message.to_uppercase())
        }))
        .build()
        .expect("counting is a valid producer")
}
