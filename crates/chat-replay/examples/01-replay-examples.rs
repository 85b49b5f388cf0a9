use anyhow::Result;
use chat_replay::{
    CacheConfig, ChatInterface, ExtrasSchema, ParamKind, ProducerFn, ReplayMode,
    ResponseProducer, example_input, init_tracing,
};
use futures::StreamExt;

fn typewriter(text: &str, limit: usize) -> Vec<String> {
    text.char_indices()
        .map(|(idx, ch)| text[..idx + ch.len_utf8()].to_string())
        .take(limit)
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let producer = ResponseProducer::builder()
        .name("echo")
        .version("1")
        .schema(
            ExtrasSchema::new()
                .with("system_prompt", ParamKind::Text)
                .with("tokens", ParamKind::Number),
        )
        .function(ProducerFn::stream_iter(|req| {
            let system_prompt = req.extra(0).and_then(|v| v.as_str()).unwrap_or_default();
            let tokens = req.extra(1).and_then(|v| v.as_i64()).unwrap_or(0).max(0) as usize;
            typewriter(&format!("{system_prompt} {}", req.message), tokens)
        }))
        .build()?;

    let chatbot = ChatInterface::builder()
        .producer(producer)
        .examples(vec![
            example_input!["hello", "robot", 100],
            example_input!["hi", "robot", 2],
        ])
        .cache_examples(true)
        .cache_config(CacheConfig::from_env())
        .build()
        .await?;

    for index in 0..chatbot.examples().len() {
        let cached = chatbot.load_from_cache(index).await?;
        println!("{} -> {:?}", cached.message, cached.frames);
    }

    if let Some(cache) = chatbot.cache() {
        println!("terminal of example 0: {:?}", cache.replay(0, ReplayMode::Terminal)?);
    }

    let mut live = chatbot.submit("hello", &["robot".into(), 7.into()])?;
    while let Some(frame) = live.next().await {
        println!("live: {}", frame?);
    }
    Ok(())
}
