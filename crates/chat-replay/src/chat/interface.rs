use std::sync::Arc;

use bon::bon;
use futures::stream::BoxStream;
use tracing::debug;

use crate::{
    CacheConfig, CacheMode, CacheStore, ChatError, ChatSession, ExampleCache, ExampleInput,
    History, ParamValue, ProducerResult, ResponseProducer, validate_examples,
};

/// A cached example as the chat display shows it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedExample {
    pub message: String,
    /// Terminal reply.
    pub reply: String,
    /// Every emitted value, for animating a streamed reply.
    pub frames: Vec<String>,
}

/// Programmatic front of a chat deployment: one producer, its examples, and
/// optionally their cache.
pub struct ChatInterface {
    producer: Arc<ResponseProducer>,
    examples: Vec<ExampleInput>,
    cache: Option<ExampleCache>,
}

#[bon]
impl ChatInterface {
    /// Validates every example against the producer's extras schema. With
    /// `cache_examples` set and an eager cache, every example is built here.
    #[builder]
    pub async fn new(
        producer: ResponseProducer,
        #[builder(default)] examples: Vec<ExampleInput>,
        #[builder(default)] cache_examples: bool,
        #[builder(default)] cache_config: CacheConfig,
        store: Option<Arc<dyn CacheStore>>,
    ) -> Result<Self, ChatError> {
        let producer = Arc::new(producer);
        validate_examples(producer.schema(), &examples)?;

        let cache = if cache_examples && !examples.is_empty() {
            let store = store.unwrap_or_else(|| cache_config.store());
            let eager = cache_config.mode == CacheMode::Eager;
            let cache = ExampleCache::new(examples.clone(), producer.clone(), cache_config, store)?;
            if eager {
                cache.build().await?;
            }
            Some(cache)
        } else {
            None
        };

        debug!(
            producer = producer.name(),
            examples = examples.len(),
            cached = cache.is_some(),
            "chat interface ready"
        );
        Ok(Self {
            producer,
            examples,
            cache,
        })
    }
}

impl ChatInterface {
    pub fn producer(&self) -> &ResponseProducer {
        &self.producer
    }

    pub fn examples(&self) -> &[ExampleInput] {
        &self.examples
    }

    pub fn cache(&self) -> Option<&ExampleCache> {
        self.cache.as_ref()
    }

    /// A fresh conversation sharing this interface's producer.
    pub fn session(&self) -> ChatSession {
        ChatSession::new(self.producer.clone())
    }

    /// Non-streaming client call: the terminal reply to `message` with no history.
    pub async fn predict(
        &self,
        message: &str,
        extras: &[ParamValue],
    ) -> Result<String, ChatError> {
        self.producer
            .produce(message, &History::new(), extras)
            .await
            .map(ProducerResult::into_terminal)
    }

    /// Streaming client call: every output of `message` with no history, in order.
    pub fn submit(
        &self,
        message: &str,
        extras: &[ParamValue],
    ) -> Result<BoxStream<'static, Result<String, ChatError>>, ChatError> {
        self.producer.produce_stream(message, &History::new(), extras)
    }

    /// Swaps the producer and example list together.
    ///
    /// The cache, if any, is reconfigured with the same values and rebuilt
    /// right away in eager mode when its configuration changed. Returns whether
    /// the cache was reset.
    #[tracing::instrument(
        name = "chat_replay.interface.reconfigure",
        level = "debug",
        skip(self, producer, examples),
        fields(producer = producer.name(), examples = examples.len())
    )]
    pub async fn reconfigure(
        &mut self,
        producer: ResponseProducer,
        examples: Vec<ExampleInput>,
    ) -> Result<bool, ChatError> {
        let producer = Arc::new(producer);
        validate_examples(producer.schema(), &examples)?;

        let changed = match self.cache.as_mut() {
            Some(cache) => cache.reconfigure(examples.clone(), producer.clone()).await?,
            None => false,
        };
        self.producer = producer;
        self.examples = examples;

        if let Some(cache) = self.cache.as_ref()
            && changed
            && cache.config().mode == CacheMode::Eager
        {
            cache.build().await?;
        }
        Ok(changed)
    }

    /// Replays example `index` from the cache, building it first in lazy mode.
    pub async fn load_from_cache(&self, index: usize) -> Result<CachedExample, ChatError> {
        let example = self.examples.get(index).ok_or(ChatError::IndexOutOfRange {
            index,
            len: self.examples.len(),
        })?;
        let cache = self
            .cache
            .as_ref()
            .ok_or(ChatError::CacheNotBuilt { index })?;

        let output = match cache.config().mode {
            CacheMode::Eager => cache.load(index)?,
            CacheMode::Lazy => cache.load_or_build(index).await?,
        };

        Ok(CachedExample {
            message: example.message.clone(),
            reply: output.terminal().to_string(),
            frames: output.frames().to_vec(),
        })
    }
}
