use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bon::Builder;
use futures::future::{self, BoxFuture};
use futures::stream::{self, BoxStream};
use futures::{FutureExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{ChatError, ExtrasSchema, History, ParamValue, ProducerResult};

/// Everything a wrapped function sees for one call.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatRequest {
    pub message: String,
    pub history: History,
    pub extras: Vec<ParamValue>,
}

impl ChatRequest {
    pub fn extra(&self, index: usize) -> Option<&ParamValue> {
        self.extras.get(index)
    }
}

pub type FinalFn =
    Arc<dyn Fn(ChatRequest) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync>;
pub type StreamFn =
    Arc<dyn Fn(ChatRequest) -> BoxStream<'static, anyhow::Result<String>> + Send + Sync>;

/// Shape of the wrapped function's output, chosen when the producer is configured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerKind {
    ReturnsFinal,
    ReturnsStream,
}

/// The user-supplied response logic.
#[derive(Clone)]
pub enum ProducerFn {
    ReturnsFinal(FinalFn),
    ReturnsStream(StreamFn),
}

impl ProducerFn {
    /// Wraps an async function returning one reply.
    pub fn final_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(ChatRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        ProducerFn::ReturnsFinal(Arc::new(move |request| f(request).boxed()))
    }

    /// Wraps a synchronous function returning one reply.
    pub fn final_sync<F>(f: F) -> Self
    where
        F: Fn(&ChatRequest) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        Self::final_fn(move |request| future::ready(f(&request)))
    }

    /// Wraps a function returning a stream of progressively refined replies.
    pub fn stream_fn<F, S>(f: F) -> Self
    where
        F: Fn(ChatRequest) -> S + Send + Sync + 'static,
        S: Stream<Item = anyhow::Result<String>> + Send + 'static,
    {
        ProducerFn::ReturnsStream(Arc::new(move |request| f(request).boxed()))
    }

    /// Wraps a synchronous generator. Every item of the returned iterator is one frame.
    pub fn stream_iter<F, I>(f: F) -> Self
    where
        F: Fn(&ChatRequest) -> I + Send + Sync + 'static,
        I: IntoIterator<Item = String>,
        I::IntoIter: Send + 'static,
    {
        Self::stream_fn(move |request| stream::iter(f(&request).into_iter().map(Ok)))
    }

    pub fn kind(&self) -> ProducerKind {
        match self {
            ProducerFn::ReturnsFinal(_) => ProducerKind::ReturnsFinal,
            ProducerFn::ReturnsStream(_) => ProducerKind::ReturnsStream,
        }
    }
}

/// Uniform invocation of a chat function with result-shape normalization.
///
/// The function is invoked with `(message, history, extras...)`. Its declared
/// parameter count is checked once at [`build`](ResponseProducerBuilder::build)
/// against the extras schema, so a misconfigured producer never serves a request.
///
/// ```ignore
/// let producer = ResponseProducer::builder()
///     .name("double")
///     .function(ProducerFn::final_sync(|req| Ok(format!("{0} {0}", req.message))))
///     .build()?;
/// ```
#[derive(Clone, Builder)]
#[builder(finish_fn(vis = "", name = build_internal))]
pub struct ResponseProducer {
    /// Identifies the producer in logs, errors and the cache fingerprint.
    #[builder(into, default = "chat".to_string())]
    name: String,
    /// Revision of the wrapped function. Bump it when the function's behavior
    /// changes so persisted example caches keyed on the old one are not reused.
    #[builder(into)]
    version: Option<String>,
    function: ProducerFn,
    #[builder(default)]
    schema: ExtrasSchema,
    /// Parameter count the function was written against. Defaults to the
    /// count the schema implies.
    declared_parameters: Option<usize>,
}

use response_producer_builder::{IsSet, State};

impl<S: State> ResponseProducerBuilder<S> {
    /// Finalizes the producer, rejecting a declared signature that doesn't
    /// take `message`, `history` and one argument per extra.
    pub fn build(self) -> Result<ResponseProducer, ChatError>
    where
        S::Function: IsSet,
    {
        let producer = self.build_internal();
        let expected = producer.expected_parameters();
        let declared = producer.declared_parameters.unwrap_or(expected);
        if declared != expected {
            return Err(ChatError::InvalidFunctionSignature { declared, expected });
        }

        debug!(
            producer = %producer.name,
            kind = ?producer.kind(),
            extras = producer.schema.len(),
            "response producer configured"
        );
        Ok(producer)
    }
}

impl fmt::Debug for ResponseProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseProducer")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("kind", &self.kind())
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl ResponseProducer {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn kind(&self) -> ProducerKind {
        self.function.kind()
    }

    pub fn schema(&self) -> &ExtrasSchema {
        &self.schema
    }

    /// `message`, `history`, then one per extra.
    pub fn expected_parameters(&self) -> usize {
        2 + self.schema.len()
    }

    fn request(&self, message: &str, history: &History, extras: &[ParamValue]) -> ChatRequest {
        ChatRequest {
            message: message.to_string(),
            history: history.clone(),
            extras: extras.to_vec(),
        }
    }

    /// Invokes the function and collects its output.
    ///
    /// A streaming function is drained completely; the result holds every yielded
    /// value in order. The first error from the function ends the call.
    #[tracing::instrument(
        name = "chat_replay.producer.produce",
        level = "debug",
        skip(self, message, history, extras),
        fields(producer = %self.name, history_len = history.len(), extras = extras.len())
    )]
    pub async fn produce(
        &self,
        message: &str,
        history: &History,
        extras: &[ParamValue],
    ) -> Result<ProducerResult, ChatError> {
        self.schema.validate(extras)?;
        let request = self.request(message, history, extras);

        match &self.function {
            ProducerFn::ReturnsFinal(f) => {
                let reply = f(request)
                    .await
                    .map_err(|err| ChatError::producer_failure(&self.name, &err))?;
                trace!(reply_len = reply.len(), "final reply produced");
                Ok(ProducerResult::Final(reply))
            }
            ProducerFn::ReturnsStream(f) => {
                let mut frames = Vec::new();
                let mut stream = f(request);
                while let Some(frame) = stream.next().await {
                    frames.push(frame.map_err(|err| ChatError::producer_failure(&self.name, &err))?);
                }
                if frames.is_empty() {
                    return Err(empty_stream(&self.name));
                }
                trace!(frames = frames.len(), "stream drained");
                Ok(ProducerResult::Stream(frames))
            }
        }
    }

    /// Live incremental output for one request.
    ///
    /// A final-value function yields exactly one item. The stream ends after the
    /// first error, and a streaming function that yields nothing ends with a
    /// `ProducerFailure`. Dropping it cancels the request; nothing emitted so far
    /// is kept.
    pub fn produce_stream(
        &self,
        message: &str,
        history: &History,
        extras: &[ParamValue],
    ) -> Result<BoxStream<'static, Result<String, ChatError>>, ChatError> {
        self.schema.validate(extras)?;
        let request = self.request(message, history, extras);
        let name = self.name.clone();

        let frames = match &self.function {
            ProducerFn::ReturnsFinal(f) => f(request).into_stream().boxed(),
            ProducerFn::ReturnsStream(f) => f(request),
        };

        // State is `None` once the stream has ended or failed.
        Ok(stream::unfold(Some((frames, false)), move |state| {
            let name = name.clone();
            async move {
                let (mut frames, emitted) = state?;
                match frames.next().await {
                    Some(Ok(frame)) => Some((Ok(frame), Some((frames, true)))),
                    Some(Err(err)) => Some((Err(ChatError::producer_failure(&name, &err)), None)),
                    None if emitted => None,
                    None => Some((Err(empty_stream(&name)), None)),
                }
            }
        })
        .boxed())
    }
}

fn empty_stream(producer: &str) -> ChatError {
    ChatError::ProducerFailure {
        producer: producer.to_string(),
        message: "stream ended without yielding a value".to_string(),
    }
}
