use std::sync::Arc;

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tracing::debug;

use crate::{ChatError, History, ParamValue, ProducerResult, ResponseProducer};

/// A live conversation: owns its history and applies the chat events.
///
/// Sessions never share history; several sessions may share one producer.
pub struct ChatSession {
    producer: Arc<ResponseProducer>,
    history: History,
}

struct PendingTurn<'a> {
    frames: BoxStream<'static, Result<String, ChatError>>,
    history: &'a mut History,
    message: String,
    last: Option<String>,
}

impl ChatSession {
    pub fn new(producer: Arc<ResponseProducer>) -> Self {
        Self {
            producer,
            history: History::new(),
        }
    }

    pub fn with_history(producer: Arc<ResponseProducer>, history: History) -> Self {
        Self { producer, history }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn producer(&self) -> &ResponseProducer {
        &self.producer
    }

    /// Produces a reply to `message` and records the turn.
    pub async fn submit(
        &mut self,
        message: impl Into<String>,
        extras: &[ParamValue],
    ) -> Result<ProducerResult, ChatError> {
        let message = message.into();
        let result = self.producer.produce(&message, &self.history, extras).await?;
        self.history.push_turn(message, result.terminal());
        Ok(result)
    }

    /// Streams the reply to `message` frame by frame.
    ///
    /// The turn is recorded with the last frame once the stream is exhausted.
    /// Dropping the stream early, or a producer error, leaves the history as it was.
    pub fn submit_stream<'a>(
        &'a mut self,
        message: impl Into<String>,
        extras: &[ParamValue],
    ) -> Result<BoxStream<'a, Result<String, ChatError>>, ChatError> {
        let message = message.into();
        let frames = self.producer.produce_stream(&message, &self.history, extras)?;
        let pending = PendingTurn {
            frames,
            history: &mut self.history,
            message,
            last: None,
        };

        Ok(stream::unfold(Some(pending), |pending| async move {
            let mut pending = pending?;
            match pending.frames.next().await {
                Some(Ok(frame)) => {
                    pending.last = Some(frame.clone());
                    Some((Ok(frame), Some(pending)))
                }
                Some(Err(err)) => Some((Err(err), None)),
                None => {
                    if let Some(reply) = pending.last.take() {
                        pending.history.push_turn(pending.message, reply);
                    }
                    None
                }
            }
        })
        .boxed())
    }

    /// Drops the last turn and submits its message again.
    ///
    /// If the new attempt fails the dropped turn is put back.
    pub async fn retry(&mut self, extras: &[ParamValue]) -> Result<ProducerResult, ChatError> {
        let turn = self.history.pop().ok_or(ChatError::EmptyHistory)?;
        debug!(history_len = self.history.len(), "retrying last turn");
        match self.submit(turn.user_message.clone(), extras).await {
            Ok(result) => Ok(result),
            Err(err) => {
                self.history.push(turn);
                Err(err)
            }
        }
    }

    /// Drops the last turn and hands back its user message.
    pub fn undo(&mut self) -> Result<String, ChatError> {
        let turn = self.history.pop().ok_or(ChatError::EmptyHistory)?;
        Ok(turn.user_message)
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}
