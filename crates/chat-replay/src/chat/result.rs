use serde::{Deserialize, Serialize};

/// Normalized output of a producer call.
///
/// `Stream` holds every value an incremental producer yielded, in order. It is
/// never empty when built by [`ResponseProducer`](crate::ResponseProducer).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ProducerResult {
    Final(String),
    Stream(Vec<String>),
}

/// How much of a cached result a consumer wants back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplayMode {
    /// Only the last value.
    #[default]
    Terminal,
    /// Every value in emission order, to animate the incremental reveal.
    Full,
}

impl ProducerResult {
    /// The reply a conversation keeps: the final value or the last streamed frame.
    pub fn terminal(&self) -> &str {
        match self {
            ProducerResult::Final(value) => value,
            ProducerResult::Stream(frames) => frames.last().map(String::as_str).unwrap_or_default(),
        }
    }

    /// All emitted values. A final result is a single frame.
    pub fn frames(&self) -> &[String] {
        match self {
            ProducerResult::Final(value) => std::slice::from_ref(value),
            ProducerResult::Stream(frames) => frames,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, ProducerResult::Stream(_))
    }

    pub fn replay(&self, mode: ReplayMode) -> Vec<String> {
        match mode {
            ReplayMode::Terminal => vec![self.terminal().to_string()],
            ReplayMode::Full => self.frames().to_vec(),
        }
    }

    pub fn into_terminal(self) -> String {
        match self {
            ProducerResult::Final(value) => value,
            ProducerResult::Stream(mut frames) => frames.pop().unwrap_or_default(),
        }
    }
}
