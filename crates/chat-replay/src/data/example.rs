use serde::{Deserialize, Serialize};

use crate::{ChatError, ExtrasSchema, ParamValue};

/// A pre-declared input whose reply is precomputed by the example cache.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExampleInput {
    pub message: String,
    #[serde(default)]
    pub extras: Vec<ParamValue>,
}

impl ExampleInput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            extras: Vec::new(),
        }
    }

    /// Appends one extra parameter value.
    pub fn extra(mut self, value: impl Into<ParamValue>) -> Self {
        self.extras.push(value.into());
        self
    }

    pub fn with_extras<I, V>(message: impl Into<String>, extras: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ParamValue>,
    {
        Self {
            message: message.into(),
            extras: extras.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<&str> for ExampleInput {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ExampleInput {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Checks every example's extras against `schema`, naming the first offender.
pub fn validate_examples(schema: &ExtrasSchema, examples: &[ExampleInput]) -> Result<(), ChatError> {
    for (index, example) in examples.iter().enumerate() {
        schema.validate(&example.extras).map_err(|err| match err {
            ChatError::SchemaMismatch { reason } => ChatError::SchemaMismatch {
                reason: format!("example {index}: {reason}"),
            },
            other => other,
        })?;
    }
    Ok(())
}
