//! Document models that steps are applied to.
//!
//! The server never transforms or rebases steps. It only needs to apply an
//! accepted batch to its copy of the document so that late joiners can
//! fetch a full snapshot. Anything implementing [`DocumentModel`] can be
//! plugged in through a [`DocumentFactory`]; [`TextDocument`] is the
//! built-in plain-text model.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::protocol::Step;

#[derive(Debug, Error)]
pub enum StepError {
    #[error("Malformed step: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Range {from}..{to} outside document of length {len}")]
    OutOfRange { from: usize, to: usize, len: usize },
}

/// Authoritative document state owned by an instance.
pub trait DocumentModel: Send + Sync {
    /// Apply `steps` in order. Either all of them apply or the document
    /// is left untouched.
    fn apply_steps(&mut self, steps: &[Step]) -> Result<(), StepError>;

    /// JSON form sent to clients doing a full fetch.
    fn to_json(&self) -> serde_json::Value;
}

/// Builds the initial document for a newly created instance.
pub type DocumentFactory = Arc<dyn Fn(&str) -> Box<dyn DocumentModel> + Send + Sync>;

/// Factory producing empty [`TextDocument`]s.
pub fn text_document_factory() -> DocumentFactory {
    Arc::new(|_id| Box::new(TextDocument::default()))
}

/// Replace the characters in `from..to` with `text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextStep {
    pub from: usize,
    pub to: usize,
    #[serde(default)]
    pub text: String,
}

/// Plain text addressed by character offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextDocument {
    content: String,
}

impl TextDocument {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    fn splice(content: &mut String, step: &TextStep) -> Result<(), StepError> {
        let len = content.chars().count();
        if step.from > step.to || step.to > len {
            return Err(StepError::OutOfRange {
                from: step.from,
                to: step.to,
                len,
            });
        }
        let byte_at = |chars: usize| {
            content
                .char_indices()
                .nth(chars)
                .map_or(content.len(), |(i, _)| i)
        };
        let (start, end) = (byte_at(step.from), byte_at(step.to));
        content.replace_range(start..end, &step.text);
        Ok(())
    }
}

impl DocumentModel for TextDocument {
    fn apply_steps(&mut self, steps: &[Step]) -> Result<(), StepError> {
        let mut next = self.content.clone();
        for raw in steps {
            let step: TextStep = serde_json::from_value(raw.clone())?;
            Self::splice(&mut next, &step)?;
        }
        self.content = next;
        Ok(())
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "type": "text", "content": self.content })
    }
}
