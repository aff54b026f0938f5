//! Stages whose work is a single content-provider call: Design and the
//! legal-recon analysis stages.

use std::sync::Arc;

use async_trait::async_trait;
use forge_core::{ContentProvider, ContentRequest};
use serde_json::{json, Map, Value};

use crate::error::StageError;
use crate::stage::{Stage, StageInput, StageKind, StageOutput};

/// Reject provider output that is not an object with non-empty sections.
pub(crate) fn validate_sections(kind: StageKind, content: &Value) -> Result<(), StageError> {
    let sections = content
        .get("sections")
        .and_then(Value::as_array)
        .ok_or_else(|| StageError::Validation(format!("{kind} content has no sections array")))?;
    if sections.is_empty() {
        return Err(StageError::Validation(format!("{kind} content is empty")));
    }
    for (i, s) in sections.iter().enumerate() {
        let heading = s.get("heading").and_then(Value::as_str).unwrap_or("");
        let body = s.get("body").and_then(Value::as_str).unwrap_or("");
        if heading.trim().is_empty() || body.trim().is_empty() {
            return Err(StageError::Validation(format!(
                "{kind} section {i} is missing a heading or body"
            )));
        }
    }
    Ok(())
}

pub struct ContentStage {
    kind: StageKind,
    task: &'static str,
    content: Arc<dyn ContentProvider>,
}

impl ContentStage {
    pub fn new(kind: StageKind, task: &'static str, content: Arc<dyn ContentProvider>) -> Self {
        Self {
            kind,
            task,
            content,
        }
    }
}

#[async_trait]
impl Stage for ContentStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    async fn run(&self, input: &StageInput) -> Result<StageOutput, StageError> {
        let mut context = input.request.context();
        let mut prior = Map::new();
        for kind in self.inputs() {
            let payload = input.payload(self.kind, kind)?;
            prior.insert(kind.name().to_string(), payload.clone());
        }
        if let Value::Object(ctx) = &mut context {
            ctx.insert("inputs".into(), Value::Object(prior));
        }

        let request =
            ContentRequest::new(self.task, context).with_feedback(input.feedback.clone());
        let content = self.content.generate(&request).await?;
        validate_sections(self.kind, &content)?;

        let sources: Vec<Value> = input
            .artifacts
            .values()
            .map(|a| json!({ "stage": a.stage, "seq": a.seq, "digest": a.digest }))
            .collect();
        let degraded_inputs: Vec<&str> = input
            .artifacts
            .values()
            .filter(|a| a.degraded)
            .map(|a| a.stage.as_str())
            .collect();
        let warnings = degraded_inputs
            .iter()
            .map(|s| format!("{} built on degraded {s} output", self.kind))
            .collect();

        Ok(StageOutput::new(json!({
            "task": self.task,
            "content": content,
            "sources": sources,
            "feedback": input.feedback,
        }))
        .with_warnings(warnings))
    }
}
