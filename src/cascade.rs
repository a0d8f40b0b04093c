//! Ordered model fallback.
use crate::collab::{LanguageModel, LmError};
use anyhow::{anyhow, Result};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CascadeError {
    #[error("every model in the cascade hit a capacity limit; last: {last}")]
    Exhausted { last: LmError },
    #[error(transparent)]
    Failed(LmError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeOutput {
    pub text: String,
    pub model: String,
}

/// Model ids tried in order. A capacity failure moves on to the next model;
/// any other failure ends the cascade for this call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCascade {
    models: Vec<String>,
}

impl ModelCascade {
    pub fn new(models: Vec<String>) -> Result<Self> {
        if models.is_empty() {
            return Err(anyhow!("model cascade must list at least one model"));
        }
        if models.iter().any(|model| model.trim().is_empty()) {
            return Err(anyhow!("model cascade contains an empty model id"));
        }
        Ok(ModelCascade { models })
    }

    pub fn complete(
        &self,
        lm: &dyn LanguageModel,
        system_prompt: &str,
        user_text: &str,
    ) -> Result<CascadeOutput, CascadeError> {
        let mut last = None;
        for model in &self.models {
            tracing::debug!(model = %model, "trying model");
            match lm.complete(system_prompt, user_text, model) {
                Ok(text) => {
                    return Ok(CascadeOutput {
                        text,
                        model: model.clone(),
                    })
                }
                Err(err) if err.is_capacity() => {
                    tracing::warn!(model = %model, error = %err, "model at capacity, falling through");
                    last = Some(err);
                }
                Err(err) => return Err(CascadeError::Failed(err)),
            }
        }
        match last {
            Some(last) => Err(CascadeError::Exhausted { last }),
            None => Err(CascadeError::Failed(LmError::Other {
                model: String::new(),
                message: "no models configured".to_string(),
            })),
        }
    }
}
