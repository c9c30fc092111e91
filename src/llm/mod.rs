//! LLM integration for background jobs.
//!
//! Jobs only need single-shot text completion. Concrete providers (and their
//! HTTP clients) are supplied by the host application through [`LlmProvider`].

use async_trait::async_trait;

use crate::error::LlmError;

/// A text completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Model identifier, recorded alongside generated output.
    fn model_name(&self) -> &str;

    /// Complete `prompt` and return the model's text reply.
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Strip a surrounding Markdown code fence, if the model added one.
pub fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "json") on the opening line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
