//! Financial insight generation.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::info;

use crate::error::DatabaseError;
use crate::llm::LlmProvider;
use crate::store::Database;
use crate::worker::{TaskResult, TaskWork};

pub const SUMMARIES: &str = "financial_summaries";
pub const INSIGHTS: &str = "insights";

/// Generate insights from the user's stored financial summary and save them
/// under `insights/{user_id}`.
///
/// Completes with the saved document. Fails if the user has no summary.
pub fn process_financial_insights(
    store: Arc<dyn Database>,
    llm: Arc<dyn LlmProvider>,
    user_id: impl Into<String>,
) -> TaskWork {
    let user_id = user_id.into();
    TaskWork::new(move || generate(store, llm, user_id))
}

async fn generate(store: Arc<dyn Database>, llm: Arc<dyn LlmProvider>, user_id: String) -> TaskResult {
    let summary = store
        .fetch(SUMMARIES, &user_id)
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "financial_summary".to_string(),
            id: user_id.clone(),
        })?;

    let insights = llm
        .complete(&insights_prompt(&summary))
        .await
        .with_context(|| format!("generating insights for user {user_id}"))?;

    let document = json!({
        "user_id": user_id,
        "insights": insights.trim(),
        "model": llm.model_name(),
        "generated_at": Utc::now().to_rfc3339(),
    });
    store.save(INSIGHTS, &user_id, document.clone()).await?;

    info!(user_id = %user_id, model = llm.model_name(), "Financial insights generated");
    Ok(document)
}

fn insights_prompt(summary: &Value) -> String {
    format!(
        "You are a personal finance assistant. Using the spending summary below, \
         write three short, specific, actionable insights for the user. \
         Reply with plain text, one insight per line.\n\nSummary:\n{summary}"
    )
}
