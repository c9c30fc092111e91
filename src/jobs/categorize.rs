//! AI transaction categorization.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::llm::{LlmProvider, strip_code_fence};
use crate::store::Database;
use crate::worker::{TaskResult, TaskWork};

pub const TRANSACTIONS: &str = "transactions";

#[derive(Debug, Deserialize)]
struct Assignment {
    id: Value,
    category: String,
}

/// Ask the LLM to categorize `transactions` and save each categorized one
/// under `transactions/{id}` with its `category` set.
///
/// Each transaction is a JSON object with an `id` (string or number).
/// Completes with `{"categorized", "uncategorized"}`. An unreadable model
/// reply fails the task; an empty batch completes without calling the model.
pub fn sync_transaction_categories(
    store: Arc<dyn Database>,
    llm: Arc<dyn LlmProvider>,
    user_id: impl Into<String>,
    transactions: Vec<Value>,
) -> TaskWork {
    let user_id = user_id.into();
    TaskWork::new(move || categorize(store, llm, user_id, transactions))
}

async fn categorize(
    store: Arc<dyn Database>,
    llm: Arc<dyn LlmProvider>,
    user_id: String,
    transactions: Vec<Value>,
) -> TaskResult {
    if transactions.is_empty() {
        return Ok(json!({"categorized": 0, "uncategorized": 0}));
    }

    let reply = llm
        .complete(&categorize_prompt(&transactions))
        .await
        .with_context(|| format!("categorizing transactions for user {user_id}"))?;

    let assignments: Vec<Assignment> = serde_json::from_str(strip_code_fence(&reply))
        .with_context(|| format!("model {} returned unreadable categories", llm.model_name()))?;

    let categories: HashMap<String, String> = assignments
        .into_iter()
        .filter_map(|a| Some((id_key(&a.id)?, a.category)))
        .filter(|(_, category)| !category.trim().is_empty())
        .collect();

    let mut categorized = 0;
    for mut transaction in transactions.iter().cloned() {
        let Some(id) = transaction.get("id").and_then(id_key) else {
            debug!(user_id = %user_id, "Transaction without an id, skipping");
            continue;
        };
        let Some(category) = categories.get(&id) else {
            continue;
        };
        let Some(fields) = transaction.as_object_mut() else {
            continue;
        };

        fields.insert("category".to_string(), Value::String(category.clone()));
        fields.insert("user_id".to_string(), Value::String(user_id.clone()));
        store.save(TRANSACTIONS, &id, transaction).await?;
        categorized += 1;
    }

    let uncategorized = transactions.len() - categorized;
    info!(user_id = %user_id, categorized, uncategorized, "Transactions categorized");
    Ok(json!({
        "categorized": categorized,
        "uncategorized": uncategorized,
    }))
}

/// Transaction IDs arrive as strings or numbers; both key the same document.
fn id_key(id: &Value) -> Option<String> {
    match id {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn categorize_prompt(transactions: &[Value]) -> String {
    let listing = transactions
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Assign a spending category (for example groceries, dining, transport, \
         housing, utilities, entertainment, income, other) to each transaction. \
         Reply with only a JSON array of objects with \"id\" and \"category\".\n\n\
         Transactions:\n{listing}"
    )
}
