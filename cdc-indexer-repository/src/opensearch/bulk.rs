//! Bulk request encoding and response parsing.
//!
//! A bulk body is newline-delimited JSON: one action line per document,
//! followed by one source line for index actions. Deletes carry no source.

use serde_json::{json, Value};

use crate::errors::SearchIndexError;
use crate::types::{BatchOperationResult, BatchOperationSummary, BulkAction};

/// Encode actions into the lines of a bulk body, in order.
pub fn encode_bulk_lines(actions: &[BulkAction]) -> Vec<Value> {
    let mut lines = Vec::with_capacity(actions.len() * 2);
    for action in actions {
        match action {
            BulkAction::Index { index, id, source } => {
                lines.push(json!({ "index": { "_index": index, "_id": id } }));
                lines.push(Value::Object(source.clone()));
            }
            BulkAction::Delete { index, id } => {
                lines.push(json!({ "delete": { "_index": index, "_id": id } }));
            }
        }
    }
    lines
}

/// Map a bulk response back onto the actions that produced it.
///
/// Items are reported in request order. A delete answered with 404 counts
/// as a success.
pub fn parse_bulk_response(
    response: &Value,
    actions: &[BulkAction],
) -> Result<BatchOperationSummary, SearchIndexError> {
    let items = response
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| SearchIndexError::parse("Bulk response has no items array"))?;

    if items.len() != actions.len() {
        return Err(SearchIndexError::parse(format!(
            "Bulk response has {} items for {} actions",
            items.len(),
            actions.len()
        )));
    }

    let results = items
        .iter()
        .zip(actions)
        .map(|(item, action)| parse_item(item, action))
        .collect();

    Ok(BatchOperationSummary::from_results(results))
}

fn parse_item(item: &Value, action: &BulkAction) -> BatchOperationResult {
    let outcome = item
        .get(action.directive())
        .or_else(|| item.as_object().and_then(|o| o.values().next()));

    let status = outcome
        .and_then(|o| o.get("status"))
        .and_then(Value::as_u64)
        .map(|s| s as u16);
    let error = outcome.and_then(|o| o.get("error"));

    let not_found_delete = matches!(action, BulkAction::Delete { .. }) && status == Some(404);
    let success = not_found_delete
        || (error.is_none() && status.is_some_and(|s| (200..300).contains(&s)));

    BatchOperationResult {
        id: action.id().to_string(),
        index: action.index().to_string(),
        success,
        status,
        error: if success {
            None
        } else {
            Some(SearchIndexError::bulk_index(describe_item_error(error, status)))
        },
    }
}

fn describe_item_error(error: Option<&Value>, status: Option<u16>) -> String {
    let status = status.map_or_else(|| "unknown".to_string(), |s| s.to_string());
    match error {
        Some(error) => {
            let kind = error.get("type").and_then(Value::as_str).unwrap_or("error");
            let reason = error.get("reason").and_then(Value::as_str).unwrap_or("");
            format!("status {}: {} {}", status, kind, reason).trim_end().to_string()
        }
        None => format!("status {}", status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_action(id: &str) -> BulkAction {
        BulkAction::Index {
            index: "kong-nodes".to_string(),
            id: id.to_string(),
            source: json!({"id": id}).as_object().cloned().unwrap(),
        }
    }

    fn delete_action(id: &str) -> BulkAction {
        BulkAction::Delete {
            index: "kong-services".to_string(),
            id: id.to_string(),
        }
    }

    #[test]
    fn test_encode_index_and_delete() {
        let lines = encode_bulk_lines(&[index_action("n1"), delete_action("svc1")]);

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], json!({"index": {"_index": "kong-nodes", "_id": "n1"}}));
        assert_eq!(lines[1], json!({"id": "n1"}));
        assert_eq!(lines[2], json!({"delete": {"_index": "kong-services", "_id": "svc1"}}));
    }

    #[test]
    fn test_parse_all_successful() {
        let actions = [index_action("n1"), delete_action("svc1")];
        let response = json!({
            "errors": false,
            "items": [
                {"index": {"_id": "n1", "status": 201}},
                {"delete": {"_id": "svc1", "status": 200}}
            ]
        });

        let summary = parse_bulk_response(&response, &actions).unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded, 2);
        assert!(!summary.has_failures());
    }

    #[test]
    fn test_parse_partial_failure() {
        let actions = [index_action("n1"), index_action("n2")];
        let response = json!({
            "errors": true,
            "items": [
                {"index": {"_id": "n1", "status": 201}},
                {"index": {"_id": "n2", "status": 400, "error": {
                    "type": "mapper_parsing_exception",
                    "reason": "failed to parse field"
                }}}
            ]
        });

        let summary = parse_bulk_response(&response, &actions).unwrap();
        assert_eq!(summary.failed, 1);
        let failed = &summary.results[1];
        assert_eq!(failed.id, "n2");
        assert_eq!(failed.status, Some(400));
        let message = failed.error.as_ref().unwrap().to_string();
        assert!(message.contains("mapper_parsing_exception"));
    }

    #[test]
    fn test_parse_delete_not_found_is_success() {
        let actions = [delete_action("gone")];
        let response = json!({
            "errors": false,
            "items": [{"delete": {"_id": "gone", "status": 404, "result": "not_found"}}]
        });

        let summary = parse_bulk_response(&response, &actions).unwrap();
        assert_eq!(summary.succeeded, 1);
    }

    #[test]
    fn test_parse_item_count_mismatch() {
        let actions = [index_action("n1"), index_action("n2")];
        let response = json!({"items": [{"index": {"_id": "n1", "status": 201}}]});

        let result = parse_bulk_response(&response, &actions);
        assert!(matches!(result, Err(SearchIndexError::ParseError(_))));
    }
}
