/// Bounded JSON payloads for phase results.
///
/// `phase_results` blobs are capped at write time; beyond the bound a
/// structured per-phase summary is stored instead of the raw payload.
use serde_json::{Map, Value, json};

/// Maximum serialized size for a phase-results payload (~5 MB).
pub(crate) const MAX_PHASE_RESULTS_BYTES: usize = 5 * 1024 * 1024;

/// Serialize phase results, replacing oversized payloads with a
/// `{phase: {success, counts}}` summary.
#[must_use]
pub(crate) fn bounded_phase_results(results: &Map<String, Value>) -> Value {
    let full = Value::Object(results.clone());
    let serialized_len = full.to_string().len();
    if serialized_len <= MAX_PHASE_RESULTS_BYTES {
        return full;
    }

    let mut summary = Map::new();
    for (phase, payload) in results {
        summary.insert(phase.clone(), summarize_phase(payload));
    }
    Value::Object(summary)
}

fn summarize_phase(payload: &Value) -> Value {
    let Some(object) = payload.as_object() else {
        return json!({ "truncated": true });
    };

    let mut counts = Map::new();
    for (key, value) in object {
        if let Some(number) = value.as_i64() {
            counts.insert(key.clone(), json!(number));
        } else if let Some(number) = value.as_f64() {
            counts.insert(key.clone(), json!(number));
        }
    }

    json!({
        "success": object.get("success").and_then(Value::as_bool).unwrap_or(false),
        "counts": counts,
        "truncated": true,
    })
}

/// Truncate an error message to the persisted limit of 1000 characters.
#[must_use]
pub(crate) fn truncate_error(message: &str) -> String {
    if message.len() <= 1000 {
        return message.to_string();
    }
    let mut end = 1000;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_payloads_pass_through() {
        let mut results = Map::new();
        results.insert("serp_collection".into(), json!({"success": true, "n": 5}));

        let bounded = bounded_phase_results(&results);
        assert_eq!(bounded["serp_collection"]["n"], 5);
        assert!(bounded["serp_collection"].get("truncated").is_none());
    }

    #[test]
    fn oversized_payloads_collapse_to_counts() {
        let huge = "x".repeat(MAX_PHASE_RESULTS_BYTES + 1);
        let mut results = Map::new();
        results.insert(
            "content_scraping".into(),
            json!({"success": true, "urls_scraped": 42, "blob": huge}),
        );

        let bounded = bounded_phase_results(&results);
        let phase = &bounded["content_scraping"];
        assert_eq!(phase["truncated"], true);
        assert_eq!(phase["success"], true);
        assert_eq!(phase["counts"]["urls_scraped"], 42);
        assert!(phase.get("blob").is_none());
    }

    #[test]
    fn truncate_error_caps_at_limit() {
        let long = "e".repeat(2000);
        assert_eq!(truncate_error(&long).len(), 1000);
        assert_eq!(truncate_error("short"), "short");
    }
}
