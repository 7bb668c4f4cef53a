//! Concurrent per-finding verification.
//!
//! Every finding is judged by its own request so one verdict cannot leak
//! into another. The round is all-or-nothing: partial results are dropped.

use futures::future::join_all;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{ExtractionError, Result};
use crate::pipeline::parser::parse_json_reply;
use crate::traits::llm::LlmClient;
use crate::types::finding::{FindingId, VerificationVerdict};

/// One verification request.
#[derive(Debug, Clone)]
pub struct VerificationRequest {
    pub finding_id: FindingId,
    pub user_prompt: String,
}

impl VerificationRequest {
    pub fn new(finding_id: FindingId, user_prompt: impl Into<String>) -> Self {
        Self {
            finding_id,
            user_prompt: user_prompt.into(),
        }
    }
}

/// Send every request concurrently and collect one verdict per request.
///
/// Concurrency is unbounded here; callers bound it at the document level.
/// A failed transport call fails the round with
/// [`ExtractionError::VerificationPartialFailure`]. A reply that breaks the
/// verdict contract fails it with that error directly.
pub async fn fan_out(
    llm: &dyn LlmClient,
    system_prompt: &str,
    requests: Vec<VerificationRequest>,
) -> Result<Vec<VerificationVerdict>> {
    let total = requests.len();
    let results = join_all(requests.iter().map(|request| async move {
        let reply = llm.ask(system_prompt, &request.user_prompt).await?;
        debug!(finding_id = %request.finding_id, "Verification reply received");
        parse_verdict(&request.finding_id, &reply)
    }))
    .await;

    let mut verdicts = Vec::with_capacity(total);
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(verdict) => verdicts.push(verdict),
            Err(e) if e.is_retryable() => failures.push(e),
            Err(e) => return Err(e),
        }
    }

    if let Some(first) = failures.into_iter().next() {
        let failed = total - verdicts.len();
        warn!(failed, total, error = %first, "Verification round failed");
        return Err(ExtractionError::VerificationPartialFailure {
            failed,
            total,
            source: Box::new(first),
        });
    }
    Ok(verdicts)
}

/// Decode the verdict for `finding_id`.
///
/// Expected shape: `{"<id>": {"bool": true, "reasoning": "..."}}`. A bare
/// `{"bool": ..., "reasoning": ...}` object is attributed to the requested
/// finding. A verdict keyed by any other id is a merge error.
pub fn parse_verdict(finding_id: &FindingId, reply: &str) -> Result<VerificationVerdict> {
    let value = parse_json_reply(reply)?;
    let Value::Object(mut map) = value else {
        return Err(ExtractionError::protocol("verdict object", reply));
    };

    let body = if let Some(body) = map.remove(finding_id.as_str()) {
        body
    } else if map.contains_key("bool") {
        Value::Object(map)
    } else if let Some(other) = map.keys().next() {
        return Err(ExtractionError::MergeKey {
            finding_id: other.clone(),
        });
    } else {
        return Err(ExtractionError::protocol("verdict object", reply));
    };

    let Value::Object(body) = body else {
        return Err(ExtractionError::protocol("verdict object", reply));
    };
    let accepted = verdict_flag(&body).ok_or_else(|| ExtractionError::protocol("verdict bool", reply))?;
    let reasoning = body
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(VerificationVerdict {
        finding_id: finding_id.clone(),
        accepted,
        reasoning,
    })
}

fn verdict_flag(body: &Map<String, Value>) -> Option<bool> {
    match body.get("bool").or_else(|| body.get("accepted"))? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedLlm;
    use std::collections::HashSet;

    const VERIFIER: &str = "You verify one mention.";

    fn request(id: &str) -> VerificationRequest {
        VerificationRequest::new(FindingId::from(id), format!("<solution>{id}</solution>"))
    }

    #[test]
    fn test_parse_keyed_and_bare_verdicts() {
        let id = FindingId::from("f1");
        let keyed = parse_verdict(&id, r#"{"f1": {"bool": false, "reasoning": "not a date"}}"#).unwrap();
        assert!(!keyed.accepted);
        assert_eq!(keyed.reasoning, "not a date");

        let bare = parse_verdict(&id, "```json\n{\"bool\": \"True\", \"reasoning\": \"ok\"}\n```").unwrap();
        assert!(bare.accepted);
        assert_eq!(bare.finding_id, id);
    }

    #[test]
    fn test_foreign_id_is_merge_error() {
        let err = parse_verdict(&FindingId::from("f1"), r#"{"zz": {"bool": true}}"#).unwrap_err();
        assert!(matches!(err, ExtractionError::MergeKey { finding_id } if finding_id == "zz"));
    }

    #[tokio::test]
    async fn test_n_findings_yield_n_verdicts() {
        let llm = ScriptedLlm::new()
            .with_user_reply("<solution>a</solution>", r#"{"a": {"bool": true, "reasoning": "ok"}}"#)
            .with_user_reply("<solution>b</solution>", r#"{"b": {"bool": false, "reasoning": "no"}}"#)
            .with_user_reply("<solution>c</solution>", r#"{"c": {"bool": true, "reasoning": "ok"}}"#);

        let verdicts = fan_out(&llm, VERIFIER, vec![request("a"), request("b"), request("c")])
            .await
            .unwrap();

        assert_eq!(verdicts.len(), 3);
        let ids: HashSet<_> = verdicts.iter().map(|v| v.finding_id.as_str().to_string()).collect();
        assert_eq!(ids, HashSet::from(["a".into(), "b".into(), "c".into()]));
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_one_failure_fails_the_round() {
        let llm = ScriptedLlm::new()
            .with_user_failure("<solution>b</solution>", "connection reset")
            .with_reply(VERIFIER, r#"{"bool": true, "reasoning": "ok"}"#);

        let err = fan_out(&llm, VERIFIER, vec![request("a"), request("b"), request("c")])
            .await
            .unwrap_err();

        match err {
            ExtractionError::VerificationPartialFailure { failed, total, .. } => {
                assert_eq!(failed, 1);
                assert_eq!(total, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(ExtractionError::VerificationPartialFailure {
            failed: 1,
            total: 3,
            source: Box::new(ExtractionError::AI("x".into())),
        }
        .is_retryable());
    }

    #[tokio::test]
    async fn test_empty_round() {
        let llm = ScriptedLlm::new();
        assert!(fan_out(&llm, VERIFIER, vec![]).await.unwrap().is_empty());
        assert_eq!(llm.call_count(), 0);
    }
}
