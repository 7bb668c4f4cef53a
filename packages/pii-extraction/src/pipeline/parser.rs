//! Best-effort recovery of structured data from free-text model replies.
//!
//! Models wrap JSON in fences, prose and stray markers. Each decoder here
//! tries a fixed sequence of fallbacks and only fails once all of them did.

use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ExtractionError, Result};
use crate::types::phase::NextStep;
use crate::types::prompt::Instructions;

lazy_static! {
    // ```json <payload>```
    static ref FENCED_JSON: Regex = Regex::new(r"```json\s([\s\S]*?)```").unwrap();

    // ```json\n<payload>\n``` where the payload may repeat the marker
    static ref FENCED_JSON_LINES: Regex = Regex::new(r"```json\s*\n([\s\S]*?)\n```").unwrap();

    // Any fenced block
    static ref ANY_FENCE: Regex = Regex::new(r"(?s)```(.*?)```").unwrap();

    // {"Next": "<token>"}
    static ref NEXT_STEP: Regex = Regex::new(r#"\{\s*"Next":\s*"(\w+)"\s*\}"#).unwrap();

    // Start of an instruction object embedded in prose
    static ref INSTRUCTION_START: Regex = Regex::new(r#"\{\s*"job description""#).unwrap();

    // N/10 critique scores
    static ref SCORE: Regex = Regex::new(r"\b(\d+)/10\b").unwrap();

    static ref RESPONSE_SECTION: Regex = Regex::new(r"(?s)<response>(.*?)</response>").unwrap();
}

/// Extract a JSON value from a model reply.
///
/// Tried in order:
/// 1. a ```` ```json ```` fenced block
/// 2. a newline-delimited ```` ```json ```` block, minus embedded markers
/// 3. any fenced block
/// 4. the whole reply
///
/// When every tier fails, the decode error of the whole-reply attempt is
/// returned.
pub fn parse_json_reply(reply: &str) -> Result<Value> {
    if let Some(value) = FENCED_JSON
        .captures(reply)
        .and_then(|c| serde_json::from_str(c[1].trim()).ok())
    {
        return Ok(value);
    }

    if let Some(value) = FENCED_JSON_LINES
        .captures(reply)
        .and_then(|c| serde_json::from_str(c[1].replace("```json", "").trim()).ok())
    {
        return Ok(value);
    }

    if let Some(value) = ANY_FENCE
        .captures(reply)
        .and_then(|c| serde_json::from_str(c[1].trim()).ok())
    {
        return Ok(value);
    }

    Ok(serde_json::from_str(reply.trim())?)
}

/// Extract and decode a typed payload from a model reply.
pub fn parse_reply<T: DeserializeOwned>(reply: &str) -> Result<T> {
    let value = parse_json_reply(reply)?;
    Ok(serde_json::from_value(value)?)
}

/// Recover the meta-expert's phase decision.
///
/// Accepts `{"Next": "verification"}` and, after normalizing quotes,
/// `{'Next': 'verification'}`. Anything else, prose mentioning a next step
/// included, is a protocol violation, as is an unknown token.
pub fn parse_next_step(reply: &str) -> Result<NextStep> {
    let token = NEXT_STEP
        .captures(reply)
        .map(|c| c[1].to_string())
        .or_else(|| {
            let normalized = reply.replace('\'', "\"");
            NEXT_STEP.captures(&normalized).map(|c| c[1].to_string())
        })
        .ok_or_else(|| ExtractionError::protocol(r#"{"Next": "<phase>"}"#, reply))?;

    NextStep::from_token(&token)
        .ok_or_else(|| ExtractionError::protocol(format!("known phase token, got {token}"), reply))
}

/// Recover the meta-expert's instruction payload.
pub fn parse_instructions(reply: &str) -> Result<Instructions> {
    if let Some(instructions) = parse_json_reply(reply)
        .ok()
        .and_then(Instructions::from_value)
    {
        return Ok(instructions);
    }

    INSTRUCTION_START
        .find_iter(reply)
        .filter_map(|m| balanced_object(&reply[m.start()..]))
        .filter_map(|object| serde_json::from_str::<Value>(object).ok())
        .find_map(Instructions::from_value)
        .ok_or_else(|| ExtractionError::protocol("instruction JSON", reply))
}

/// The JSON object `text` starts with, up to its matching closing brace.
///
/// Braces inside string literals are ignored.
fn balanced_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=idx]);
                }
            }
            _ => {}
        }
    }
    None
}

/// All `N/10` scores in a critique, in order of appearance.
pub fn critique_scores(text: &str) -> Vec<u32> {
    SCORE
        .captures_iter(text)
        .filter_map(|c| c[1].parse().ok())
        .collect()
}

/// Whether every score in a critique reaches `cutoff`.
///
/// A critique without scores passes.
pub fn scores_satisfied(text: &str, cutoff: u32) -> bool {
    critique_scores(text).into_iter().all(|s| s >= cutoff)
}

/// Content between `<response>` tags, if present.
pub fn response_section(text: &str) -> Option<&str> {
    RESPONSE_SECTION
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn canonical() -> Value {
        json!({"extracted_information": [{"identifier": "12.05.1980", "context": "born 12.05.1980", "reasoning": "date"}]})
    }

    #[test]
    fn test_tier_fenced_json() {
        let reply = format!("Here you go:\n```json {}```\nThanks", canonical());
        assert_eq!(parse_json_reply(&reply).unwrap(), canonical());
    }

    #[test]
    fn test_tier_newline_fence_with_embedded_marker() {
        // Tier 1 sees "```json" as its payload and fails; tier 2 strips it.
        let reply = format!("```json\n```json\n{}\n```", canonical());
        assert_eq!(parse_json_reply(&reply).unwrap(), canonical());
    }

    #[test]
    fn test_tier_any_fence() {
        let reply = format!("Result:\n```\n{}\n```", canonical());
        assert_eq!(parse_json_reply(&reply).unwrap(), canonical());
    }

    #[test]
    fn test_tier_whole_reply() {
        let reply = format!("  {}  ", canonical());
        assert_eq!(parse_json_reply(&reply).unwrap(), canonical());
    }

    #[test]
    fn test_exhausted_returns_decode_error() {
        let err = parse_json_reply("I could not find anything.").unwrap_err();
        assert!(matches!(err, ExtractionError::JsonParse(_)));
    }

    #[test]
    fn test_next_step_variants() {
        assert_eq!(
            parse_next_step(r#"Let's verify. {"Next": "verification"}"#).unwrap(),
            NextStep::Verification
        );
        assert_eq!(
            parse_next_step("{'Next': 'issues_solving'}").unwrap(),
            NextStep::IssuesSolving
        );
        assert_eq!(
            parse_next_step(r#"{ "Next":  "end" }"#).unwrap(),
            NextStep::End
        );
    }

    #[test]
    fn test_next_step_prose_is_protocol_violation() {
        for reply in ["Next: end", "The next: extracting step failed, please advise"] {
            let err = parse_next_step(reply).unwrap_err();
            assert!(matches!(err, ExtractionError::ProtocolViolation { .. }), "{reply}");
        }
    }

    #[test]
    fn test_next_step_missing_is_protocol_violation() {
        let err = parse_next_step("I think we are done here.").unwrap_err();
        assert!(matches!(err, ExtractionError::ProtocolViolation { .. }));

        let err = parse_next_step(r#"{"Next": "celebrate"}"#).unwrap_err();
        assert!(matches!(err, ExtractionError::ProtocolViolation { .. }));
    }

    #[test]
    fn test_instructions_from_prose() {
        let reply = r#"Sure! {"job description": "Date expert", "instructions": "find dates"} Good luck."#;
        let instructions = parse_instructions(reply).unwrap();
        assert_eq!(instructions.job_description, "Date expert");

        let reply = r#"Plan: {"job description": "Date expert", "instructions": {"first": "find dates", "then": {"check": "context"}}} Done."#;
        let instructions = parse_instructions(reply).unwrap();
        assert_eq!(instructions.job_description, "Date expert");

        assert!(matches!(
            parse_instructions("no json here"),
            Err(ExtractionError::ProtocolViolation { .. })
        ));
    }

    #[test]
    fn test_balanced_object() {
        assert_eq!(balanced_object(r#"{"a": {"b": "}"}} tail"#), Some(r#"{"a": {"b": "}"}}"#));
        assert_eq!(balanced_object(r#"{"a": "\"{"} x"#), Some(r#"{"a": "\"{"}"#));
        assert_eq!(balanced_object(r#"{"a": {"b": 1}"#), None);
    }

    #[test]
    fn test_scores() {
        assert_eq!(critique_scores("Clarity: 9/10, Scope 7/10"), vec![9, 7]);
        assert!(!scores_satisfied("Clarity: 9/10, Scope 7/10", 8));
        assert!(scores_satisfied("Clarity: 9/10, Scope 8/10", 8));
        assert!(scores_satisfied("no scores at all", 8));
    }

    #[test]
    fn test_response_section() {
        let text = "prefix <response>{\"a\": 1}</response> suffix";
        assert_eq!(response_section(text), Some("{\"a\": 1}"));
        assert_eq!(response_section("nothing"), None);
    }

    proptest! {
        #[test]
        fn prop_next_step_ignores_quoting(
            index in 0usize..4,
            single in any::<bool>(),
            space in any::<bool>(),
            prefix in "[a-zA-Z .,]{0,40}",
            suffix in "[a-zA-Z .,]{0,40}",
        ) {
            let step = NextStep::ALL[index];
            let q = if single { '\'' } else { '"' };
            let sep = if space { " " } else { "" };
            let reply = format!("{prefix}{{{q}Next{q}:{sep}{q}{}{q}}}{suffix}", step.token());
            prop_assert_eq!(parse_next_step(&reply).unwrap(), step);
        }
    }
}
