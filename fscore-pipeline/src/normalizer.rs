//! Response Normalizer
//!
//! Turns the scoring service's free-text replies into a strict
//! `user -> score` mapping in two independent phases.
//!
//! # Phase 1: tolerant cleanup (`cleanup`)
//! 1. Escape artifacts the service emits instead of real characters:
//!    literal `\n`, `\r`, `\t` and `\\` are dropped, `\"` becomes `"`,
//!    `\uXXXX` is decoded, any other lone backslash is dropped.
//!    Inside a string opened by a real `"` (and the payload is not itself
//!    one quoted string), `\"` is a genuine escape and is kept.
//!    Then every whitespace character is removed.
//! 2. Non-ASCII code points are removed.
//! 3. When a `{...}` span is surrounded by other text (prose, code fences),
//!    only the outermost span is kept.
//! 4. One pair of enclosing `"` is stripped when it wraps the whole payload.
//!
//! What survives is printable, non-whitespace ASCII; letters, digits,
//! `:`, `,`, `{`, `}` and `"` pass through untouched.
//!
//! # Phase 2: strict decoding (`decode`)
//! The cleaned text must be a JSON object whose values are integers,
//! integral floats or strings holding an integer. Scores outside 0-100 are
//! clamped. Empty text decodes to an empty mapping.

use crate::error::{NormalizationError, PipelineError};
use crate::raw_log::{RawLog, RawResponseRecord};
use crate::scores::{ScoreMapping, MAX_SCORE};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Phase 1: strip formatting noise without touching structural characters
pub fn cleanup(raw: &str) -> String {
    let text = strip_escape_artifacts(raw);
    let text = remove_whitespace(&text);
    let text = remove_non_ascii(&text);
    let text = extract_object_span(&text);
    strip_enclosing_quotes(text).to_string()
}

/// Drop literal escape sequences, turning escaped quotes into quotes
fn strip_escape_artifacts(raw: &str) -> String {
    let trimmed = raw.trim();
    // The whole reply is a JSON string, so every `\"` stands for a quote
    let wrapped = trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"');
    let mut in_quoted_string = false;

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            if c == '"' && !wrapped {
                in_quoted_string = !in_quoted_string;
            }
            out.push(c);
            continue;
        }

        match chars.peek().copied() {
            Some('n') | Some('r') | Some('t') | Some('\\') => {
                chars.next();
            }
            Some('"') => {
                chars.next();
                if in_quoted_string {
                    out.push('\\');
                }
                out.push('"');
            }
            Some('u') => {
                let hex: String = chars.clone().skip(1).take(4).collect();
                let decoded = (hex.len() == 4)
                    .then(|| u32::from_str_radix(&hex, 16).ok())
                    .flatten()
                    .and_then(char::from_u32);
                if let Some(decoded) = decoded {
                    for _ in 0..5 {
                        chars.next();
                    }
                    out.push(decoded);
                }
            }
            _ => {}
        }
    }

    out
}

fn remove_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

fn remove_non_ascii(text: &str) -> String {
    text.chars().filter(|c| c.is_ascii() && !c.is_ascii_control()).collect()
}

/// Keep the outermost `{...}` span when other text surrounds it
fn extract_object_span(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

fn strip_enclosing_quotes(text: &str) -> &str {
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        &text[1..text.len() - 1]
    } else {
        text
    }
}

/// Phase 2: decode cleaned text into a mapping
///
/// # Errors
/// A human-readable reason when the text is not a JSON object of
/// username → integer score.
pub fn decode(cleaned: &str) -> Result<ScoreMapping, String> {
    if cleaned.is_empty() {
        return Ok(ScoreMapping::new());
    }

    let value: Value =
        serde_json::from_str(cleaned).map_err(|e| format!("not valid JSON: {}", e))?;

    let entries = match value {
        Value::Object(entries) => entries,
        other => return Err(format!("expected a JSON object, found {}", value_kind(&other))),
    };

    let mut scores = ScoreMapping::new();
    for (user_id, value) in entries {
        if user_id.is_empty() {
            return Err("empty username".to_string());
        }
        let score = score_from_value(&user_id, &value)?;
        scores.insert(user_id, score);
    }
    Ok(scores)
}

fn score_from_value(user_id: &str, value: &Value) -> Result<u8, String> {
    let raw = match value {
        Value::Number(number) => match number.as_i64() {
            Some(n) => n,
            None => match number.as_f64() {
                Some(f) if f.is_finite() && f.fract() == 0.0 => f as i64,
                _ => return Err(format!("score for {:?} is not an integer: {}", user_id, number)),
            },
        },
        Value::String(text) => text.trim().parse::<i64>().map_err(|_| {
            format!("score for {:?} is not an integer: {:?}", user_id, text)
        })?,
        other => {
            return Err(format!(
                "score for {:?} must be a number, found {}",
                user_id,
                value_kind(other)
            ))
        }
    };

    if !(0..=i64::from(MAX_SCORE)).contains(&raw) {
        warn!(user_id, score = raw, "Score outside 0-100, clamping");
    }
    Ok(raw.clamp(0, i64::from(MAX_SCORE)) as u8)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Cleanup + decode one reply
pub fn normalize_text(raw: &str) -> Result<ScoreMapping, NormalizationError> {
    normalize_fragment(raw, None)
}

fn normalize_fragment(
    raw: &str,
    batch_index: Option<usize>,
) -> Result<ScoreMapping, NormalizationError> {
    let cleaned = cleanup(raw);
    decode(&cleaned).map_err(|reason| NormalizationError {
        batch_index,
        fragment: raw.to_string(),
        cleaned,
        reason,
    })
}

/// Normalize every record and merge them in log order
///
/// A user scored by several batches keeps the score of the latest batch.
/// The first record that fails to decode aborts the merge.
pub fn normalize_records(records: &[RawResponseRecord]) -> Result<ScoreMapping, NormalizationError> {
    let mut merged = ScoreMapping::new();

    for record in records {
        let scores = normalize_fragment(&record.raw_text, Some(record.batch_index))?;
        debug!(
            batch_index = record.batch_index,
            users = scores.len(),
            "Batch reply normalized"
        );
        for (user_id, score) in scores.iter() {
            if let Some(previous) = merged.insert(user_id, score) {
                debug!(user_id, previous, score, "User scored by more than one batch, keeping latest");
            }
        }
    }

    Ok(merged)
}

/// Normalize the whole raw log and overwrite the score mapping at `output`
///
/// Nothing is written on failure: an earlier valid mapping stays in place and
/// the raw log is left untouched for repair or another attempt.
pub fn normalize_log(raw_log: &RawLog, output: &Path) -> Result<ScoreMapping, PipelineError> {
    let records = raw_log.read_all()?;
    info!(
        path = %raw_log.path().display(),
        records = records.len(),
        "Normalizing raw log"
    );

    let scores = normalize_records(&records).map_err(|e| {
        error!(
            batch_index = ?e.batch_index,
            reason = %e.reason,
            fragment = %e.fragment,
            cleaned = %e.cleaned,
            "Raw reply could not be decoded; fix the fragment in the raw log and normalize again"
        );
        PipelineError::from(e)
    })?;

    scores.save(output)?;
    Ok(scores)
}
