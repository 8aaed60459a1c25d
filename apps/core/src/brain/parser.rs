//! Strict decoding of the model's answers.
//!
//! Anything that does not fit the expected shape is a `MalformedResponse`;
//! nothing here clamps, pads or guesses.

use crate::error::AppError;
use crate::models::SentimentScores;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*(.*?)\s*```$").expect("Invalid regex: code fence"));

static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s+").expect("Invalid regex: list marker"));

#[derive(Deserialize)]
struct RawSentiment {
    sentiment_score: f64,
    top_3_themes: Vec<String>,
    controversy_level: i64,
}

/// Removes a surrounding markdown code fence, which models add despite being told not to.
fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    FENCE
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map_or(trimmed, |m| m.as_str())
}

pub fn parse_sentiment(raw: &str) -> Result<SentimentScores, AppError> {
    let body: RawSentiment = serde_json::from_str(strip_fence(raw))?;
    SentimentScores::new(body.sentiment_score, body.top_3_themes, body.controversy_level)
}

/// Splits a numbered or bulleted list into its items, markers removed.
pub fn parse_insights(raw: &str) -> Result<Vec<String>, AppError> {
    let items: Vec<String> = strip_fence(raw)
        .lines()
        .map(|line| LIST_MARKER.replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect();

    if items.is_empty() {
        return Err(AppError::MalformedResponse(
            "insight response contained no recommendations".to_string(),
        ));
    }
    Ok(items)
}

pub fn parse_reply(raw: &str) -> Result<String, AppError> {
    let reply = raw.trim();
    if reply.is_empty() {
        return Err(AppError::MalformedResponse("empty chat reply".to_string()));
    }
    Ok(reply.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let scores = parse_sentiment(
            r#"{"sentiment_score": 0.7, "top_3_themes": ["audio", "editing"], "controversy_level": 2}"#,
        )
        .unwrap();
        assert_eq!(scores, SentimentScores::new(0.7, vec!["audio".into(), "editing".into()], 2).unwrap());
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "```json\n{\"sentiment_score\": -0.4, \"top_3_themes\": [\"price\"], \"controversy_level\": 7}\n```";
        assert!(parse_sentiment(raw).is_ok());
    }

    #[test]
    fn test_rejects_bad_shapes() {
        for raw in [
            "not json",
            r#"{"sentiment_score": 0.1, "top_3_themes": []}"#,
            r#"{"sentiment_score": "high", "top_3_themes": [], "controversy_level": 3}"#,
            r#"{"sentiment_score": 2.0, "top_3_themes": [], "controversy_level": 3}"#,
            r#"{"sentiment_score": 0.1, "top_3_themes": [], "controversy_level": 3.5}"#,
        ] {
            let err = parse_sentiment(raw).unwrap_err();
            assert!(matches!(err, AppError::MalformedResponse(_)), "{}", raw);
        }
    }

    #[test]
    fn test_parse_insights_strips_markers() {
        let raw = "1. Keep the intro short\n\n2) Fix the audio\n- Post more tutorials\n";
        assert_eq!(
            parse_insights(raw).unwrap(),
            vec!["Keep the intro short", "Fix the audio", "Post more tutorials"]
        );
        assert!(parse_insights("  \n ").is_err());
    }

    #[test]
    fn test_parse_reply_trims() {
        assert_eq!(parse_reply("  hello \n").unwrap(), "hello");
        assert!(parse_reply("   ").is_err());
    }
}
