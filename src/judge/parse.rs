//! Reading a grade, verdict and badge out of a review bot reply.

use regex::Regex;
use serde_json::Value;

use crate::judge::service::ReviewVerdict;
use crate::remote::{RemoteError, truncate_body};
use crate::scoring::PENDING_VERDICT;

/// Bot comments containing any of these are status notices, not reviews.
const NOTICE_MARKERS: &[&str] = &[
    "auto-generated comment",
    "Review skipped",
    "Actions performed",
    "Review triggered",
    "finishing_touch_checkbox",
];

/// Sentence openers that introduce the review rather than judge the code.
const PREAMBLE_OPENERS: &[&str] = &["I", "The PR", "This pull", "Here"];

const MIN_ROAST_LEN: usize = 30;
const MAX_ROAST_LEN: usize = 200;
/// How much of the reply is kept alongside the parsed verdict.
const MAX_RAW_RESPONSE: usize = 2000;

/// Compiled patterns for review replies.
///
/// Replies are tried in order: a fenced JSON block, bold `**Grade**:` labels,
/// loose `grade: X` text. A verdict missing from all three falls back to the
/// first substantial sentence of the reply.
#[derive(Debug)]
pub struct ReviewParser {
    json_block: Regex,
    bold_grade: Regex,
    bold_verdict: Regex,
    bold_badge: Regex,
    loose_grade: Regex,
    loose_verdict: Regex,
    loose_badge: Regex,
    grade: Regex,
    sentence_break: Regex,
    min_len: usize,
}

impl ReviewParser {
    pub fn new(min_len: usize) -> Result<Self, regex::Error> {
        Ok(Self {
            json_block: Regex::new(r"(?s)```json\s*\n(.*?)\n\s*```")?,
            bold_grade: Regex::new(r"\*\*(?:GRADE|Grade|grade)\*\*[:\s]*([A-F][+-]?)")?,
            bold_verdict: Regex::new(r#"\*\*(?:VERDICT|Verdict|verdict)\*\*[:\s]*"?([^"\n]+)"?"#)?,
            bold_badge: Regex::new(r#"\*\*(?:BADGE|Badge|badge)\*\*[:\s]*"?([^"\n]+)"?"#)?,
            loose_grade: Regex::new(r"(?:grade|Grade)[:\s]+([A-F][+-]?)")?,
            loose_verdict: Regex::new(r#"(?:verdict|Verdict)[:\s]+"([^"]+)""#)?,
            loose_badge: Regex::new(r#"(?:badge|Badge)[:\s]+"([^"]{3,40})""#)?,
            grade: Regex::new(r"^[A-F][+-]?$")?,
            sentence_break: Regex::new(r"[.!]\s")?,
            min_len,
        })
    }

    /// Whether a bot comment is a candidate review.
    pub fn is_review(&self, body: &str) -> bool {
        body.len() >= self.min_len && !NOTICE_MARKERS.iter().any(|m| body.contains(m))
    }

    /// Parse a review reply. A reply without a recognizable letter grade is
    /// `Malformed`. The verdict keeps a truncated copy of the reply.
    pub fn parse(&self, body: &str) -> Result<ReviewVerdict, RemoteError> {
        self.read_verdict(body)
            .map(|verdict| verdict.with_raw_response(truncate_body(body, MAX_RAW_RESPONSE)))
    }

    fn read_verdict(&self, body: &str) -> Result<ReviewVerdict, RemoteError> {
        if let Some(verdict) = self.from_json_block(body)? {
            return Ok(verdict);
        }

        let grade = capture(&self.bold_grade, body).or_else(|| capture(&self.loose_grade, body));
        let Some(grade) = grade else {
            return Err(RemoteError::Malformed(format!(
                "no grade in review reply: {}",
                truncate_body(body, 100)
            )));
        };

        let verdict = capture(&self.bold_verdict, body)
            .or_else(|| capture(&self.loose_verdict, body))
            .unwrap_or_else(|| self.first_roast(body));
        let badge = capture(&self.bold_badge, body).or_else(|| capture(&self.loose_badge, body));

        Ok(ReviewVerdict {
            grade,
            verdict,
            badge,
            raw_response: None,
        })
    }

    fn from_json_block(&self, body: &str) -> Result<Option<ReviewVerdict>, RemoteError> {
        let Some(block) = self.json_block.captures(body).and_then(|c| c.get(1)) else {
            return Ok(None);
        };
        let Ok(value) = serde_json::from_str::<Value>(block.as_str()) else {
            log::debug!("Review JSON block did not parse, trying labels");
            return Ok(None);
        };

        let field = |name: &str| {
            value
                .get(name)
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let Some(grade) = field("grade") else {
            return Ok(None);
        };
        if !self.grade.is_match(&grade) {
            return Err(RemoteError::Malformed(format!("unrecognized grade in review: {}", grade)));
        }

        Ok(Some(ReviewVerdict {
            grade,
            verdict: field("verdict").unwrap_or_else(|| self.first_roast(body)),
            badge: field("badge"),
            raw_response: None,
        }))
    }

    /// First sentence long enough to be a judgment rather than a preamble.
    fn first_roast(&self, body: &str) -> String {
        self.sentence_break
            .split(body)
            .map(str::trim)
            .find(|s| s.len() > MIN_ROAST_LEN && !PREAMBLE_OPENERS.iter().any(|p| s.starts_with(p)))
            .map(|s| s.chars().take(MAX_ROAST_LEN).collect())
            .unwrap_or_else(|| PENDING_VERDICT.to_string())
    }
}

fn capture(re: &Regex, body: &str) -> Option<String> {
    re.captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}
