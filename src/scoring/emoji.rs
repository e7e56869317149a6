//! Emoji density of commit messages.

use regex::Regex;
use std::sync::OnceLock;

static EMOJI_RE: OnceLock<Regex> = OnceLock::new();
static SHORTCODE_RE: OnceLock<Regex> = OnceLock::new();

fn emoji_re() -> &'static Regex {
    EMOJI_RE.get_or_init(|| {
        Regex::new(concat!(
            "[",
            r"\x{1F600}-\x{1F64F}", // emoticons
            r"\x{1F300}-\x{1F5FF}", // symbols & pictographs
            r"\x{1F680}-\x{1F6FF}", // transport & map
            r"\x{1F1E0}-\x{1F1FF}", // flags
            r"\x{2702}-\x{27B0}",
            r"\x{24C2}-\x{1F251}",
            "]+",
        ))
        .expect("emoji pattern is valid")
    })
}

fn shortcode_re() -> &'static Regex {
    SHORTCODE_RE.get_or_init(|| Regex::new(r":[a-z0-9_+\-]+:").expect("shortcode pattern is valid"))
}

/// Count emoji runs and `:shortcode:` emoji in one message.
pub fn count_emojis(text: &str) -> u64 {
    (emoji_re().find_iter(text).count() + shortcode_re().find_iter(text).count()) as u64
}

/// Total emoji score over a set of messages.
pub fn emoji_score<S: AsRef<str>>(messages: &[S]) -> u64 {
    messages.iter().map(|m| count_emojis(m.as_ref())).sum()
}
