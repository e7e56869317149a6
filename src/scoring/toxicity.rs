//! Toxicity scoring of commit messages.
//!
//! The model is a collaborator behind [`ToxicityScorer`]; [`LexiconScorer`]
//! is the built-in word-list implementation.

use crate::domain::WorstCommit;

pub trait ToxicityScorer: Send + Sync {
    /// Per-axis severity in `0.0..=1.0`.
    fn axis_scores(&self, text: &str) -> Vec<(&'static str, f64)>;

    /// Overall severity: the highest axis score.
    fn score(&self, text: &str) -> f64 {
        self.axis_scores(text).into_iter().map(|(_, s)| s).fold(0.0, f64::max)
    }
}

/// Severity added by each additional matching word, compounding toward 1.0.
const WORD_WEIGHT: f64 = 0.4;

const OBSCENE: &[&str] = &["fuck", "fucking", "fucked", "shit", "shitty", "crap", "damn", "wtf", "bullshit"];
const INSULT: &[&str] = &["stupid", "idiot", "idiotic", "dumb", "moron", "garbage", "trash", "useless", "braindead"];
const THREAT: &[&str] = &["die", "murder", "burn"];

/// Word-list scorer over a few fixed axes.
#[derive(Debug, Clone)]
pub struct LexiconScorer {
    axes: Vec<(&'static str, &'static [&'static str])>,
}

impl Default for LexiconScorer {
    fn default() -> Self {
        Self {
            axes: vec![("obscene", OBSCENE), ("insult", INSULT), ("threat", THREAT)],
        }
    }
}

impl ToxicityScorer for LexiconScorer {
    fn axis_scores(&self, text: &str) -> Vec<(&'static str, f64)> {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()).collect();

        self.axes
            .iter()
            .map(|(axis, lexicon)| {
                let hits = words.iter().filter(|w| lexicon.contains(w)).count() as i32;
                (*axis, 1.0 - (1.0 - WORD_WEIGHT).powi(hits))
            })
            .collect()
    }
}

/// The message with the highest score on any axis; `None` if nothing scores above zero.
pub fn find_worst_commit<S: AsRef<str>>(scorer: &dyn ToxicityScorer, messages: &[S]) -> Option<WorstCommit> {
    let mut worst: Option<WorstCommit> = None;
    for message in messages {
        for (axis, score) in scorer.axis_scores(message.as_ref()) {
            let current = worst.as_ref().map(|w| w.score).unwrap_or(0.0);
            if score > current {
                worst = Some(WorstCommit {
                    message: message.as_ref().to_string(),
                    axis: axis.to_string(),
                    score,
                });
            }
        }
    }
    worst
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_message_scores_zero() {
        let scorer = LexiconScorer::default();
        assert_eq!(scorer.score("refactor parser"), 0.0);
    }

    #[test]
    fn test_more_hits_score_higher() {
        let scorer = LexiconScorer::default();
        let one = scorer.score("remove stupid hack");
        let two = scorer.score("remove stupid idiotic hack");
        assert!(one > 0.0);
        assert!(two > one);
        assert!(two < 1.0);
    }

    #[test]
    fn test_worst_commit_picks_max_axis() {
        let scorer = LexiconScorer::default();
        let messages = ["fix typo", "this shit is garbage", "wtf wtf wtf"];
        let worst = find_worst_commit(&scorer, &messages).unwrap();
        assert_eq!(worst.message, "wtf wtf wtf");
        assert_eq!(worst.axis, "obscene");
    }

    #[test]
    fn test_worst_commit_none_when_clean() {
        let scorer = LexiconScorer::default();
        assert!(find_worst_commit(&scorer, &["docs", "tests"]).is_none());
        assert!(find_worst_commit::<&str>(&scorer, &[]).is_none());
    }
}
