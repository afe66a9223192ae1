//! Two-tier noise filter.
//!
//! Tier 1 is deterministic: bare acknowledgments ("ok", "thanks",
//! emoji-only messages) are answered with a canned ack and never reach the
//! model. Tier 2 is an optional utility-tier probe for borderline-weight
//! messages ("actionable? y/n"); it only runs when enabled in config.
//! A message reaches the full loop only if both tiers pass.

use std::sync::LazyLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use aho_corasick::AhoCorasick;
use tracing::debug;

use murmur_provider::router::ChatOptions;
use murmur_provider::{CompletionContent, Message, ProviderRouter, Tier};

use crate::config::NoiseConfig;

/// Phrases that, alone, constitute an acknowledgment.
const ACK_PATTERNS: &[&str] = &[
    "ok",
    "okay",
    "k",
    "kk",
    "yes",
    "no",
    "yep",
    "nope",
    "sure",
    "thanks",
    "thank you",
    "thx",
    "ty",
    "got it",
    "sounds good",
    "great",
    "nice",
    "cool",
    "lol",
    "haha",
    "ack",
    "noted",
    "will do",
    "done",
];

/// The canned replies rotated through for filtered messages.
const CANNED_ACKS: &[&str] = &["👍", "got it", "ok!", "noted", "ack"];

static ACK_AUTOMATON: LazyLock<AhoCorasick> =
    LazyLock::new(|| AhoCorasick::new(ACK_PATTERNS).expect("static patterns compile"));

/// Where a message's weight falls relative to the configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightBand {
    /// Strictly below the noise threshold; filter (equality passes).
    Sub,
    /// In the borderline band; consult tier 2 if enabled.
    Borderline,
    /// Clear signal; process normally.
    Clear,
}

/// Deterministic tier-1 and LLM tier-2 noise gating.
pub struct NoiseFilter {
    ack_counter: AtomicUsize,
}

impl NoiseFilter {
    /// Create a filter.
    pub fn new() -> Self {
        Self {
            ack_counter: AtomicUsize::new(0),
        }
    }

    /// Tier 1: does the whole message amount to an acknowledgment?
    ///
    /// Returns the canned ack to reply with when it does.
    pub fn tier1(&self, text: &str) -> Option<String> {
        let normalized = normalize(text);

        // Emoji-only or punctuation-only messages are acks.
        if normalized.is_empty() && !text.trim().is_empty() {
            return Some(self.canned_ack());
        }

        // The ack phrase must span the entire normalized message, not just
        // appear inside it ("ok, but first check the logs" is not noise).
        // Overlapping iteration so "okay" is seen as "okay" and not just
        // its "ok" prefix.
        let spans_whole = ACK_AUTOMATON
            .find_overlapping_iter(&normalized)
            .any(|m| m.start() == 0 && m.end() == normalized.len());

        if spans_whole {
            debug!(text, "tier-1 noise match");
            Some(self.canned_ack())
        } else {
            None
        }
    }

    /// Classify a weight against the configured thresholds.
    pub fn band(weight: f32, config: &NoiseConfig) -> WeightBand {
        if weight < config.weight_threshold {
            WeightBand::Sub
        } else if weight < config.borderline_ceiling {
            WeightBand::Borderline
        } else {
            WeightBand::Clear
        }
    }

    /// Tier 2: ask a utility-tier model whether a borderline message is
    /// actionable. Fails open — any error or unparseable reply counts as
    /// actionable so real requests are never silently dropped.
    pub async fn tier2_actionable(&self, router: &ProviderRouter, text: &str) -> bool {
        let prompt = format!(
            "Is the following message actionable (does it ask for something to \
             be done or answered)? Reply with only `y` or `n`.\n\nMessage: {text}"
        );

        let messages = [Message::user(prompt)];
        let opts = ChatOptions::for_tier(Tier::Utility);

        match router.chat(&messages, &opts).await {
            Ok(completion) => match completion.content {
                CompletionContent::Text(reply) => {
                    let answer = reply.trim().to_lowercase();
                    let actionable = !answer.starts_with('n');
                    debug!(text, actionable, "tier-2 noise probe");
                    actionable
                }
                CompletionContent::ToolCalls(_) => true,
            },
            Err(e) => {
                debug!(error = %e, "tier-2 noise probe failed, treating as actionable");
                true
            }
        }
    }

    /// The next canned ack in rotation.
    pub fn canned_ack(&self) -> String {
        let index = self.ack_counter.fetch_add(1, Ordering::Relaxed) % CANNED_ACKS.len();
        CANNED_ACKS[index].to_owned()
    }
}

impl Default for NoiseFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase, trim, and strip everything that is not a letter, digit or
/// inner whitespace, so "Thanks!!" and "thanks" normalize identically.
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .trim()
        .to_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
