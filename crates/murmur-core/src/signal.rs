//! Signal classification.
//!
//! Every inbound message is reduced to a 5-tuple signal: mode, genre, type,
//! format and weight (plus a confidence marker). The classifier is fully
//! deterministic — regex and lexical rules for mode/genre hints, a
//! word/punctuation heuristic for weight — so identical input always yields
//! an identical signal. An optional utility-tier LLM refinement exists for
//! ambiguous messages and is the only nondeterministic branch; it is off
//! unless enabled in configuration.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use murmur_provider::router::ChatOptions;
use murmur_provider::{CompletionContent, Message, ProviderRouter, Tier};

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// What the user wants the agent to be doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Execute,
    Assist,
    Analyze,
    Build,
    Maintain,
}

/// The communicative act of the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Genre {
    Direct,
    Inform,
    Commit,
    Decide,
    Express,
}

/// The surface shape of the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Message,
    Document,
    Notification,
    Command,
    Transcript,
}

/// How sure the deterministic rules are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Low,
}

/// The classified signal for one inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub mode: Mode,
    pub genre: Genre,
    /// Free-form type string, e.g. `"request"`, `"question"`.
    #[serde(rename = "type")]
    pub kind: String,
    pub format: Format,
    /// Normalized weight in `[0, 1)`; gates processing depth.
    pub weight: f32,
    pub confidence: Confidence,
}

impl Signal {
    /// Derive the model tier for this signal's weight.
    pub fn tier(&self) -> Tier {
        if self.weight < 0.3 {
            Tier::Utility
        } else if self.weight < 0.7 {
            Tier::Specialist
        } else {
            Tier::Elite
        }
    }

    /// One-line summary for the prompt's signal section.
    pub fn summary_line(&self) -> String {
        format!(
            "signal: mode={:?} genre={:?} type={} format={:?} weight={:.2}",
            self.mode, self.genre, self.kind, self.format, self.weight
        )
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

static BUILD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(build|implement|create|write|add|scaffold|generate|draft)\b").unwrap()
});
static ANALYZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(analyze|analyse|compare|evaluate|investigate|diagnose|explain|summarize|why)\b")
        .unwrap()
});
static MAINTAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(fix|repair|update|upgrade|refactor|clean up|migrate|patch)\b").unwrap()
});
static EXECUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(run|execute|read|open|send|deploy|delete|list|fetch|download|start|stop|restart|install)\b",
    )
    .unwrap()
});

static EXPRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(ok(ay)?|k+|yes|no|yep|nope|sure|thanks|thank you|thx|ty|hello|hi|hey|great|awesome|nice|cool|lol|haha|got it)\b",
    )
    .unwrap()
});
static COMMIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(i will|i'll|we will|we'll|going to|on it)\b").unwrap());
static DECIDE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(should (we|i)|decide|choose|pick one|which (one|option)|or should)\b").unwrap()
});
static QUESTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(what|who|when|where|why|how|can|could|does|do|is|are|will)\b").unwrap()
});

static TRANSCRIPT_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*\w[\w .-]*:\s").unwrap());

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Deterministically classify one inbound message.
pub fn classify(text: &str) -> Signal {
    let lowered = text.to_lowercase();
    let trimmed = lowered.trim();

    let format = detect_format(text, trimmed);
    let (mode, mode_matched) = detect_mode(trimmed);
    let genre = detect_genre(trimmed, mode_matched);
    let kind = detect_kind(trimmed, genre, format);
    let weight = weigh(text);

    // Low confidence only when every rule fell through to its default.
    let confidence = if mode_matched || genre != Genre::Inform || kind != "statement" {
        Confidence::High
    } else {
        Confidence::Low
    };

    let signal = Signal {
        mode,
        genre,
        kind,
        format,
        weight,
        confidence,
    };
    debug!(?signal.mode, ?signal.genre, weight = signal.weight, "message classified");
    signal
}

/// Weight heuristic: `1.3·words + 0.5·punctuation`, normalized into `[0, 1)`.
///
/// Stable for identical input; monotonic in message substance. A bare "ok"
/// lands below the default 0.15 noise threshold.
pub fn weigh(text: &str) -> f32 {
    let words = text.split_whitespace().count() as f32;
    let punctuation = text
        .chars()
        .filter(|c| matches!(c, '.' | ',' | ';' | ':' | '!' | '?'))
        .count() as f32;

    let raw = 1.3 * words + 0.5 * punctuation;
    raw / (raw + 8.0)
}

fn detect_mode(trimmed: &str) -> (Mode, bool) {
    if BUILD_RE.is_match(trimmed) {
        (Mode::Build, true)
    } else if ANALYZE_RE.is_match(trimmed) {
        (Mode::Analyze, true)
    } else if MAINTAIN_RE.is_match(trimmed) {
        (Mode::Maintain, true)
    } else if EXECUTE_RE.is_match(trimmed) {
        (Mode::Execute, true)
    } else {
        (Mode::Assist, false)
    }
}

fn detect_genre(trimmed: &str, mode_matched: bool) -> Genre {
    if EXPRESS_RE.is_match(trimmed) && trimmed.split_whitespace().count() <= 4 {
        Genre::Express
    } else if DECIDE_RE.is_match(trimmed) {
        Genre::Decide
    } else if COMMIT_RE.is_match(trimmed) {
        Genre::Commit
    } else if mode_matched && !trimmed.contains('?') {
        // A mode keyword without a question mark reads as an instruction.
        Genre::Direct
    } else {
        Genre::Inform
    }
}

fn detect_kind(trimmed: &str, genre: Genre, format: Format) -> String {
    if format == Format::Command {
        "command".into()
    } else if trimmed.contains('?') || QUESTION_RE.is_match(trimmed) {
        "question".into()
    } else {
        match genre {
            Genre::Express => "acknowledgment".into(),
            Genre::Direct => "request".into(),
            Genre::Commit => "commitment".into(),
            Genre::Decide => "decision".into(),
            Genre::Inform => "statement".into(),
        }
    }
}

fn detect_format(original: &str, trimmed: &str) -> Format {
    if trimmed.starts_with('/') || trimmed.starts_with('!') {
        Format::Command
    } else if TRANSCRIPT_LINE_RE.find_iter(original).count() >= 3 {
        Format::Transcript
    } else if original.len() > 1200 || original.split("\n\n").count() >= 4 {
        Format::Document
    } else {
        Format::Message
    }
}

// ---------------------------------------------------------------------------
// LLM-assisted refinement
// ---------------------------------------------------------------------------

/// Refine a low-confidence signal with a utility-tier model call.
///
/// Only mode and genre are open to revision; weight stays deterministic.
/// Any failure (provider error, unparseable reply) leaves the deterministic
/// signal untouched.
pub async fn refine_with_llm(router: &ProviderRouter, text: &str, signal: Signal) -> Signal {
    let prompt = format!(
        "Classify this message. Reply with only a JSON object of the shape \
         {{\"mode\": \"execute|assist|analyze|build|maintain\", \
         \"genre\": \"direct|inform|commit|decide|express\"}}.\n\nMessage: {text}"
    );

    let messages = [Message::user(prompt)];
    let opts = ChatOptions::for_tier(Tier::Utility);

    let reply = match router.chat(&messages, &opts).await {
        Ok(completion) => match completion.content {
            CompletionContent::Text(text) => text,
            CompletionContent::ToolCalls(_) => return signal,
        },
        Err(e) => {
            debug!(error = %e, "classifier LLM assist failed, keeping deterministic signal");
            return signal;
        }
    };

    let Ok(v) = serde_json::from_str::<Value>(extract_json(&reply)) else {
        return signal;
    };

    let mode = match v["mode"].as_str() {
        Some("execute") => Mode::Execute,
        Some("assist") => Mode::Assist,
        Some("analyze") => Mode::Analyze,
        Some("build") => Mode::Build,
        Some("maintain") => Mode::Maintain,
        _ => signal.mode,
    };
    let genre = match v["genre"].as_str() {
        Some("direct") => Genre::Direct,
        Some("inform") => Genre::Inform,
        Some("commit") => Genre::Commit,
        Some("decide") => Genre::Decide,
        Some("express") => Genre::Express,
        _ => signal.genre,
    };

    Signal {
        mode,
        genre,
        confidence: Confidence::High,
        ..signal
    }
}

/// Strip markdown fences and leading prose so lenient parsing finds the
/// JSON object.
fn extract_json(reply: &str) -> &str {
    let start = reply.find('{').unwrap_or(0);
    let end = reply.rfind('}').map(|i| i + 1).unwrap_or(reply.len());
    reply.get(start..end).unwrap_or(reply)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
