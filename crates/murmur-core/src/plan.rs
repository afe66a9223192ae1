//! Plan proposals.
//!
//! When plan mode gates a build/execute task, the first model call asks for
//! a structured plan instead of acting. The reply is parsed leniently: a
//! well-formed JSON object yields structured steps, anything else is kept
//! as a raw-text plan so the user still sees something reviewable.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One step of a proposed plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    /// Short imperative title.
    pub title: String,
    /// What the step involves.
    #[serde(default)]
    pub detail: String,
}

/// A structured plan proposal returned instead of execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanProposal {
    /// What the plan achieves.
    pub goal: String,
    /// Ordered steps.
    pub steps: Vec<PlanStep>,
    /// Known risks or open questions.
    #[serde(default)]
    pub risks: Vec<String>,
    /// The model's verbatim reply, for display and for the follow-up
    /// execution call.
    #[serde(skip)]
    pub raw: String,
}

impl PlanProposal {
    /// Render the plan for a plain-text channel.
    pub fn render(&self) -> String {
        let mut out = format!("Plan: {}\n", self.goal);
        for (i, step) in self.steps.iter().enumerate() {
            out.push_str(&format!("{}. {}", i + 1, step.title));
            if !step.detail.is_empty() {
                out.push_str(&format!(" — {}", step.detail));
            }
            out.push('\n');
        }
        if !self.risks.is_empty() {
            out.push_str("Risks:\n");
            for risk in &self.risks {
                out.push_str(&format!("- {risk}\n"));
            }
        }
        out.trim_end().to_owned()
    }
}

/// Instruction appended to the prompt when a plan is requested.
pub const PLAN_INSTRUCTION: &str = "Do not execute anything yet. Reply with only a JSON object \
     describing your plan: {\"goal\": \"...\", \"steps\": [{\"title\": \"...\", \
     \"detail\": \"...\"}], \"risks\": [\"...\"]}";

/// Parse a model reply into a plan, falling back to raw text.
pub fn parse_plan(reply: &str) -> PlanProposal {
    let start = reply.find('{');
    let end = reply.rfind('}');

    if let (Some(start), Some(end)) = (start, end) {
        if let Ok(v) = serde_json::from_str::<Value>(&reply[start..=end]) {
            let steps = v["steps"]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .map(|s| PlanStep {
                            title: s["title"]
                                .as_str()
                                .unwrap_or_else(|| s.as_str().unwrap_or("step"))
                                .to_owned(),
                            detail: s["detail"].as_str().unwrap_or_default().to_owned(),
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            if !steps.is_empty() || v["goal"].is_string() {
                return PlanProposal {
                    goal: v["goal"].as_str().unwrap_or("(unstated)").to_owned(),
                    steps,
                    risks: v["risks"]
                        .as_array()
                        .map(|items| {
                            items
                                .iter()
                                .filter_map(|r| r.as_str().map(String::from))
                                .collect()
                        })
                        .unwrap_or_default(),
                    raw: reply.to_owned(),
                };
            }
        }
    }

    // Unparseable: keep the whole reply as a one-step raw plan.
    PlanProposal {
        goal: "(unstructured plan)".to_owned(),
        steps: vec![PlanStep {
            title: reply.trim().to_owned(),
            detail: String::new(),
        }],
        risks: Vec::new(),
        raw: reply.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_plan_parses() {
        let reply = r#"Here is my plan:
{"goal": "add rate limiting", "steps": [{"title": "pick a crate", "detail": "governor"}, {"title": "wire middleware"}], "risks": ["config drift"]}"#;

        let plan = parse_plan(reply);
        assert_eq!(plan.goal, "add rate limiting");
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].detail, "governor");
        assert_eq!(plan.risks, vec!["config drift"]);
    }

    #[test]
    fn garbage_becomes_raw_plan() {
        let plan = parse_plan("I would first look at the code and then decide.");
        assert_eq!(plan.goal, "(unstructured plan)");
        assert_eq!(plan.steps.len(), 1);
        assert!(plan.steps[0].title.contains("look at the code"));
    }

    #[test]
    fn render_is_reviewable() {
        let plan = parse_plan(
            r#"{"goal": "ship it", "steps": [{"title": "build"}, {"title": "test"}], "risks": ["friday deploy"]}"#,
        );
        let rendered = plan.render();
        assert!(rendered.contains("Plan: ship it"));
        assert!(rendered.contains("1. build"));
        assert!(rendered.contains("2. test"));
        assert!(rendered.contains("- friday deploy"));
    }
}
