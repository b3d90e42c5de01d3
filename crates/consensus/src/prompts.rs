//! System prompt assembly for consensus runs.
//!
//! The system prompt is built once per run from the agent's profile, the
//! rendered action catalog, the strict reply-format contract, and the
//! optional skill and secret-discovery sections. Refinement prompts are the
//! aggregator's job; this module only covers round 1 framing.

use std::fmt::Write as _;

use serde_json::Value;

use crate::schema::{self, ActionType, ParamType};

/// Prompt version. Bump on any content change so responses can be traced
/// back to the prompt that produced them.
pub const PROMPT_VERSION: &str = "1.0.0";

/// Static profile of the agent running the consensus.
#[derive(Debug, Clone, Default)]
pub struct AgentProfile {
    /// Who the agent is, in second person.
    pub identity: String,
    /// Skill documents available to the agent, if any.
    pub skills: Vec<SkillDoc>,
    /// How to discover credentials at runtime, if the deployment has any.
    pub secret_discovery: Option<String>,
}

/// One skill document surfaced in the system prompt.
#[derive(Debug, Clone)]
pub struct SkillDoc {
    pub name: String,
    pub summary: String,
}

/// Render the action catalog: names, priorities, and parameters.
pub fn render_action_catalog() -> String {
    let mut out = String::new();
    let mut types: Vec<ActionType> = ActionType::SCALAR.to_vec();
    types.push(ActionType::BatchSync);
    types.push(ActionType::BatchAsync);

    for ty in types {
        let spec = schema::spec(ty);
        let _ = writeln!(out, "### {ty}");
        if !ty.is_batch() {
            let _ = writeln!(out, "Priority {}.", spec.priority);
        }
        for param in spec.params {
            let requirement = if param.required { "required" } else { "optional" };
            match param.ty {
                ParamType::Enum(allowed) => {
                    let _ = writeln!(
                        out,
                        "- `{}` ({requirement}, one of: {})",
                        param.name,
                        allowed.join(", ")
                    );
                }
                ref ty => {
                    let _ = writeln!(out, "- `{}` ({requirement}, {})", param.name, ty.name());
                }
            }
        }
        out.push('\n');
    }
    out
}

/// Build the system prompt for one consensus run.
pub fn build_system_prompt(profile: &AgentProfile, lesson: Option<&Value>) -> String {
    let mut prompt = String::new();

    if profile.identity.is_empty() {
        prompt.push_str(
            "You are one model in a pool deliberating on the next action for an \
             autonomous agent.\n\n",
        );
    } else {
        prompt.push_str(&profile.identity);
        prompt.push_str("\n\n");
    }

    prompt.push_str(
        "At each step you propose exactly one action from the catalog below. \
         Prefer the most conservative action that makes progress: observe \
         before you act, act before you delegate.\n\n",
    );

    prompt.push_str("## Actions\n");
    prompt.push_str(&render_action_catalog());

    if !profile.skills.is_empty() {
        prompt.push_str("## Skills\n");
        for skill in &profile.skills {
            let _ = writeln!(prompt, "- **{}**: {}", skill.name, skill.summary);
        }
        prompt.push('\n');
    }

    if let Some(secrets) = &profile.secret_discovery {
        prompt.push_str("## Credentials\n");
        prompt.push_str(secrets);
        prompt.push_str("\n\n");
    }

    if let Some(lesson) = lesson {
        prompt.push_str("## Carried context\n");
        let rendered =
            serde_json::to_string_pretty(lesson).unwrap_or_else(|_| lesson.to_string());
        prompt.push_str(&rendered);
        prompt.push_str("\n\n");
    }

    prompt.push_str(
        "## Reply format\n\
         Reply with a single JSON object and nothing else:\n\
         {\"action\": \"<name>\", \"params\": {...}, \"reasoning\": \"<why>\", \
         \"wait\": false}\n\
         `wait` may be false, true, or a number of seconds. Use \
         `batch_sync`/`batch_async` with a params.actions list to propose \
         several steps at once.",
    );
    prompt
}
