//! Message builders for each inference operation
//!
//! Every operation gets a system and a user message rendered from the templates in
//! `src/prompts`. Builders are pure: same input, same messages.
use anyhow::Result;
use serde::Serialize;
use serde_json::json;

use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::prompt_template::load_prompt;

/// Tool the model calls to perform a step on an element
pub const ACT_TOOL: &str = "doAction";
/// Tool the model calls when nothing in the chunk helps reach the goal
pub const SKIP_TOOL: &str = "skipSection";

const NO_STEPS: &str = "No steps taken yet.";

fn system_message(template: &str) -> Result<Message> {
    Ok(Message::system().with_text(load_prompt(template, &json!({}))?))
}

fn user_message<T: Serialize>(template: &str, context: &T) -> Result<Message> {
    Ok(Message::user().with_text(load_prompt(template, context)?))
}

/// The fixed action vocabulary offered to the model
pub fn act_tools() -> Vec<Tool> {
    vec![
        Tool::new(
            ACT_TOOL,
            "execute the next playwright step that directly accomplishes the goal",
            json!({
                "type": "object",
                "required": ["method", "element", "args", "step", "completed"],
                "properties": {
                    "method": {
                        "type": "string",
                        "description": "The playwright function to call."
                    },
                    "element": {
                        "type": "integer",
                        "description": "The element number to act on"
                    },
                    "args": {
                        "type": "array",
                        "description": "The required arguments",
                        "items": {
                            "type": "string",
                            "description": "The argument to pass to the function"
                        }
                    },
                    "step": {
                        "type": "string",
                        "description": "human readable description of the step that is taken in the past tense. Please be very detailed."
                    },
                    "why": {
                        "type": "string",
                        "description": "why is this step taken? how does it advance the goal?"
                    },
                    "completed": {
                        "type": "boolean",
                        "description": "true if the goal should be accomplished after this step"
                    }
                }
            }),
        ),
        Tool::new(
            SKIP_TOOL,
            "skips this area of the webpage because the current goal cannot be accomplished here",
            json!({
                "type": "object",
                "required": ["reason"],
                "properties": {
                    "reason": {
                        "type": "string",
                        "description": "reason that no action is taken"
                    }
                }
            }),
        ),
    ]
}

pub fn act_system_prompt() -> Result<Message> {
    system_message(include_str!("prompts/act_system.md"))
}

pub fn act_user_prompt(action: &str, steps: Option<&str>, dom_elements: &str) -> Result<Message> {
    user_message(
        include_str!("prompts/act_user.md"),
        &json!({
            "action": action,
            "steps": steps.unwrap_or(NO_STEPS),
            "dom_elements": dom_elements,
        }),
    )
}

pub fn verify_system_prompt() -> Result<Message> {
    system_message(include_str!("prompts/verify_system.md"))
}

pub fn verify_user_prompt(goal: &str, steps: &str, dom_elements: Option<&str>) -> Result<Message> {
    user_message(
        include_str!("prompts/verify_user.md"),
        &json!({
            "goal": goal,
            "steps": steps,
            "dom_elements": dom_elements,
        }),
    )
}

pub fn extract_system_prompt() -> Result<Message> {
    system_message(include_str!("prompts/extract_system.md"))
}

pub fn extract_user_prompt(instruction: &str, dom_elements: &str) -> Result<Message> {
    user_message(
        include_str!("prompts/extract_user.md"),
        &json!({
            "instruction": instruction,
            "dom_elements": dom_elements,
        }),
    )
}

pub fn refine_system_prompt() -> Result<Message> {
    system_message(include_str!("prompts/refine_system.md"))
}

/// Both contents are rendered as json so the model sees the caller's field names
pub fn refine_user_prompt<T: Serialize>(
    instruction: &str,
    previously_extracted: &T,
    newly_extracted: &T,
) -> Result<Message> {
    user_message(
        include_str!("prompts/refine_user.md"),
        &json!({
            "instruction": instruction,
            "previously_extracted": serde_json::to_string(previously_extracted)?,
            "newly_extracted": serde_json::to_string(newly_extracted)?,
        }),
    )
}

pub fn metadata_system_prompt() -> Result<Message> {
    system_message(include_str!("prompts/metadata_system.md"))
}

pub fn metadata_user_prompt<T: Serialize>(
    instruction: &str,
    extracted: &T,
    chunks_seen: usize,
    chunks_total: usize,
) -> Result<Message> {
    user_message(
        include_str!("prompts/metadata_user.md"),
        &json!({
            "instruction": instruction,
            "extracted": serde_json::to_string(extracted)?,
            "chunks_seen": chunks_seen,
            "chunks_total": chunks_total,
        }),
    )
}

pub fn observe_system_prompt() -> Result<Message> {
    system_message(include_str!("prompts/observe_system.md"))
}

pub fn observe_user_prompt(instruction: &str, dom_elements: &str) -> Result<Message> {
    user_message(
        include_str!("prompts/observe_user.md"),
        &json!({
            "instruction": instruction,
            "dom_elements": dom_elements,
        }),
    )
}

pub fn ask_system_prompt() -> Result<Message> {
    system_message(include_str!("prompts/ask_system.md"))
}

pub fn ask_user_prompt(question: &str) -> Result<Message> {
    user_message(include_str!("prompts/ask_user.md"), &json!({ "question": question }))
}
