//! Fixed instruction prompts and model-bound message preparation.

use super::traits::{Message, Role};

/// Instructions for the routing step. The reply is constrained to the
/// `CoordinationRequest` JSON schema.
pub const COORDINATION_REQUEST_SYSTEM_PROMPT: &str = r#"You are the coordinator of a multi-agent assistant. Read the conversation and decide which specialized agent must handle the latest user request.

## Agents

1. GPA - General Purpose Agent
   - Can: search the web, search attached documents (PDF, TXT, CSV), run Python code, draw charts, generate images.
   - Handles: general questions, research, calculations, data analysis, file processing, image generation.
   - Examples: "What's the weather in Kyiv?", "Plot this CSV as a bar chart", "Draw a cat".

2. UMS - User Management System Agent
   - Can: search, create, update and delete users of the system.
   - Handles: every request about managing users.
   - Examples: "Do we have a user named Anna?", "Add user Bob", "Update Kate's email", "Delete user John".

## Routing rules

1. Look at the intent and the keywords of the latest user message, using earlier turns only to resolve references.
2. User management keywords: user, users, add user, create user, delete user, remove user, update user, find user, search user, user exists.
3. If the request is about managing users, choose UMS.
4. Anything else (questions, search, calculations, data analysis, charts, images, files) goes to GPA.
5. If the intent is ambiguous or unclear, choose GPA: it has the broadest capabilities.

## Output

Reply with a single JSON object and nothing else:
- "agent_name": exactly "GPA" or "UMS".
- "additional_instructions": short guidance for the chosen agent (what to focus on, constraints taken from the conversation). Use an empty string when there is nothing to add.
"#;

/// Instructions for the final answer. The agent result arrives inside the
/// last user message as a `CONTEXT` section.
pub const FINAL_RESPONSE_SYSTEM_PROMPT: &str = r#"You write the final answer of a multi-agent assistant to the user.

## Situation

A specialized agent has already worked on the user's request. Its result is given to you in the last message under "CONTEXT"; the user's original words follow under "USER_REQUEST".

## Your answer must

1. Directly address what the user asked.
2. Use the information and results from the CONTEXT, keeping every important detail, number and data point.
3. Read naturally, be concise yet complete, and keep a helpful, professional tone.
4. Confirm completed actions (for example, that a user was created) when the CONTEXT reports them.
5. Refer to generated charts, images or files when the CONTEXT mentions them.

## Never

- Mention agents, routing, coordinators, or any other internal part of the system.
- Say things like "the agent reported" or "I forwarded your request".

Answer as if you handled the request yourself.
"#;

/// Build the model-bound message list: the system prompt followed by the
/// conversation. User turns are sent as plain text; their payloads never
/// reach the model. Other turns are forwarded unchanged.
pub fn build_messages(system_prompt: &str, conversation: &[Message]) -> Vec<Message> {
    std::iter::once(Message::system(system_prompt))
        .chain(conversation.iter().map(|message| {
            if message.role == Role::User && message.custom_content.is_some() {
                message.text_only()
            } else {
                message.clone()
            }
        }))
        .collect()
}

/// Wrap the agent's answer and the user's request into one prompt.
///
/// Neither part is escaped: delimiter-like text inside the agent answer is
/// passed through as-is.
pub fn augment_user_request(agent_answer: &str, user_request: &str) -> String {
    format!("## CONTEXT:\n {agent_answer}\n ---\n ## USER_REQUEST: \n {user_request}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::traits::{Attachment, CustomContent};

    fn payload() -> CustomContent {
        CustomContent {
            attachments: vec![Attachment {
                kind: Some("text/csv".into()),
                url: Some("files/data.csv".into()),
                ..Attachment::default()
            }],
            ..CustomContent::default()
        }
    }

    #[test]
    fn routing_prompt_encodes_policy() {
        for needle in ["GPA", "UMS", "add user", "delete user", "ambiguous", "agent_name", "additional_instructions"] {
            assert!(
                COORDINATION_REQUEST_SYSTEM_PROMPT.contains(needle),
                "routing prompt should mention {needle}"
            );
        }
    }

    #[test]
    fn final_prompt_forbids_exposing_routing() {
        assert!(FINAL_RESPONSE_SYSTEM_PROMPT.contains("Never"));
        assert!(FINAL_RESPONSE_SYSTEM_PROMPT.contains("routing"));
    }

    #[test]
    fn build_messages_prepends_system_prompt() {
        let conversation = vec![Message::user("hi")];
        let messages = build_messages("SYS", &conversation);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], Message::system("SYS"));
        assert_eq!(messages[1], Message::user("hi"));
    }

    #[test]
    fn build_messages_strips_user_payloads_only() {
        let conversation = vec![
            Message::user("analyze").with_custom_content(payload()),
            Message::assistant("done").with_custom_content(payload()),
            Message::user("thanks"),
        ];
        let messages = build_messages("SYS", &conversation);
        assert!(messages[1].custom_content.is_none());
        assert_eq!(messages[1].content, "analyze");
        assert_eq!(messages[2].custom_content, Some(payload()));
        assert_eq!(messages[3], Message::user("thanks"));
        // Input is untouched.
        assert!(conversation[0].custom_content.is_some());
    }

    #[test]
    fn augmented_request_orders_context_before_request() {
        let augmented = augment_user_request("User Bob created", "Add user Bob");
        let context_at = augmented.find("## CONTEXT:").unwrap();
        let request_at = augmented.find("## USER_REQUEST:").unwrap();
        assert!(context_at < request_at);
        assert!(augmented.contains("User Bob created"));
        assert!(augmented.ends_with("Add user Bob"));
    }
}
