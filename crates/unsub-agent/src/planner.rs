//! Picks the next action from a page state. Stateless: everything the model
//! needs goes into the prompt on every call.

use crate::action::{parse_action, AgentAction};
use crate::config::AgentConfig;
use crate::digest::PageState;
use crate::llm::{ContentBlock, LanguageModel, LlmRequest};
use tracing::{debug, warn};

/// Which view of the page the model gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    /// Full textual digest.
    Text,
    /// Screenshot plus a digest excerpt for selector reference.
    Visual,
}

/// Task instructions and response format shared by both modes.
pub fn base_instructions(user_email: &str) -> String {
    format!(
        r#"You are an AI agent helping a user unsubscribe from email newsletters. Your goal is to complete the unsubscribe process.

The user's email address is: {email}

Look for:
1. Unsubscribe buttons or links
2. Confirmation checkboxes
3. "Unsubscribe from all" options
4. Email input fields (if asking for email confirmation)
5. Submit/Confirm buttons
6. Success messages indicating unsubscribe is complete

Respond with ONLY a JSON object in this exact format:
{{
  "type": "click" | "type" | "select" | "submit" | "done" | "error",
  "selector": "CSS selector for the element (for click/type/select actions)",
  "value": "text to type or option to select (for type/select actions)",
  "description": "Brief description of what this action does"
}}

Rules:
- Use "done" when you see a success message confirming unsubscription
- Use "error" if the page shows an error, is a dead link, or you can't proceed
- For selectors, prefer: button text > id > specific class > tag
- Use button:has-text("...") or text="..." selectors for buttons with specific text
- If you see an email input field, type the user's email address: {email}
- If there are multiple unsubscribe options, prefer "unsubscribe from all"
- Click confirmation checkboxes before submit buttons"#,
        email = user_email
    )
}

/// Full prompt text for one planning call.
pub fn build_prompt(
    state: &PageState,
    history: &[String],
    user_email: &str,
    mode: PlanMode,
    visual_excerpt_chars: usize,
) -> String {
    let head = format!(
        "{}\n\nCurrent URL: {}\n\nPrevious steps taken:\n{}\n\n",
        base_instructions(user_email),
        state.url,
        history.join("\n")
    );
    match mode {
        PlanMode::Text => format!(
            "{}Simplified page DOM (showing visible interactive elements with their attributes):\n{}\n\n\
             Analyze the DOM structure and decide the SINGLE next action to take. The DOM shows:\n\
             - Element tags with id (#), classes (.), and key attributes like [type], [name], [href], [role], [aria-label]\n\
             - Direct text content in quotes\n\
             - Hidden elements and scripts/styles have been removed",
            head, state.digest
        ),
        PlanMode::Visual => format!(
            "{}Simplified page DOM (for selector reference):\n{}\n\n\
             Analyze the screenshot and decide the SINGLE next action to take. \
             Use the DOM structure above to help construct accurate CSS selectors.",
            head,
            state.excerpt(visual_excerpt_chars)
        ),
    }
}

/// Ask the model for the next action. Never fails: transport and parse
/// problems come back as [`AgentAction::Error`].
pub async fn decide_next_action(
    llm: &dyn LanguageModel,
    config: &AgentConfig,
    state: &PageState,
    history: &[String],
    user_email: &str,
    mode: PlanMode,
) -> AgentAction {
    let window = &history[history.len().saturating_sub(config.history_window)..];
    let prompt = build_prompt(
        state,
        window,
        user_email,
        mode,
        config.digest.visual_excerpt_chars,
    );

    let request = match mode {
        PlanMode::Text => LlmRequest {
            model: config.llm.model.clone(),
            max_tokens: config.llm.max_tokens,
            content: vec![ContentBlock::text(prompt)],
        },
        PlanMode::Visual => {
            let Some(png) = state.screenshot.as_deref() else {
                return AgentAction::error("AI analysis failed: no screenshot available");
            };
            LlmRequest {
                model: config.llm.vision_model.clone(),
                max_tokens: config.llm.max_tokens,
                content: vec![ContentBlock::png(png), ContentBlock::text(prompt)],
            }
        }
    };

    debug!(?mode, model = %request.model, "planning next action");
    let reply = match llm.complete(request).await {
        Ok(r) => r,
        Err(e) => {
            warn!("planner call failed: {}", e);
            return AgentAction::error(format!("AI analysis failed: {}", e));
        }
    };

    match parse_action(&reply) {
        Ok(action) => {
            debug!("planned: {}", action);
            action
        }
        Err(e) => {
            warn!("unparseable planner reply: {}", e);
            AgentAction::error(format!("Failed to parse AI response: {}", e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted {
        reply: std::result::Result<String, String>,
        seen: Mutex<Vec<LlmRequest>>,
    }

    impl Scripted {
        fn ok(reply: &str) -> Self {
            Self {
                reply: Ok(reply.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for Scripted {
        async fn complete(&self, request: LlmRequest) -> Result<String> {
            self.seen.lock().unwrap().push(request);
            match &self.reply {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(Error::Llm(e.clone())),
            }
        }
    }

    fn state() -> PageState {
        PageState {
            url: "https://example.com/u".into(),
            digest: "<button#go> \"Unsubscribe\"\n".into(),
            screenshot: None,
        }
    }

    #[test]
    fn prompt_text_mode() {
        let history = vec!["Page loaded: https://example.com/u".to_string()];
        let p = build_prompt(&state(), &history, "me@example.com", PlanMode::Text, 5000);
        assert!(p.contains("The user's email address is: me@example.com"));
        assert!(p.contains("type the user's email address: me@example.com"));
        assert!(p.contains("Current URL: https://example.com/u"));
        assert!(p.contains("Previous steps taken:\nPage loaded: https://example.com/u"));
        assert!(p.contains("Simplified page DOM (showing visible interactive elements"));
        assert!(p.contains("<button#go> \"Unsubscribe\""));
        assert!(p.contains(r#""type": "click" | "type" | "select" | "submit" | "done" | "error""#));
    }

    #[test]
    fn prompt_visual_mode_uses_excerpt() {
        let mut s = state();
        s.digest = "x".repeat(100);
        let p = build_prompt(&s, &[], "me@example.com", PlanMode::Visual, 10);
        assert!(p.contains("Simplified page DOM (for selector reference):\nxxxxxxxxxx\n\n"));
        assert!(p.contains("Analyze the screenshot"));
    }

    #[tokio::test]
    async fn text_mode_uses_text_model_and_history_window() {
        let llm = Scripted::ok(r#"{"type":"done","description":"Unsubscribed"}"#);
        let config = AgentConfig::default();
        let history: Vec<String> = (0..15).map(|i| format!("step-{:02}", i)).collect();

        let a = decide_next_action(
            &llm,
            &config,
            &state(),
            &history,
            "me@example.com",
            PlanMode::Text,
        )
        .await;
        assert_eq!(
            a,
            AgentAction::Done {
                description: "Unsubscribed".into()
            }
        );

        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen[0].model, config.llm.model);
        assert_eq!(seen[0].max_tokens, 500);
        assert!(!seen[0].has_image());
        let ContentBlock::Text(prompt) = &seen[0].content[0] else {
            panic!("expected text block");
        };
        assert!(!prompt.contains("step-04"));
        assert!(prompt.contains("step-05"));
        assert!(prompt.contains("step-14"));
    }

    #[tokio::test]
    async fn visual_mode_sends_image_first() {
        let llm = Scripted::ok(r##"{"type":"click","selector":"#go","description":"Click"}"##);
        let config = AgentConfig::default();
        let mut s = state();
        s.screenshot = Some(vec![1, 2, 3]);

        let a =
            decide_next_action(&llm, &config, &s, &[], "me@example.com", PlanMode::Visual).await;
        assert_eq!(a.kind(), "click");

        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen[0].model, config.llm.vision_model);
        assert!(matches!(seen[0].content[0], ContentBlock::Image { .. }));
        assert!(matches!(seen[0].content[1], ContentBlock::Text(_)));
    }

    #[tokio::test]
    async fn visual_mode_without_screenshot_is_error() {
        let llm = Scripted::ok("{}");
        let a = decide_next_action(
            &llm,
            &AgentConfig::default(),
            &state(),
            &[],
            "me@example.com",
            PlanMode::Visual,
        )
        .await;
        assert!(matches!(a, AgentAction::Error { .. }));
        assert!(llm.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn llm_failure_becomes_error_action() {
        let llm = Scripted {
            reply: Err("overloaded".into()),
            seen: Mutex::new(Vec::new()),
        };
        let a = decide_next_action(
            &llm,
            &AgentConfig::default(),
            &state(),
            &[],
            "e@x.y",
            PlanMode::Text,
        )
        .await;
        assert!(
            a.description().starts_with("AI analysis failed:"),
            "{}",
            a.description()
        );
        assert!(a.description().contains("overloaded"));
    }

    #[tokio::test]
    async fn garbage_reply_becomes_parse_error() {
        let llm = Scripted::ok("Sorry, I can't help with that.");
        let a = decide_next_action(
            &llm,
            &AgentConfig::default(),
            &state(),
            &[],
            "e@x.y",
            PlanMode::Text,
        )
        .await;
        assert!(a.description().starts_with("Failed to parse AI response"));
    }

    #[tokio::test]
    async fn invalid_action_becomes_parse_error() {
        let llm = Scripted::ok(r#"{"type":"click","description":"no selector"}"#);
        let a = decide_next_action(
            &llm,
            &AgentConfig::default(),
            &state(),
            &[],
            "e@x.y",
            PlanMode::Text,
        )
        .await;
        assert!(matches!(a, AgentAction::Error { .. }));
        assert!(a.description().contains("requires a selector"));
    }
}
