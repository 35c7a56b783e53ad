//! Model-assisted choice among ambiguous unsubscribe link candidates.

use crate::action::extract_json_object;
use crate::config::LlmConfig;
use crate::llm::{ContentBlock, LanguageModel, LlmRequest};
use serde::Deserialize;
use tracing::{debug, info, warn};
use unsub_email::Candidates;

/// Plain-text characters included in the prompt.
const TEXT_EXCERPT_CHARS: usize = 1500;

/// The model's answer.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LinkVerdict {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub confidence: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

pub fn link_prompt(subject: &str, candidates: &Candidates, text: &str) -> String {
    let (anchors, urls) = candidates.for_model();
    let anchor_lines: Vec<String> = anchors
        .iter()
        .map(|a| format!("- \"{}\" -> {}", a.text, a.href))
        .collect();
    let excerpt: String = text.chars().take(TEXT_EXCERPT_CHARS).collect();

    format!(
        r#"You are analyzing an email to find the unsubscribe link. Your job is to identify the URL that would allow a user to unsubscribe from this mailing list.

Email Subject: {subject}

Here are all the links found in the email with their link text (if available):
{anchors}

Additional URLs found:
{urls}

Plain text content (truncated):
{excerpt}

INSTRUCTIONS:
1. Find the URL that is most likely the unsubscribe link
2. Look for links with text like "unsubscribe", "opt out", "manage preferences", "email preferences", "stop receiving", etc.
3. The URL might not contain the word "unsubscribe" - focus on the link text and context
4. If there are multiple potential unsubscribe links, choose the most direct one (prefer "unsubscribe" over "manage preferences")
5. Do NOT return tracking pixels, images, or the main website URL

Respond with ONLY a JSON object in this exact format:
{{
  "url": "the unsubscribe URL or null if not found",
  "confidence": "high" | "medium" | "low",
  "reason": "brief explanation of why this is the unsubscribe link"
}}

If no unsubscribe link is found, return:
{{
  "url": null,
  "confidence": "low",
  "reason": "No unsubscribe link found"
}}"#,
        subject = subject,
        anchors = anchor_lines.join("\n"),
        urls = urls.join("\n"),
        excerpt = excerpt,
    )
}

/// Accepted URL from a reply, if any. Only absolute http(s) URLs count.
pub fn parse_link_reply(reply: &str) -> Option<LinkVerdict> {
    let json = extract_json_object(reply)?;
    let mut verdict: LinkVerdict = serde_json::from_str(json).ok()?;
    verdict.url = verdict
        .url
        .map(|u| u.trim().to_string())
        .filter(|u| is_web_url(u));
    Some(verdict)
}

/// Ask the model to pick. `None` on any failure or a "not found" answer.
pub async fn choose_link(
    llm: &dyn LanguageModel,
    config: &LlmConfig,
    subject: &str,
    candidates: &Candidates,
    text: &str,
) -> Option<String> {
    let request = LlmRequest {
        model: config.link_model.clone(),
        max_tokens: config.link_max_tokens,
        content: vec![ContentBlock::text(link_prompt(subject, candidates, text))],
    };
    let reply = match llm.complete(request).await {
        Ok(r) => r,
        Err(e) => {
            warn!("link selection call failed: {}", e);
            return None;
        }
    };
    let verdict = parse_link_reply(&reply)?;
    match verdict.url {
        Some(url) => {
            info!(
                "model picked unsubscribe link: {} (confidence: {}, reason: {})",
                url,
                verdict.confidence.as_deref().unwrap_or("?"),
                verdict.reason.as_deref().unwrap_or("")
            );
            Some(url)
        }
        None => {
            debug!("model found no unsubscribe link");
            None
        }
    }
}

fn is_web_url(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}
