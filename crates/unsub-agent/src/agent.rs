//! The per-link controller and the fan-out over many links.

use crate::action::AgentAction;
use crate::browser::{BrowserLauncher, BrowserSession};
use crate::config::AgentConfig;
use crate::llm::LanguageModel;
use crate::planner::{decide_next_action, PlanMode};
use crate::trace::StepTrace;
use crate::{digest, executor, links, with_timeout, Result};
use futures::{stream, FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};
use unsub_email::LinkScan;

/// Message of a run that used up its iterations.
pub const EXHAUSTED_MESSAGE: &str = "Max iterations reached without completing unsubscribe process";

/// Outcome of one link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeResult {
    pub url: String,
    pub success: bool,
    pub message: String,
    pub steps: Vec<String>,
}

enum Outcome {
    Done(String),
    Failed(String),
    Exhausted,
}

/// Finds unsubscribe links and drives browsers through them.
pub struct UnsubscribeAgent {
    launcher: Arc<dyn BrowserLauncher>,
    llm: Arc<dyn LanguageModel>,
    config: AgentConfig,
}

impl UnsubscribeAgent {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        llm: Arc<dyn LanguageModel>,
        config: AgentConfig,
    ) -> Self {
        Self {
            launcher,
            llm,
            config,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Sessions currently open through this agent's launcher.
    pub fn active_sessions(&self) -> usize {
        self.launcher.active_sessions()
    }

    /// Unsubscribe link for an email body. The model is only consulted when
    /// the body offers several candidates; if it can't decide, the first
    /// keyword candidate wins.
    pub async fn find_link(&self, html: &str, text: &str, subject: &str) -> Option<String> {
        match unsub_email::scan(html, text) {
            LinkScan::Unambiguous(url) => Some(url),
            LinkScan::Empty => None,
            LinkScan::Ambiguous(candidates) => {
                let picked = links::choose_link(
                    self.llm.as_ref(),
                    &self.config.llm,
                    subject,
                    &candidates,
                    text,
                )
                .await;
                picked.or_else(|| candidates.best_guess())
            }
        }
    }

    /// Run every link concurrently on the current task. Results line up with
    /// `links`; one link failing never affects the others.
    pub async fn process_links(
        &self,
        links: &[String],
        user_email: &str,
    ) -> Vec<UnsubscribeResult> {
        let limit = self
            .config
            .max_concurrent_links
            .unwrap_or(links.len())
            .max(1);
        let started = Instant::now();

        let results: Vec<UnsubscribeResult> = stream::iter(
            links
                .iter()
                .enumerate()
                .map(|(index, url)| {
                    let span = info_span!("link", index, url = %url);
                    async move {
                        let t = Instant::now();
                        let result = AssertUnwindSafe(self.run(url, user_email))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|_| UnsubscribeResult {
                                url: url.clone(),
                                success: false,
                                message: "agent panicked".into(),
                                steps: vec![
                                    format!("Starting unsubscribe process for: {}", url),
                                    "Error: agent panicked".into(),
                                ],
                            });
                        info!(
                            success = result.success,
                            elapsed_ms = t.elapsed().as_millis() as u64,
                            "{}",
                            result.message
                        );
                        result
                    }
                    .instrument(span)
                })
                .collect::<Vec<_>>(),
        )
        .buffered(limit)
        .collect()
        .await;

        let succeeded = results.iter().filter(|r| r.success).count();
        info!(
            "processed {} links in {:?}: {} succeeded, {} failed",
            results.len(),
            started.elapsed(),
            succeeded,
            results.len() - succeeded
        );
        results
    }

    /// Drive one fresh browser session through the unsubscribe flow at `url`.
    /// Never fails: every problem ends up in the result.
    pub async fn run(&self, url: &str, user_email: &str) -> UnsubscribeResult {
        let mut steps = StepTrace::new();
        steps.push(format!("Starting unsubscribe process for: {}", url));
        info!("starting unsubscribe for {}", url);

        let launched = with_timeout(
            self.config.navigation_timeout_ms,
            "browser launch",
            self.launcher.launch(&self.config.browser),
        )
        .await;
        let outcome = match launched {
            Ok(mut session) => {
                let outcome = self
                    .drive(session.as_mut(), url, user_email, &mut steps)
                    .await;
                if let Err(e) = session.close().await {
                    warn!("failed to close browser for {}: {}", url, e);
                }
                outcome
            }
            Err(e) => Err(e),
        };

        let (success, message) = match outcome {
            Ok(Outcome::Done(description)) => {
                steps.push("Unsubscribe process completed successfully!");
                (true, description)
            }
            Ok(Outcome::Failed(description)) => {
                steps.push(format!("Error: {}", description));
                (false, description)
            }
            Ok(Outcome::Exhausted) => {
                steps.push("Max iterations reached without completing unsubscribe");
                (false, EXHAUSTED_MESSAGE.to_string())
            }
            Err(e) => {
                let message = e.to_string();
                steps.push(format!("Error: {}", message));
                (false, message)
            }
        };
        info!(success, "finished {}: {}", url, message);

        UnsubscribeResult {
            url: url.to_string(),
            success,
            message,
            steps: steps.into_steps(),
        }
    }

    async fn drive(
        &self,
        session: &mut dyn BrowserSession,
        url: &str,
        user_email: &str,
        steps: &mut StepTrace,
    ) -> Result<Outcome> {
        let cfg = &self.config;

        steps.push("Navigating to unsubscribe page...");
        with_timeout(cfg.navigation_timeout_ms, "navigation", session.goto(url)).await?;
        session.wait(cfg.settle_after_navigation_ms).await;
        let loaded = session.current_url().await?;
        steps.push(format!("Page loaded: {}", loaded));

        for iteration in 1..=cfg.max_iterations {
            steps.push(format!("--- Iteration {} ---", iteration));

            let mut state = with_timeout(
                cfg.navigation_timeout_ms,
                "page digest",
                digest::digest(&*session, &cfg.digest),
            )
            .await?;

            let mut action = decide_next_action(
                self.llm.as_ref(),
                cfg,
                &state,
                steps.as_slice(),
                user_email,
                PlanMode::Text,
            )
            .await;

            if matches!(action, AgentAction::Error { .. }) {
                steps.push("HTML analysis inconclusive, using screenshot analysis...");
                match with_timeout(
                    cfg.screenshot_timeout_ms,
                    "screenshot",
                    session.screenshot(),
                )
                .await
                {
                    Ok(png) => state.screenshot = Some(png),
                    Err(e) => {
                        steps.push(format!("Screenshot failed: {}", e));
                        continue;
                    }
                }
                action = decide_next_action(
                    self.llm.as_ref(),
                    cfg,
                    &state,
                    steps.as_slice(),
                    user_email,
                    PlanMode::Visual,
                )
                .await;
            }

            steps.push(format!("AI decided: {}", action.description()));
            match action {
                AgentAction::Done { description } => return Ok(Outcome::Done(description)),
                AgentAction::Error { description } => return Ok(Outcome::Failed(description)),
                action => {
                    if let Err(e) =
                        executor::execute(&*session, &action, steps, cfg.action_timeout_ms).await
                    {
                        steps.push(format!("Failed to execute action: {}", e));
                    }
                    session.wait(cfg.settle_after_action_ms).await;
                }
            }
        }
        Ok(Outcome::Exhausted)
    }
}
