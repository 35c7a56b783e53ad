//! # unsub-agent
//!
//! Drives a real browser through an unsubscribe flow. Each link gets its own
//! browser session; a language model looks at a compact digest of the page
//! (or a screenshot when the digest is not enough) and picks one action at a
//! time until the page confirms the unsubscribe, gives up, or the iteration
//! budget runs out.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use unsub_agent::{AgentConfig, AnthropicClient, EokaLauncher, UnsubscribeAgent};
//!
//! # #[tokio::main]
//! # async fn main() -> unsub_agent::Result<()> {
//! let config = AgentConfig::default();
//! let llm = AnthropicClient::from_config(&config.llm)?;
//! let agent = UnsubscribeAgent::new(Arc::new(EokaLauncher::new()), Arc::new(llm), config);
//!
//! let results = agent
//!     .process_links(&["https://example.com/unsubscribe?id=1".into()], "me@example.com")
//!     .await;
//! for r in &results {
//!     println!("{} -> {} ({})", r.url, r.success, r.message);
//! }
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod agent;
pub mod browser;
pub mod config;
pub mod digest;
pub mod executor;
pub mod links;
pub mod llm;
pub mod planner;
pub mod trace;

pub use action::{parse_action, AgentAction};
pub use agent::{UnsubscribeAgent, UnsubscribeResult};
pub use browser::{BrowserLauncher, BrowserSession, EokaLauncher, SessionTicket};
pub use config::{AgentConfig, BrowserConfig, DigestLimits, LlmConfig, Viewport};
pub use digest::PageState;
pub use llm::{AnthropicClient, ContentBlock, LanguageModel, LlmRequest};
pub use planner::PlanMode;
pub use trace::StepTrace;

/// Result type for unsub-agent operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while driving a session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("browser error: {0}")]
    Browser(#[from] eoka::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("llm error: {0}")]
    Llm(String),

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("action failed: {0}")]
    ActionFailed(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Run `fut` under a millisecond budget, mapping expiry to [`Error::Timeout`].
pub(crate) async fn with_timeout<T, F>(ms: u64, what: &str, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(std::time::Duration::from_millis(ms), fut).await {
        Ok(r) => r,
        Err(_) => Err(Error::Timeout(format!("{} exceeded {}ms", what, ms))),
    }
}
