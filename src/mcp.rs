use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router, ServerHandler,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use unsub_agent::{AgentConfig, AnthropicClient, EokaLauncher, UnsubscribeAgent};
use unsub_email::LinkScan;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct FindLinkRequest {
    #[schemars(description = "HTML body of the email")]
    #[serde(default)]
    pub html: Option<String>,
    #[schemars(description = "Plain-text body of the email")]
    #[serde(default)]
    pub text: Option<String>,
    #[schemars(description = "Email subject, used as context when several links qualify")]
    #[serde(default)]
    pub subject: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ExtractLinkRequest {
    #[schemars(description = "HTML body of the email")]
    #[serde(default)]
    pub html: Option<String>,
    #[schemars(description = "Plain-text body of the email")]
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct UnsubscribeRequest {
    #[schemars(description = "Unsubscribe URLs to visit, processed concurrently")]
    pub links: Vec<String>,
    #[schemars(description = "Email address to enter if a page asks for one")]
    pub user_email: String,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

fn err(e: impl std::fmt::Display) -> ErrorData {
    ErrorData::internal_error(e.to_string(), None::<Value>)
}

fn invalid(msg: impl Into<String>) -> ErrorData {
    ErrorData::invalid_params(msg.into(), None::<Value>)
}

fn json_ok(value: &impl serde::Serialize) -> Result<CallToolResult, ErrorData> {
    let s = serde_json::to_string_pretty(value).map_err(err)?;
    Ok(CallToolResult::success(vec![Content::text(s)]))
}

/// Chrome-backed agent using the Anthropic API, tuned from the environment.
fn build_agent() -> unsub_agent::Result<UnsubscribeAgent> {
    let config = AgentConfig::from_env()?;
    let llm = AnthropicClient::from_config(&config.llm)?;
    info!(
        "agent ready (model: {}, max iterations: {})",
        config.llm.model, config.max_iterations
    );
    Ok(UnsubscribeAgent::new(
        Arc::new(EokaLauncher::new()),
        Arc::new(llm),
        config,
    ))
}

#[derive(Clone)]
pub struct UnsubServer {
    agent: Arc<Mutex<Option<Arc<UnsubscribeAgent>>>>,
    tool_router: ToolRouter<Self>,
}

impl Default for UnsubServer {
    fn default() -> Self {
        Self::new()
    }
}

impl UnsubServer {
    /// Server around an already-built agent.
    pub fn with_agent(agent: UnsubscribeAgent) -> Self {
        let server = Self::new();
        Self {
            agent: Arc::new(Mutex::new(Some(Arc::new(agent)))),
            ..server
        }
    }

    /// The agent, built on first use. The lock is released before the
    /// caller starts working, so tool calls run concurrently.
    async fn ensure_agent(&self) -> Result<Arc<UnsubscribeAgent>, ErrorData> {
        let mut guard = self.agent.lock().await;
        if let Some(agent) = guard.as_ref() {
            return Ok(agent.clone());
        }
        let agent = Arc::new(build_agent().map_err(err)?);
        *guard = Some(agent.clone());
        Ok(agent)
    }
}

#[tool_router]
impl UnsubServer {
    pub fn new() -> Self {
        Self {
            agent: Arc::new(Mutex::new(None)),
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Find the unsubscribe link in an email body. Uses keyword heuristics first and asks a language model only when several links qualify. Returns {\"url\": string|null}."
    )]
    async fn find_unsubscribe_link(
        &self,
        req: Parameters<FindLinkRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let html = req.0.html.unwrap_or_default();
        let text = req.0.text.unwrap_or_default();
        let subject = req.0.subject.unwrap_or_default();

        let url = match unsub_email::scan(&html, &text) {
            LinkScan::Unambiguous(url) => Some(url),
            LinkScan::Empty => None,
            LinkScan::Ambiguous(candidates) => match self.ensure_agent().await {
                Ok(agent) => agent.find_link(&html, &text, &subject).await,
                Err(e) => {
                    warn!("no model available, using first candidate: {}", e.message);
                    candidates.best_guess()
                }
            },
        };
        json_ok(&json!({ "url": url }))
    }

    #[tool(
        description = "Best unsubscribe link in an email body using keyword heuristics only (no language model). Returns {\"url\": string|null}."
    )]
    async fn extract_candidate_link(
        &self,
        req: Parameters<ExtractLinkRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let html = req.0.html.unwrap_or_default();
        let text = req.0.text.unwrap_or_default();
        let url = unsub_email::extract_candidate_link(&html, &text);
        json_ok(&json!({ "url": url }))
    }

    #[tool(
        description = "Open each unsubscribe link in its own browser and let the agent click through the flow. Returns one {url, success, message, steps} object per link, in input order."
    )]
    async fn unsubscribe(
        &self,
        req: Parameters<UnsubscribeRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let UnsubscribeRequest { links, user_email } = req.0;
        if links.is_empty() {
            return Err(invalid("links must not be empty"));
        }
        if !user_email.contains('@') {
            return Err(invalid(format!(
                "user_email '{}' is not an email address",
                user_email
            )));
        }

        let agent = self.ensure_agent().await?;
        let results = agent.process_links(&links, &user_email).await;
        json_ok(&results)
    }
}

#[tool_handler]
impl ServerHandler for UnsubServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "unsub-tools".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Newsletter unsubscribe server. Use 'find_unsubscribe_link' on an email's HTML/text \
                 to get its unsubscribe URL ('extract_candidate_link' does the same without a model), \
                 then 'unsubscribe' with those URLs and the user's email address. \
                 Needs ANTHROPIC_API_KEY and a local Chrome for 'unsubscribe'."
                    .into(),
            ),
        }
    }
}

pub async fn run_server() -> anyhow::Result<()> {
    use rmcp::ServiceExt;

    let server = UnsubServer::new();
    let service = server.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}
