//! Browser seam. The agent talks to [`BrowserLauncher`] / [`BrowserSession`];
//! [`EokaLauncher`] is the CDP-backed default, tests plug in fakes.

use crate::config::BrowserConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use eoka::{Browser, Page};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Opens isolated sessions.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Start a fresh browser (own profile, cookies and storage) with one page.
    async fn launch(&self, config: &BrowserConfig) -> Result<Box<dyn BrowserSession>>;
    /// Sessions launched and not yet closed or dropped.
    fn active_sessions(&self) -> usize;
}

/// One browser plus its page. Owned by a single agent run.
///
/// Methods carry no timeouts of their own; callers bound them.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn goto(&mut self, url: &str) -> Result<()>;
    async fn current_url(&self) -> Result<String>;
    /// Evaluate a JS expression and return its JSON value.
    async fn evaluate(&self, js: &str) -> Result<Value>;
    /// Full-viewport PNG.
    async fn screenshot(&self) -> Result<Vec<u8>>;
    async fn click(&self, selector: &str) -> Result<()>;
    /// Replace the field's content with `value`.
    async fn fill(&self, selector: &str, value: &str) -> Result<()>;
    /// Pick an `<option>` by value or visible text.
    async fn select_option(&self, selector: &str, value: &str) -> Result<()>;
    async fn wait(&self, ms: u64);
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Counts a session as open until dropped.
#[derive(Debug)]
pub struct SessionTicket {
    open: Arc<AtomicUsize>,
}

impl SessionTicket {
    pub fn issue(open: &Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self { open: open.clone() }
    }
}

impl Drop for SessionTicket {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Launches one Chrome process per session through `eoka`.
#[derive(Debug, Default)]
pub struct EokaLauncher {
    open: Arc<AtomicUsize>,
}

impl EokaLauncher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BrowserLauncher for EokaLauncher {
    async fn launch(&self, config: &BrowserConfig) -> Result<Box<dyn BrowserSession>> {
        let stealth = eoka::StealthConfig {
            headless: config.headless,
            proxy: config.proxy.clone(),
            user_agent: Some(config.user_agent.clone()),
            viewport_width: config.viewport.width,
            viewport_height: config.viewport.height,
            ..Default::default()
        };

        debug!(
            "Launching browser (headless: {}, viewport: {}x{})",
            config.headless, config.viewport.width, config.viewport.height
        );
        let ticket = SessionTicket::issue(&self.open);
        let browser = Browser::launch_with_config(stealth).await?;
        let page = match browser.new_page("about:blank").await {
            Ok(p) => p,
            Err(e) => {
                let _ = browser.close().await;
                return Err(e.into());
            }
        };

        Ok(Box::new(EokaSession {
            browser,
            page,
            _ticket: ticket,
        }))
    }

    fn active_sessions(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

struct EokaSession {
    browser: Browser,
    page: Page,
    _ticket: SessionTicket,
}

#[async_trait]
impl BrowserSession for EokaSession {
    async fn goto(&mut self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.page.url().await?)
    }

    async fn evaluate(&self, js: &str) -> Result<Value> {
        Ok(self.page.evaluate(js).await?)
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        Ok(self.page.screenshot().await?)
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.page.click(selector).await?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        self.page.fill(selector, value).await?;
        Ok(())
    }

    async fn select_option(&self, selector: &str, value: &str) -> Result<()> {
        let js = select_option_js(selector, value)?;
        let result: String = self.page.evaluate(&js).await?;
        match result.as_str() {
            "ok" => Ok(()),
            "element_not_found" => Err(Error::ActionFailed(format!(
                "select element '{}' not found",
                selector
            ))),
            "option_not_found" => Err(Error::ActionFailed(format!(
                "option '{}' not found in select",
                value
            ))),
            _ => Err(Error::ActionFailed(format!("select failed: {}", result))),
        }
    }

    async fn wait(&self, ms: u64) {
        self.page.wait(ms).await;
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let EokaSession {
            browser,
            page,
            _ticket,
        } = *self;
        drop(page);
        browser.close().await?;
        Ok(())
    }
}

/// JS that selects an option by value, then by trimmed visible text.
fn select_option_js(selector: &str, value: &str) -> Result<String> {
    Ok(format!(
        r#"(() => {{
            const sel = document.querySelector({sel});
            if (!sel || !sel.options) return 'element_not_found';
            const want = {val};
            const opt = Array.from(sel.options).find(o => o.value === want)
                || Array.from(sel.options).find(o => o.text.trim() === want.trim());
            if (!opt) return 'option_not_found';
            sel.value = opt.value;
            sel.dispatchEvent(new Event('input', {{ bubbles: true }}));
            sel.dispatchEvent(new Event('change', {{ bubbles: true }}));
            return 'ok';
        }})()"#,
        sel = serde_json::to_string(selector)?,
        val = serde_json::to_string(value)?
    ))
}
