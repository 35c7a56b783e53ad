//! Turns a planned [`AgentAction`] into browser calls.
//!
//! Model-written selectors are often not valid CSS (`button:has-text("…")`,
//! `text="…"`), so clicks walk a cascade of strategies and stop at the first
//! one that lands.

use crate::action::AgentAction;
use crate::browser::BrowserSession;
use crate::trace::StepTrace;
use crate::{with_timeout, Error, Result};
use serde::Deserialize;
use tracing::{debug, info};

/// One way of turning a selector string into a click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickStrategy {
    /// The selector as literal CSS.
    Css,
    /// Smallest visible element whose text matches (`text="…"` or bare text).
    VisibleText,
    /// Button-like element whose accessible name contains the text
    /// (`button:has-text("…")`).
    ButtonName,
    /// First innermost element anywhere whose text contains the raw selector.
    TextContains,
}

impl ClickStrategy {
    /// Order tried for every click.
    pub const CASCADE: [ClickStrategy; 4] = [
        ClickStrategy::Css,
        ClickStrategy::VisibleText,
        ClickStrategy::ButtonName,
        ClickStrategy::TextContains,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ClickStrategy::Css => "css selector",
            ClickStrategy::VisibleText => "visible text",
            ClickStrategy::ButtonName => "button name",
            ClickStrategy::TextContains => "text contains",
        }
    }
}

/// Tried in order when a submit action has no selector.
const SUBMIT_FALLBACKS: [(ClickStrategy, &str); 4] = [
    (ClickStrategy::Css, r#"button[type="submit"]"#),
    (ClickStrategy::Css, r#"input[type="submit"]"#),
    (ClickStrategy::ButtonName, "Submit"),
    (ClickStrategy::ButtonName, "Confirm"),
];

const RESOLVE_JS: &str = r#"
((mode, query) => {
    const lc = s => (s || '').replace(/\s+/g, ' ').trim().toLowerCase();
    const q = lc(query);
    if (!q) return { found: false };

    function selector(el) {
        if (el.id) return '#' + CSS.escape(el.id);
        const path = [];
        let n = el;
        while (n && n.nodeType === 1) {
            let s = n.tagName.toLowerCase();
            if (n.id) { path.unshift('#' + CSS.escape(n.id)); break; }
            const p = n.parentElement;
            if (p) {
                const sibs = [...p.children].filter(c => c.tagName === n.tagName);
                if (sibs.length > 1) s += ':nth-of-type(' + (sibs.indexOf(n) + 1) + ')';
            }
            path.unshift(s);
            n = p;
        }
        return path.join(' > ');
    }

    function visible(el) {
        const r = el.getBoundingClientRect();
        const s = getComputedStyle(el);
        return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';
    }

    function accessibleName(el) {
        return lc(el.innerText || el.value || el.getAttribute('aria-label') || el.title || '');
    }

    const all = [...document.querySelectorAll('body *')];
    let el = null;
    switch (mode) {
        case 'text': {
            const exact = all.filter(e => visible(e) && lc(e.innerText) === q);
            const hits = exact.length ? exact : all.filter(e => visible(e) && lc(e.innerText).includes(q));
            hits.sort((a, b) => lc(a.innerText).length - lc(b.innerText).length
                || a.querySelectorAll('*').length - b.querySelectorAll('*').length);
            el = hits[0] || null;
            break;
        }
        case 'button':
            el = [...document.querySelectorAll('button,[role="button"],input[type="submit"],input[type="button"],input[type="reset"],a[role="button"]')]
                .find(e => visible(e) && accessibleName(e).includes(q)) || null;
            break;
        case 'contains':
            el = all.find(e => !['SCRIPT', 'STYLE', 'NOSCRIPT', 'TEMPLATE'].includes(e.tagName)
                && lc(e.textContent).includes(q)
                && ![...e.children].some(c => lc(c.textContent).includes(q))) || null;
            break;
    }

    if (!el) return { found: false };
    return { found: true, selector: selector(el), tag: el.tagName.toLowerCase() };
})
"#;

#[derive(Debug, Deserialize)]
struct Resolved {
    found: bool,
    #[serde(default)]
    selector: String,
    #[serde(default)]
    tag: String,
}

/// Execute one non-terminal action. Every attempt is bounded by `timeout_ms`;
/// intent, failed strategies and the winning strategy go into `steps`.
pub async fn execute(
    session: &dyn BrowserSession,
    action: &AgentAction,
    steps: &mut StepTrace,
    timeout_ms: u64,
) -> Result<()> {
    match action {
        AgentAction::Click { selector, .. } => {
            info!("click: {}", selector);
            steps.push(format!("Clicking: {}", selector));
            click(session, selector, steps, timeout_ms).await
        }
        AgentAction::Type {
            selector, value, ..
        } => {
            info!("type: {} = '{}'", selector, value);
            steps.push(format!("Typing \"{}\" into: {}", value, selector));
            with_timeout(timeout_ms, "type", session.fill(selector, value)).await?;
            steps.push(format!("  Typed into {}", selector));
            Ok(())
        }
        AgentAction::Select {
            selector, value, ..
        } => {
            info!("select: {} = '{}'", selector, value);
            steps.push(format!("Selecting \"{}\" in: {}", value, selector));
            with_timeout(timeout_ms, "select", session.select_option(selector, value)).await?;
            steps.push(format!("  Selected \"{}\"", value));
            Ok(())
        }
        AgentAction::Submit { selector, .. } => {
            info!("submit: {:?}", selector);
            steps.push("Submitting form");
            match selector {
                Some(sel) => click(session, sel, steps, timeout_ms).await,
                None => submit_fallback(session, steps, timeout_ms).await,
            }
        }
        AgentAction::Done { .. } | AgentAction::Error { .. } => Err(Error::InvalidAction(format!(
            "{} is terminal and cannot be executed",
            action.kind()
        ))),
    }
}

/// Walk [`ClickStrategy::CASCADE`] until one click succeeds.
pub async fn click(
    session: &dyn BrowserSession,
    selector: &str,
    steps: &mut StepTrace,
    timeout_ms: u64,
) -> Result<()> {
    for strategy in ClickStrategy::CASCADE {
        match try_click(session, strategy, selector, timeout_ms).await {
            Ok(()) => {
                steps.push(format!("  Clicked via {}", strategy.name()));
                return Ok(());
            }
            Err(e) => {
                debug!("{} failed for '{}': {}", strategy.name(), selector, e);
                steps.push(format!("  {} failed: {}", strategy.name(), e));
            }
        }
    }
    Err(Error::ActionFailed(format!(
        "no strategy could click '{}'",
        selector
    )))
}

async fn submit_fallback(
    session: &dyn BrowserSession,
    steps: &mut StepTrace,
    timeout_ms: u64,
) -> Result<()> {
    for (strategy, target) in SUBMIT_FALLBACKS {
        match try_click(session, strategy, target, timeout_ms).await {
            Ok(()) => {
                steps.push(format!("  Submitted via {} '{}'", strategy.name(), target));
                return Ok(());
            }
            Err(e) => {
                debug!(
                    "submit fallback {} '{}' failed: {}",
                    strategy.name(),
                    target,
                    e
                );
                steps.push(format!("  {} '{}' failed: {}", strategy.name(), target, e));
            }
        }
    }
    steps.push("  No submit button found");
    Err(Error::ActionFailed("no submit button found".into()))
}

async fn try_click(
    session: &dyn BrowserSession,
    strategy: ClickStrategy,
    selector: &str,
    timeout_ms: u64,
) -> Result<()> {
    with_timeout(timeout_ms, strategy.name(), async {
        let target = match strategy {
            ClickStrategy::Css => selector.to_string(),
            ClickStrategy::VisibleText => resolve(session, "text", &text_query(selector)).await?,
            ClickStrategy::ButtonName => resolve(session, "button", &button_name(selector)).await?,
            ClickStrategy::TextContains => resolve(session, "contains", selector).await?,
        };
        session.click(&target).await
    })
    .await
}

/// Resolve a query to a concrete CSS selector in the page.
async fn resolve(session: &dyn BrowserSession, mode: &str, query: &str) -> Result<String> {
    let js = format!(
        "{}({},{})",
        RESOLVE_JS,
        serde_json::to_string(mode)?,
        serde_json::to_string(query)?
    );
    let resolved: Resolved = serde_json::from_value(session.evaluate(&js).await?)?;
    if !resolved.found || resolved.selector.is_empty() {
        return Err(Error::ActionFailed(format!(
            "no element for {} '{}'",
            mode, query
        )));
    }
    debug!(
        "resolved {} '{}' -> <{}> {}",
        mode, query, resolved.tag, resolved.selector
    );
    Ok(resolved.selector)
}

/// `text="Unsubscribe"` / `text=Unsubscribe` / `"Unsubscribe"` → `Unsubscribe`.
pub fn text_query(selector: &str) -> String {
    let s = selector.trim();
    let s = s.strip_prefix("text=").unwrap_or(s);
    strip_quotes(s).to_string()
}

/// `button:has-text("Confirm")` → `Confirm`; anything else falls back to
/// [`text_query`].
pub fn button_name(selector: &str) -> String {
    let s = selector.trim();
    if let Some(start) = s.find(":has-text(") {
        let rest = &s[start + ":has-text(".len()..];
        if let Some(end) = rest.rfind(')') {
            return strip_quotes(rest[..end].trim()).to_string();
        }
    }
    text_query(s)
}

fn strip_quotes(s: &str) -> &str {
    for q in ['"', '\''] {
        if let Some(inner) = s.strip_prefix(q).and_then(|r| r.strip_suffix(q)) {
            return inner;
        }
    }
    s
}
