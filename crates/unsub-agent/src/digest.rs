//! Page digest: a compact, indented outline of the visible DOM that a model
//! can read and build selectors from.
//!
//! The walk happens in the page (one flat pre-order list of element records,
//! iterative, bounded by depth and node count); every rule about what shows up
//! in the outline lives in [`render`].

use crate::browser::BrowserSession;
use crate::config::DigestLimits;
use crate::Result;
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Write;

/// Tags dropped together with their subtree.
pub const SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "svg", "path", "meta", "link", "head", "iframe", "canvas",
    "video", "audio", "source", "track", "template", "slot", "picture", "map", "area",
];

/// Tags that only get a line when they carry attributes or their own text.
pub const CONTAINER_TAGS: &[&str] = &[
    "html",
    "body",
    "main",
    "article",
    "section",
    "header",
    "footer",
    "nav",
    "aside",
    "div",
    "span",
    "ul",
    "ol",
    "li",
    "table",
    "tbody",
    "thead",
    "tr",
    "td",
    "th",
    "dl",
    "dt",
    "dd",
    "figure",
    "figcaption",
];

const MAX_CLASSES: usize = 3;
const MAX_TEXT_CHARS: usize = 100;
const TRUNCATED_MARKER: &str = "… (digest truncated)";

/// Walks from `<body>` with an explicit stack. Skip-tag and hidden elements
/// are reported but not descended into.
const WALK_JS: &str = r#"
((skip, maxDepth, maxNodes) => {
    const skipSet = new Set(skip);
    const out = [];
    const root = document.body || document.documentElement;
    if (!root) return JSON.stringify(out);

    const stack = [[root, 0]];
    while (stack.length && out.length < maxNodes) {
        const [el, depth] = stack.pop();
        const tag = el.tagName.toLowerCase();
        const attr = n => el.getAttribute(n) || '';
        const cs = getComputedStyle(el);
        const hidden = cs.display === 'none' || cs.visibility === 'hidden';

        let value = attr('value');
        if (tag === 'input' || tag === 'textarea' || tag === 'select') {
            value = attr('type').toLowerCase() === 'password' ? '' : String(el.value ?? '');
        }

        const own = [];
        for (const n of el.childNodes) {
            if (n.nodeType === 3) {
                const t = (n.textContent || '').trim();
                if (t) own.push(t);
            }
        }

        out.push({
            depth, tag,
            id: el.id || '',
            classes: typeof el.className === 'string' ? el.className.trim().split(/\s+/).filter(Boolean) : [],
            type: attr('type'), name: attr('name'), href: attr('href'), value,
            placeholder: attr('placeholder'), role: attr('role'), aria_label: attr('aria-label'),
            text: own.join(' '),
            hidden,
        });

        if (hidden || skipSet.has(tag) || depth >= maxDepth) continue;
        const kids = el.children;
        for (let i = kids.length - 1; i >= 0; i--) stack.push([kids[i], depth + 1]);
    }
    return JSON.stringify(out);
})
"#;

/// One element as reported by the in-page walk.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RawNode {
    pub depth: usize,
    pub tag: String,
    pub id: String,
    pub classes: Vec<String>,
    #[serde(rename = "type")]
    pub input_type: String,
    pub name: String,
    pub href: String,
    pub value: String,
    pub placeholder: String,
    pub role: String,
    pub aria_label: String,
    pub text: String,
    pub hidden: bool,
}

impl RawNode {
    /// `#id.c1.c2.c3[type="…"]…` with empty parts left out.
    fn attr_fragment(&self) -> String {
        let mut s = String::new();
        if !self.id.is_empty() {
            let _ = write!(s, "#{}", self.id);
        }
        for c in self.classes.iter().take(MAX_CLASSES) {
            let _ = write!(s, ".{}", c);
        }
        let attrs = [
            ("type", &self.input_type),
            ("name", &self.name),
            ("href", &self.href),
            ("value", &self.value),
            ("placeholder", &self.placeholder),
            ("role", &self.role),
            ("aria-label", &self.aria_label),
        ];
        for (k, v) in attrs {
            if !v.is_empty() {
                let _ = write!(s, "[{}=\"{}\"]", k, v);
            }
        }
        s
    }
}

/// What the planner sees for one iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageState {
    pub url: String,
    pub digest: String,
    /// Only set on the visual fallback path.
    pub screenshot: Option<Vec<u8>>,
}

impl PageState {
    /// Leading `max_chars` characters of the digest.
    pub fn excerpt(&self, max_chars: usize) -> &str {
        match self.digest.char_indices().nth(max_chars) {
            Some((i, _)) => &self.digest[..i],
            None => &self.digest,
        }
    }
}

/// Capture the current URL and digest of the session's page.
pub async fn digest(session: &dyn BrowserSession, limits: &DigestLimits) -> Result<PageState> {
    let js = format!(
        "{}({},{},{})",
        WALK_JS,
        serde_json::to_string(SKIP_TAGS)?,
        limits.max_depth,
        limits.max_nodes
    );
    let nodes: Vec<RawNode> = match session.evaluate(&js).await? {
        Value::String(s) => serde_json::from_str(&s)?,
        other => serde_json::from_value(other)?,
    };
    let url = session.current_url().await?;
    Ok(PageState {
        url,
        digest: render(&nodes, limits.max_chars),
        screenshot: None,
    })
}

/// Render walk records into the outline, capped at `max_chars`.
pub fn render(nodes: &[RawNode], max_chars: usize) -> String {
    let mut out = String::new();
    let mut used = 0usize;
    // depth of a dropped element; deeper records belong to its subtree
    let mut dropped_at: Option<usize> = None;

    for node in nodes {
        if let Some(d) = dropped_at {
            if node.depth > d {
                continue;
            }
            dropped_at = None;
        }
        let tag = node.tag.to_lowercase();
        if node.hidden || SKIP_TAGS.contains(&tag.as_str()) {
            dropped_at = Some(node.depth);
            continue;
        }

        let attrs = node.attr_fragment();
        let text = truncate_chars(node.text.trim(), MAX_TEXT_CHARS);
        if CONTAINER_TAGS.contains(&tag.as_str()) && attrs.is_empty() && text.is_empty() {
            continue;
        }

        let mut line = format!("{}<{}{}>", "  ".repeat(node.depth), tag, attrs);
        if !text.is_empty() {
            let _ = write!(line, " \"{}\"", text);
        }
        line.push('\n');

        let len = line.chars().count();
        if used + len > max_chars {
            out.push_str(TRUNCATED_MARKER);
            out.push('\n');
            break;
        }
        used += len;
        out.push_str(&line);
    }
    out
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(depth: usize, tag: &str) -> RawNode {
        RawNode {
            depth,
            tag: tag.into(),
            ..Default::default()
        }
    }

    #[test]
    fn renders_attributes_in_order() {
        let n = RawNode {
            depth: 2,
            tag: "input".into(),
            id: "email".into(),
            classes: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            input_type: "email".into(),
            name: "addr".into(),
            value: "x@y.z".into(),
            placeholder: "Your email".into(),
            aria_label: "Email".into(),
            ..Default::default()
        };
        assert_eq!(
            render(&[n], 10_000),
            "    <input#email.a.b.c[type=\"email\"][name=\"addr\"][value=\"x@y.z\"][placeholder=\"Your email\"][aria-label=\"Email\"]>\n"
        );
    }

    #[test]
    fn bare_containers_are_elided_but_children_render() {
        let nodes = vec![
            node(0, "body"),
            node(1, "div"),
            RawNode {
                text: "Unsubscribe".into(),
                role: "button".into(),
                ..node(2, "a")
            },
            RawNode {
                classes: vec!["footer".into()],
                ..node(1, "div")
            },
        ];
        assert_eq!(
            render(&nodes, 10_000),
            "    <a[role=\"button\"]> \"Unsubscribe\"\n  <div.footer>\n"
        );
    }

    #[test]
    fn container_with_text_is_kept() {
        let nodes = vec![RawNode {
            text: "You have been unsubscribed.".into(),
            ..node(1, "span")
        }];
        assert_eq!(
            render(&nodes, 10_000),
            "  <span> \"You have been unsubscribed.\"\n"
        );
    }

    #[test]
    fn non_container_always_emits() {
        assert_eq!(render(&[node(0, "button")], 10_000), "<button>\n");
        assert_eq!(render(&[node(0, "FORM")], 10_000), "<form>\n");
    }

    #[test]
    fn skip_and_hidden_drop_subtree() {
        let nodes = vec![
            node(0, "body"),
            node(1, "script"),
            RawNode {
                text: "leaked".into(),
                ..node(2, "p")
            },
            RawNode {
                hidden: true,
                ..node(1, "form")
            },
            node(2, "button"),
            node(1, "button"),
        ];
        assert_eq!(render(&nodes, 10_000), "  <button>\n");
    }

    #[test]
    fn text_capped_at_100_chars() {
        let long = "é".repeat(150);
        let out = render(
            &[RawNode {
                text: long,
                ..node(0, "p")
            }],
            10_000,
        );
        let quoted = out
            .trim_end()
            .trim_start_matches("<p> \"")
            .trim_end_matches('"');
        assert_eq!(quoted.chars().count(), 100);
    }

    #[test]
    fn truncates_at_line_boundary() {
        let nodes: Vec<RawNode> = (0..50)
            .map(|i| RawNode {
                text: format!("item {}", i),
                ..node(0, "p")
            })
            .collect();
        let out = render(&nodes, 100);
        assert!(out.ends_with("… (digest truncated)\n"));
        for line in out.lines().filter(|l| !l.starts_with('…')) {
            assert!(line.starts_with("<p> \"item "), "{}", line);
            assert!(line.ends_with('"'));
        }
        assert!(out.chars().count() <= 100 + TRUNCATED_MARKER.chars().count() + 1);
    }

    #[test]
    fn excerpt_is_char_safe() {
        let ps = PageState {
            digest: "ab€cd".into(),
            ..Default::default()
        };
        assert_eq!(ps.excerpt(3), "ab€");
        assert_eq!(ps.excerpt(50), "ab€cd");
    }

    #[test]
    fn raw_node_from_walk_json() {
        let json = r#"[{"depth":0,"tag":"body","id":"","classes":[],"type":"","name":"","href":"","value":"","placeholder":"","role":"","aria_label":"","text":"","hidden":false},
                      {"depth":1,"tag":"a","href":"https://x.test/u","text":"Unsubscribe"}]"#;
        let nodes: Vec<RawNode> = serde_json::from_str(json).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(
            render(&nodes, 1000),
            "  <a[href=\"https://x.test/u\"]> \"Unsubscribe\"\n"
        );
    }
}
