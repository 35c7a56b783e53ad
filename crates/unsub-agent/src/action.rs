//! The one-step actions a planner can choose, and parsing of model replies
//! into them.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single planned step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AgentAction {
    Click {
        selector: String,
        description: String,
    },
    Type {
        selector: String,
        value: String,
        description: String,
    },
    Select {
        selector: String,
        value: String,
        description: String,
    },
    Submit {
        #[serde(skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
        description: String,
    },
    /// Terminal: the page confirmed the unsubscribe.
    Done { description: String },
    /// Terminal: nothing more can be done.
    Error { description: String },
}

impl AgentAction {
    pub fn error(description: impl Into<String>) -> Self {
        AgentAction::Error {
            description: description.into(),
        }
    }

    pub fn description(&self) -> &str {
        match self {
            AgentAction::Click { description, .. }
            | AgentAction::Type { description, .. }
            | AgentAction::Select { description, .. }
            | AgentAction::Submit { description, .. }
            | AgentAction::Done { description }
            | AgentAction::Error { description } => description,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AgentAction::Click { .. } => "click",
            AgentAction::Type { .. } => "type",
            AgentAction::Select { .. } => "select",
            AgentAction::Submit { .. } => "submit",
            AgentAction::Done { .. } => "done",
            AgentAction::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentAction::Done { .. } | AgentAction::Error { .. })
    }
}

impl fmt::Display for AgentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentAction::Click { selector, .. } => write!(f, "click {}", selector),
            AgentAction::Type {
                selector, value, ..
            } => {
                write!(f, "type \"{}\" into {}", value, selector)
            }
            AgentAction::Select {
                selector, value, ..
            } => {
                write!(f, "select \"{}\" in {}", value, selector)
            }
            AgentAction::Submit {
                selector: Some(s), ..
            } => write!(f, "submit {}", s),
            AgentAction::Submit { selector: None, .. } => f.write_str("submit"),
            AgentAction::Done { description } => write!(f, "done: {}", description),
            AgentAction::Error { description } => write!(f, "error: {}", description),
        }
    }
}

/// Wire shape of a model reply before validation.
#[derive(Debug, Deserialize)]
struct RawAction {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    selector: Option<String>,
    #[serde(default)]
    value: Option<serde_json::Value>,
    #[serde(default)]
    description: Option<String>,
}

impl TryFrom<RawAction> for AgentAction {
    type Error = Error;

    fn try_from(raw: RawAction) -> Result<Self> {
        let kind = raw.kind.trim().to_lowercase();
        let selector = raw
            .selector
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        // models sometimes send numbers for select values
        let value = raw.value.and_then(|v| match v {
            serde_json::Value::String(s) if s.is_empty() => None,
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        });
        let description = raw
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| format!("{} action", kind));

        let need_selector = || {
            selector
                .clone()
                .ok_or_else(|| Error::InvalidAction(format!("{} requires a selector", kind)))
        };
        let need_value = || {
            value
                .clone()
                .ok_or_else(|| Error::InvalidAction(format!("{} requires a value", kind)))
        };

        let action = match kind.as_str() {
            "click" => AgentAction::Click {
                selector: need_selector()?,
                description,
            },
            "type" => AgentAction::Type {
                selector: need_selector()?,
                value: need_value()?,
                description,
            },
            "select" => AgentAction::Select {
                selector: need_selector()?,
                value: need_value()?,
                description,
            },
            "submit" => AgentAction::Submit {
                selector: selector.clone(),
                description,
            },
            "done" => AgentAction::Done { description },
            "error" => AgentAction::Error { description },
            other => {
                return Err(Error::InvalidAction(format!(
                    "unknown action type '{}'",
                    other
                )))
            }
        };
        Ok(action)
    }
}

/// Parse a model reply into an action. The reply may wrap the JSON object in
/// prose or a markdown fence; the first balanced `{...}` block is used.
pub fn parse_action(reply: &str) -> Result<AgentAction> {
    let json = extract_json_object(reply)
        .ok_or_else(|| Error::InvalidAction("no JSON object in reply".into()))?;
    let raw: RawAction = serde_json::from_str(json)?;
    AgentAction::try_from(raw)
}

/// First balanced `{...}` block in `text`, skipping braces inside strings.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_click() {
        let a = parse_action(
            r#"{"type": "click", "selector": "button:has-text(\"Unsubscribe\")", "description": "Click unsubscribe"}"#,
        )
        .unwrap();
        assert_eq!(
            a,
            AgentAction::Click {
                selector: r#"button:has-text("Unsubscribe")"#.into(),
                description: "Click unsubscribe".into()
            }
        );
        assert!(!a.is_terminal());
    }

    #[test]
    fn parse_type_requires_value() {
        let err =
            parse_action(r##"{"type":"type","selector":"#email","description":"x"}"##).unwrap_err();
        assert!(err.to_string().contains("requires a value"), "{}", err);

        let err =
            parse_action(r##"{"type":"type","selector":"#email","value":"","description":"x"}"##)
                .unwrap_err();
        assert!(err.to_string().contains("requires a value"), "{}", err);
        assert!(parse_action(r#"{"type":"select","selector":"select#freq","value":""}"#).is_err());

        let a = parse_action(
            r##"{"type":"type","selector":"#email","value":"me@example.com","description":"Enter email"}"##,
        )
        .unwrap();
        assert_eq!(a.kind(), "type");
    }

    #[test]
    fn parse_click_requires_selector() {
        assert!(parse_action(r#"{"type":"click","description":"?"}"#).is_err());
        assert!(parse_action(r#"{"type":"click","selector":"  ","description":"?"}"#).is_err());
    }

    #[test]
    fn parse_select_numeric_value() {
        let a = parse_action(r#"{"type":"select","selector":"select#freq","value":0}"#).unwrap();
        if let AgentAction::Select {
            value, description, ..
        } = a
        {
            assert_eq!(value, "0");
            assert_eq!(description, "select action");
        } else {
            panic!("Expected Select");
        }
    }

    #[test]
    fn parse_submit_without_selector() {
        let a = parse_action(r#"{"type":"submit","description":"Submit the form"}"#).unwrap();
        assert_eq!(
            a,
            AgentAction::Submit {
                selector: None,
                description: "Submit the form".into()
            }
        );
    }

    #[test]
    fn parse_terminal() {
        let done =
            parse_action(r#"{"type":"done","description":"You have been unsubscribed"}"#).unwrap();
        assert!(done.is_terminal());
        assert_eq!(done.description(), "You have been unsubscribed");

        let err = parse_action(r#"{"type":"ERROR","description":"404 page"}"#).unwrap();
        assert_eq!(err, AgentAction::error("404 page"));
    }

    #[test]
    fn parse_unknown_type() {
        let err = parse_action(r#"{"type":"hover","selector":"a"}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidAction(_)));
    }

    #[test]
    fn parse_prose_and_fence() {
        let reply = "Looking at the page, the next step is:\n```json\n{\n  \"type\": \"done\",\n  \"description\": \"Confirmation {shown}\"\n}\n```\nLet me know {if} needed.";
        let a = parse_action(reply).unwrap();
        assert_eq!(a.description(), "Confirmation {shown}");
    }

    #[test]
    fn parse_no_json() {
        assert!(parse_action("I cannot decide.").is_err());
        assert!(parse_action("{ unterminated").is_err());
    }

    #[test]
    fn extract_json_skips_braces_in_strings() {
        let s = r#"x {"a": "}\"{", "b": {"c": 1}} y {"z": 2}"#;
        assert_eq!(
            extract_json_object(s),
            Some(r#"{"a": "}\"{", "b": {"c": 1}}"#)
        );
    }

    #[test]
    fn serialize_wire_shape() {
        let v = serde_json::to_value(AgentAction::Type {
            selector: "#e".into(),
            value: "me@example.com".into(),
            description: "Enter email".into(),
        })
        .unwrap();
        assert_eq!(v["type"], "type");
        assert_eq!(v["selector"], "#e");
        assert_eq!(v["value"], "me@example.com");

        let v = serde_json::to_value(AgentAction::Submit {
            selector: None,
            description: "go".into(),
        })
        .unwrap();
        assert!(v.get("selector").is_none());
    }

    #[test]
    fn display() {
        let a = AgentAction::Select {
            selector: "select".into(),
            value: "never".into(),
            description: String::new(),
        };
        assert_eq!(a.to_string(), r#"select "never" in select"#);
    }
}
