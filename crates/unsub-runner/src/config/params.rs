use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;

/// Values for `${name}` placeholders, usually from `-P key=value`.
#[derive(Debug, Clone, Default)]
pub struct Params {
    values: HashMap<String, String>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parse from CLI args like "key=value".
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut params = Self::new();
        for arg in args {
            let (key, value) = arg.split_once('=').ok_or_else(|| {
                Error::Config(format!("invalid param '{}', expected key=value", arg))
            })?;
            if key.trim().is_empty() {
                return Err(Error::Config(format!("invalid param '{}', empty key", arg)));
            }
            params.values.insert(key.trim().to_string(), value.to_string());
        }
        Ok(params)
    }
}

/// A declared parameter.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParamDef {
    #[serde(default)]
    pub required: bool,
    pub default: Option<String>,
    pub description: Option<String>,
    /// Value is masked in `--check` output.
    #[serde(default)]
    pub secret: bool,
}

impl ParamDef {
    /// `--check` line for `name`, with its resolved value unless secret.
    pub fn describe(&self, name: &str, params: &Params) -> String {
        let mut line = name.to_string();
        if self.required {
            line.push_str(" (required)");
        }
        if self.secret {
            line.push_str(" (secret)");
        }
        match (resolved(name, self, params), self.secret) {
            (Some(_), true) => line.push_str(" = ***"),
            (Some(v), false) => line.push_str(&format!(" = {}", v)),
            (None, _) => {}
        }
        if let Some(ref desc) = self.description {
            line.push_str(": ");
            line.push_str(desc);
        }
        line
    }
}

fn resolved<'a>(name: &str, def: &'a ParamDef, params: &'a Params) -> Option<&'a str> {
    params
        .get(name)
        .or(def.default.as_deref())
        .filter(|v| !v.is_empty())
}

/// Mask every substituted secret value in `text`.
pub fn redact(text: &str, params: &Params, defs: &HashMap<String, ParamDef>) -> String {
    defs.iter()
        .filter(|(_, def)| def.secret)
        .filter_map(|(name, def)| resolved(name, def, params))
        .fold(text.to_string(), |out, secret| out.replace(secret, "***"))
}

/// Replace `${var}` in `template`. Undeclared names without a value are left
/// untouched.
pub fn substitute(
    template: &str,
    params: &Params,
    defs: &HashMap<String, ParamDef>,
) -> Result<String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(offset) = result[start..].find("${") {
        let var_start = start + offset;
        let Some(len) = result[var_start..].find('}') else {
            break;
        };
        let var_end = var_start + len;
        let name = &result[var_start + 2..var_end];

        let value = match (params.get(name), defs.get(name)) {
            (Some(v), _) => v.to_string(),
            (None, Some(def)) => match (&def.default, def.required) {
                (Some(d), _) => d.clone(),
                (None, true) => {
                    return Err(Error::Config(format!("missing required parameter: {}", name)))
                }
                (None, false) => String::new(),
            },
            (None, None) => {
                start = var_end + 1;
                continue;
            }
        };

        result.replace_range(var_start..=var_end, &value);
        start = var_start + value.len();
    }

    Ok(result)
}

/// Substitute every string scalar in a YAML tree.
pub fn substitute_value(
    value: &mut serde_yaml::Value,
    params: &Params,
    defs: &HashMap<String, ParamDef>,
) -> Result<()> {
    match value {
        serde_yaml::Value::String(s) => {
            *s = substitute(s, params, defs)?;
        }
        serde_yaml::Value::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                substitute_value(v, params, defs)?;
            }
        }
        serde_yaml::Value::Sequence(seq) => {
            for v in seq.iter_mut() {
                substitute_value(v, params, defs)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defs(entries: &[(&str, ParamDef)]) -> HashMap<String, ParamDef> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_describe_masks_secrets() {
        let params = Params::new().set("password", "hunter2").set("host", "imap.x");
        let secret = ParamDef {
            required: true,
            secret: true,
            description: Some("IMAP password".into()),
            ..Default::default()
        };
        let plain = ParamDef::default();

        let line = secret.describe("password", &params);
        assert_eq!(line, "password (required) (secret) = ***: IMAP password");
        assert!(!line.contains("hunter2"));
        assert_eq!(plain.describe("host", &params), "host = imap.x");
        assert_eq!(plain.describe("unset", &params), "unset");
    }

    #[test]
    fn test_redact_secret_values() {
        let params = Params::new().set("password", "hunter2").set("user", "me");
        let d = defs(&[
            (
                "password",
                ParamDef {
                    secret: true,
                    ..Default::default()
                },
            ),
            (
                "token",
                ParamDef {
                    secret: true,
                    default: Some("tok-1".into()),
                    ..Default::default()
                },
            ),
            ("user", ParamDef::default()),
        ]);
        let out = redact("login me:hunter2 with tok-1", &params, &d);
        assert_eq!(out, "login me:*** with ***");
    }

    #[test]
    fn test_substitute_from_params() {
        let params = Params::new().set("email", "me@example.com").set("host", "imap.x");
        let out = substitute("${email} on ${host}", &params, &HashMap::new()).unwrap();
        assert_eq!(out, "me@example.com on imap.x");
    }

    #[test]
    fn test_substitute_default_then_optional() {
        let d = defs(&[
            (
                "mailbox",
                ParamDef {
                    default: Some("INBOX".into()),
                    ..Default::default()
                },
            ),
            ("suffix", ParamDef::default()),
        ]);
        let out = substitute("${mailbox}/${suffix}", &Params::new(), &d).unwrap();
        assert_eq!(out, "INBOX/");
    }

    #[test]
    fn test_substitute_required_missing() {
        let d = defs(&[(
            "password",
            ParamDef {
                required: true,
                ..Default::default()
            },
        )]);
        let err = substitute("${password}", &Params::new(), &d).unwrap_err();
        assert!(err.to_string().contains("missing required parameter: password"));
    }

    #[test]
    fn test_substitute_unknown_left_alone() {
        let out = substitute("a ${unknown} b ${x}", &Params::new().set("x", "1"), &HashMap::new())
            .unwrap();
        assert_eq!(out, "a ${unknown} b 1");
    }

    #[test]
    fn test_value_containing_placeholder_is_not_rescanned() {
        let params = Params::new().set("a", "${a}");
        let out = substitute("${a}!", &params, &HashMap::new()).unwrap();
        assert_eq!(out, "${a}!");
    }

    #[test]
    fn test_params_from_args() {
        let args = vec!["email=me@example.com".to_string(), "pass=a=b".to_string()];
        let params = Params::from_args(&args).unwrap();
        assert_eq!(params.get("email"), Some("me@example.com"));
        assert_eq!(params.get("pass"), Some("a=b"));
    }

    #[test]
    fn test_params_from_args_rejects_bad_input() {
        assert!(Params::from_args(&["novalue".to_string()]).is_err());
        assert!(Params::from_args(&["=x".to_string()]).is_err());
    }
}
