use super::params::{self, ParamDef, Params};
use crate::{Error, Result};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use unsub_agent::AgentConfig;
use unsub_email::{ImapConfig, SearchCriteria};

/// Top-level batch config.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Name of this batch.
    pub name: String,

    /// Parameter definitions (optional).
    #[serde(default)]
    pub params: HashMap<String, ParamDef>,

    /// Address typed into unsubscribe forms that ask for one.
    pub user_email: String,

    /// Agent tuning; every field is optional.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Where links come from, processed in order.
    #[serde(default)]
    pub sources: Vec<Source>,

    /// JSON results file (supports `{timestamp}`).
    pub output: Option<String>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_with_params(path, &Params::new())
    }

    pub fn load_with_params<P: AsRef<Path>>(path: P, params: &Params) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse_with_params(&content, params)
    }

    pub fn parse(yaml: &str) -> Result<Self> {
        Self::parse_with_params(yaml, &Params::new())
    }

    /// Parse with `${param}` substitution over the whole document.
    pub fn parse_with_params(yaml: &str, params: &Params) -> Result<Self> {
        let mut value: serde_yaml::Value = serde_yaml::from_str(yaml)?;

        let defs: HashMap<String, ParamDef> = match value.get("params") {
            Some(v) => serde_yaml::from_value(v.clone())?,
            None => HashMap::new(),
        };

        params::substitute_value(&mut value, params, &defs)?;

        let config: Config = serde_yaml::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("name is required".into()));
        }
        if !self.user_email.contains('@') {
            return Err(Error::Config(format!(
                "user_email '{}' is not an email address",
                self.user_email
            )));
        }
        if self.sources.is_empty() {
            return Err(Error::Config("at least one source is required".into()));
        }
        for (i, source) in self.sources.iter().enumerate() {
            source
                .validate()
                .map_err(|e| Error::Config(format!("sources[{}]: {}", i, e)))?;
        }
        self.agent.validate()?;
        Ok(())
    }

    /// Output path with `{timestamp}` filled in.
    pub fn output_path(&self, timestamp: u64) -> Option<String> {
        self.output
            .as_ref()
            .map(|p| p.replace("{timestamp}", &timestamp.to_string()))
    }
}

/// One place to get unsubscribe links from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// An `.eml` file, or a directory of them.
    Eml(String),
    /// A link to process as-is.
    Url(String),
    /// Messages from an IMAP mailbox.
    Imap(ImapSource),
}

impl Source {
    pub fn kind(&self) -> &'static str {
        match self {
            Source::Eml(_) => "eml",
            Source::Url(_) => "url",
            Source::Imap(_) => "imap",
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match self {
            Source::Eml(path) if path.trim().is_empty() => Err("eml path is empty".into()),
            Source::Url(url) => {
                let lower = url.to_ascii_lowercase();
                if lower.starts_with("http://") || lower.starts_with("https://") {
                    Ok(())
                } else {
                    Err(format!("url '{}' must be http(s)", url))
                }
            }
            Source::Imap(imap) if imap.host.trim().is_empty() => Err("imap.host is empty".into()),
            Source::Imap(imap) if imap.limit == 0 => Err("imap.limit must be at least 1".into()),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Eml(p) => write!(f, "eml {}", p),
            Source::Url(u) => write!(f, "url {}", u),
            Source::Imap(i) => write!(f, "imap {}@{}/{}", i.username, i.host, i.mailbox),
        }
    }
}

impl<'de> Deserialize<'de> for Source {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(SourceVisitor)
    }
}

struct SourceVisitor;

impl<'de> Visitor<'de> for SourceVisitor {
    type Value = Source;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a source map with a single key (eml, url or imap)")
    }

    fn visit_map<M>(self, mut map: M) -> std::result::Result<Self::Value, M::Error>
    where
        M: MapAccess<'de>,
    {
        let key: String = map
            .next_key()?
            .ok_or_else(|| de::Error::custom("expected source type key"))?;

        let source = match key.as_str() {
            "eml" => Source::Eml(map.next_value()?),
            "url" => Source::Url(map.next_value()?),
            "imap" => Source::Imap(map.next_value()?),
            other => return Err(de::Error::unknown_variant(other, &["eml", "url", "imap"])),
        };
        if map.next_key::<String>()?.is_some() {
            return Err(de::Error::custom("a source takes exactly one key"));
        }
        Ok(source)
    }
}

/// IMAP mailbox to pull messages from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImapSource {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub tls: bool,
    pub username: String,
    pub password: String,
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    /// Sender filter.
    pub from: Option<String>,
    pub subject_contains: Option<String>,
    #[serde(default)]
    pub unseen_only: bool,
    pub since_minutes: Option<i64>,
    /// Newest messages to inspect.
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_port() -> u16 {
    993
}

fn default_true() -> bool {
    true
}

fn default_mailbox() -> String {
    "INBOX".into()
}

fn default_limit() -> usize {
    20
}

impl ImapSource {
    /// Serialization key: one connection per account at a time.
    pub fn account_key(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }

    pub fn imap_config(&self) -> ImapConfig {
        ImapConfig::new(&self.host, self.port, &self.username, &self.password)
            .mailbox(&self.mailbox)
            .tls(self.tls)
    }

    pub fn criteria(&self) -> SearchCriteria {
        let mut c = SearchCriteria::new().unseen_only(self.unseen_only);
        if let Some(ref from) = self.from {
            c = c.from(from);
        }
        if let Some(ref s) = self.subject_contains {
            c = c.subject_contains(s);
        }
        if let Some(m) = self.since_minutes {
            c = c.since_minutes(m);
        }
        c
    }
}
