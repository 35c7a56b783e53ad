//! # unsub-runner
//!
//! Config-based unsubscribe batches. A YAML file names the mail sources
//! (`.eml` files, direct links, IMAP mailboxes); the runner collects one
//! unsubscribe link per email and drives the agent over all of them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use unsub_runner::{Config, Params, Runner};
//!
//! # #[tokio::main]
//! # async fn main() -> unsub_runner::Result<()> {
//! let params = Params::new().set("email", "me@example.com");
//! let config = Config::load_with_params("cleanup.yaml", &params)?;
//! let report = Runner::from_config(&config)?.run(&config).await?;
//! println!("{} of {} links done", report.succeeded(), report.results.len());
//! # Ok(())
//! # }
//! ```

mod config;
mod runner;

pub use config::{redact, Config, ImapSource, ParamDef, Params, Source};
pub use runner::{write_results, LinkCollection, RunReport, Runner};

/// Result type for unsub-runner operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during config loading or a batch run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("email error: {0}")]
    Email(#[from] unsub_email::Error),

    #[error("agent error: {0}")]
    Agent(#[from] unsub_agent::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r#"
name: "Cleanup"
user_email: "me@example.com"
sources:
  - url: "https://example.com/unsubscribe?id=1"
"#;
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.name, "Cleanup");
        assert_eq!(config.user_email, "me@example.com");
        assert_eq!(
            config.sources,
            vec![Source::Url("https://example.com/unsubscribe?id=1".into())]
        );
        assert_eq!(config.agent.max_iterations, 10);
        assert!(config.output.is_none());
    }

    #[test]
    fn test_parse_all_sources() {
        let yaml = r#"
name: "Cleanup"
user_email: "me@example.com"
sources:
  - eml: "mail/newsletter.eml"
  - url: "https://example.com/u"
  - imap:
      host: imap.example.com
      username: "me@example.com"
      password: "hunter2"
      from: "news@"
      limit: 5
"#;
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.sources.len(), 3);
        assert_eq!(config.sources[0], Source::Eml("mail/newsletter.eml".into()));
        assert_eq!(config.sources[1].kind(), "url");

        if let Source::Imap(imap) = &config.sources[2] {
            assert_eq!(imap.host, "imap.example.com");
            assert_eq!(imap.port, 993);
            assert!(imap.tls);
            assert_eq!(imap.mailbox, "INBOX");
            assert_eq!(imap.limit, 5);
            assert_eq!(imap.account_key(), "me@example.com@imap.example.com:993");
            let c = imap.criteria();
            assert_eq!(c.from.as_deref(), Some("news@"));
            assert!(!c.unseen_only);
        } else {
            panic!("Expected Imap source");
        }
    }

    #[test]
    fn test_parse_agent_overrides() {
        let yaml = r#"
name: "Cleanup"
user_email: "me@example.com"
agent:
  max_iterations: 4
  max_concurrent_links: 2
  browser:
    headless: false
  llm:
    model: "custom-model"
sources:
  - url: "https://example.com/u"
"#;
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.agent.max_iterations, 4);
        assert_eq!(config.agent.max_concurrent_links, Some(2));
        assert!(!config.agent.browser.headless);
        assert_eq!(config.agent.llm.model, "custom-model");
        assert_eq!(config.agent.navigation_timeout_ms, 30_000);
    }

    #[test]
    fn test_params_substitution() {
        let yaml = r#"
name: "Cleanup"
params:
  email:
    required: true
  password:
    required: true
    secret: true
user_email: "${email}"
sources:
  - imap:
      host: imap.example.com
      username: "${email}"
      password: "${password}"
"#;
        let params = Params::new()
            .set("email", "me@example.com")
            .set("password", "hunter2");
        let config = Config::parse_with_params(yaml, &params).unwrap();
        assert_eq!(config.user_email, "me@example.com");
        assert!(config.params["password"].secret);
        if let Source::Imap(imap) = &config.sources[0] {
            assert_eq!(imap.username, "me@example.com");
            assert_eq!(imap.password, "hunter2");
        } else {
            panic!("Expected Imap source");
        }
    }

    #[test]
    fn test_params_missing_required() {
        let yaml = r#"
name: "Cleanup"
params:
  email:
    required: true
user_email: "${email}"
sources:
  - url: "https://example.com/u"
"#;
        let err = Config::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("email"));
    }

    #[test]
    fn test_params_default_value() {
        let yaml = r#"
name: "Cleanup"
params:
  email:
    default: "me@example.com"
user_email: "${email}"
sources:
  - url: "https://example.com/u"
"#;
        assert_eq!(Config::parse(yaml).unwrap().user_email, "me@example.com");
    }

    #[test]
    fn test_validation_empty_name() {
        let yaml = r#"
name: ""
user_email: "me@example.com"
sources:
  - url: "https://example.com/u"
"#;
        assert!(Config::parse(yaml).is_err());
    }

    #[test]
    fn test_validation_bad_email() {
        let yaml = r#"
name: "Cleanup"
user_email: "me"
sources:
  - url: "https://example.com/u"
"#;
        let err = Config::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("not an email address"));
    }

    #[test]
    fn test_validation_no_sources() {
        let yaml = r#"
name: "Cleanup"
user_email: "me@example.com"
"#;
        let err = Config::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("at least one source"));
    }

    #[test]
    fn test_validation_non_http_url() {
        let yaml = r#"
name: "Cleanup"
user_email: "me@example.com"
sources:
  - url: "mailto:leave@example.com"
"#;
        let err = Config::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("sources[0]"));
    }

    #[test]
    fn test_validation_bad_agent() {
        let yaml = r#"
name: "Cleanup"
user_email: "me@example.com"
agent:
  max_iterations: 0
sources:
  - url: "https://example.com/u"
"#;
        let err = Config::parse(yaml).unwrap_err();
        assert!(matches!(err, Error::Agent(_)));
    }

    #[test]
    fn test_unknown_source_kind() {
        let yaml = r#"
name: "Cleanup"
user_email: "me@example.com"
sources:
  - pop3: "pop.example.com"
"#;
        assert!(matches!(Config::parse(yaml), Err(Error::Yaml(_))));
    }

    #[test]
    fn test_source_with_two_keys() {
        let yaml = r#"
name: "Cleanup"
user_email: "me@example.com"
sources:
  - url: "https://example.com/u"
    eml: "x.eml"
"#;
        assert!(Config::parse(yaml).is_err());
    }

    #[test]
    fn test_output_timestamp() {
        let yaml = r#"
name: "Cleanup"
user_email: "me@example.com"
output: "results-{timestamp}.json"
sources:
  - url: "https://example.com/u"
"#;
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.output_path(42).as_deref(), Some("results-42.json"));
    }

    #[test]
    fn test_load_example_config() {
        let params = Params::new()
            .set("email", "me@example.com")
            .set("password", "hunter2");
        let config = Config::load_with_params("configs/example.yaml", &params).unwrap();
        assert_eq!(config.name, "Newsletter cleanup");
        assert_eq!(config.sources.len(), 3);
    }
}
