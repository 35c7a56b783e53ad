use crate::config::{Config, ImapSource, Source};
use crate::Result;
use futures::future::join_all;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use unsub_agent::{AnthropicClient, EokaLauncher, UnsubscribeAgent, UnsubscribeResult};
use unsub_email::{AccountLock, AsyncImapClient, EmailMessage};

/// Outcome of a whole batch.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub name: String,
    /// One entry per distinct link, in collection order.
    pub results: Vec<UnsubscribeResult>,
    pub emails_scanned: usize,
    pub emails_without_link: usize,
    /// Sources (or files within them) that could not be read.
    pub source_errors: Vec<String>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// Every source was readable and every link went through.
    pub fn success(&self) -> bool {
        self.source_errors.is_empty() && self.failed() == 0
    }
}

/// Links gathered from all sources, before the agent runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkCollection {
    /// Distinct links, first occurrence order.
    pub links: Vec<String>,
    pub emails_scanned: usize,
    pub emails_without_link: usize,
    pub errors: Vec<String>,
}

impl LinkCollection {
    fn absorb(&mut self, other: LinkCollection) {
        self.links.extend(other.links);
        self.emails_scanned += other.emails_scanned;
        self.emails_without_link += other.emails_without_link;
        self.errors.extend(other.errors);
    }
}

/// Runs batch configs through an [`UnsubscribeAgent`].
pub struct Runner {
    agent: UnsubscribeAgent,
    locks: AccountLock,
    base_path: PathBuf,
}

impl Runner {
    pub fn new(agent: UnsubscribeAgent) -> Self {
        Self {
            agent,
            locks: AccountLock::new(),
            base_path: PathBuf::from("."),
        }
    }

    /// Agent backed by Chrome and the Anthropic API, configured from `config.agent`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let llm = AnthropicClient::from_config(&config.agent.llm)?;
        let agent = UnsubscribeAgent::new(
            Arc::new(EokaLauncher::new()),
            Arc::new(llm),
            config.agent.clone(),
        );
        Ok(Self::new(agent))
    }

    /// Directory relative `eml` paths resolve against.
    pub fn with_base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn agent(&self) -> &UnsubscribeAgent {
        &self.agent
    }

    /// Collect, dedup, unsubscribe and write `output` if configured.
    pub async fn run(&self, config: &Config) -> Result<RunReport> {
        let start = Instant::now();
        info!("Running: {}", config.name);

        let collected = self.collect_links(config).await;
        info!(
            "Collected {} links from {} emails ({} without a link)",
            collected.links.len(),
            collected.emails_scanned,
            collected.emails_without_link
        );

        let results = if collected.links.is_empty() {
            Vec::new()
        } else {
            self.agent
                .process_links(&collected.links, &config.user_email)
                .await
        };

        let report = RunReport {
            name: config.name.clone(),
            results,
            emails_scanned: collected.emails_scanned,
            emails_without_link: collected.emails_without_link,
            source_errors: collected.errors,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if let Some(path) = config.output_path(timestamp) {
            write_results(&path, &report.results)?;
            info!("Results written to: {}", path);
        }

        Ok(report)
    }

    /// Links from every source, deduplicated. Sources are read concurrently;
    /// IMAP sources sharing an account take turns.
    pub async fn collect_links(&self, config: &Config) -> LinkCollection {
        let per_source = join_all(config.sources.iter().map(|s| self.collect_source(s))).await;

        let mut all = LinkCollection::default();
        for (source, collected) in config.sources.iter().zip(per_source) {
            debug!("{}: {} links", source, collected.links.len());
            all.absorb(collected);
        }
        all.links = unsub_email::dedup_links(all.links);
        all
    }

    async fn collect_source(&self, source: &Source) -> LinkCollection {
        match source {
            Source::Url(url) => LinkCollection {
                links: vec![url.clone()],
                ..Default::default()
            },
            Source::Eml(path) => self.collect_eml(&self.base_path.join(path)).await,
            Source::Imap(imap) => self.collect_imap(imap).await,
        }
    }

    async fn collect_eml(&self, path: &Path) -> LinkCollection {
        let mut out = LinkCollection::default();
        let files = match eml_files(path) {
            Ok(files) => files,
            Err(e) => {
                warn!("Cannot read {}: {}", path.display(), e);
                out.errors.push(format!("{}: {}", path.display(), e));
                return out;
            }
        };

        for file in files {
            let message = std::fs::read(&file)
                .map_err(crate::Error::from)
                .and_then(|raw| EmailMessage::parse(raw).map_err(crate::Error::from));
            match message {
                Ok(message) => self.scan_message(&message, &mut out).await,
                Err(e) => {
                    warn!("Skipping {}: {}", file.display(), e);
                    out.errors.push(format!("{}: {}", file.display(), e));
                }
            }
        }
        out
    }

    async fn collect_imap(&self, source: &ImapSource) -> LinkCollection {
        let mut out = LinkCollection::default();
        let key = source.account_key();

        let fetched = self
            .locks
            .with_lock(&key, || async {
                debug!("Connecting to {}", key);
                let client = AsyncImapClient::connect(&source.imap_config()).await?;
                client.fetch_all(&source.criteria(), source.limit).await
            })
            .await;

        match fetched {
            Ok(messages) => {
                info!("Fetched {} messages from {}", messages.len(), key);
                for message in &messages {
                    self.scan_message(message, &mut out).await;
                }
            }
            Err(e) => {
                warn!("IMAP source {} failed: {}", key, e);
                out.errors.push(format!("imap {}: {}", key, e));
            }
        }
        out
    }

    async fn scan_message(&self, message: &EmailMessage, out: &mut LinkCollection) {
        out.emails_scanned += 1;
        let subject = message.subject_or_empty();
        match self
            .agent
            .find_link(message.html(), message.text(), subject)
            .await
        {
            Some(link) => {
                debug!("'{}' -> {}", subject, link);
                out.links.push(link);
            }
            None => {
                info!("No unsubscribe link in '{}'", subject);
                out.emails_without_link += 1;
            }
        }
    }
}

/// `path` itself, or the `.eml` files directly inside it (sorted by name).
fn eml_files(path: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !path.is_dir() {
        std::fs::metadata(path)?;
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("eml"))
                    .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Write results as a pretty JSON array.
pub fn write_results(path: &str, results: &[UnsubscribeResult]) -> Result<()> {
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(path, json)?;
    Ok(())
}
