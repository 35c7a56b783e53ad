use clap::Parser;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "unsub-runner")]
#[command(about = "Unsubscribe from every newsletter a config points at")]
#[command(version)]
struct Cli {
    /// Config file to run
    config: PathBuf,

    /// Run browsers headless (overrides config)
    #[arg(long)]
    headless: bool,

    /// Set a parameter (can be used multiple times)
    #[arg(short = 'P', long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Validate config without running
    #[arg(long)]
    check: bool,

    /// Print the report as JSON instead of a summary
    #[arg(long)]
    json: bool,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> unsub_runner::Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let params = unsub_runner::Params::from_args(&cli.params)?;
    let mut config = unsub_runner::Config::load_with_params(&cli.config, &params)?;

    if cli.check {
        println!("Config valid: {}", config.name);
        println!("  User email: {}", config.user_email);
        println!("  Sources: {}", config.sources.len());
        for source in &config.sources {
            let line = source.to_string();
            println!("    - {}", unsub_runner::redact(&line, &params, &config.params));
        }
        if !config.params.is_empty() {
            println!("  Parameters: {}", config.params.len());
            let mut names: Vec<_> = config.params.iter().collect();
            names.sort_by(|a, b| a.0.cmp(b.0));
            for (name, def) in names {
                println!("    - {}", def.describe(name, &params));
            }
        }
        println!("  Max iterations: {}", config.agent.max_iterations);
        if let Some(ref output) = config.output {
            println!("  Output: {}", output);
        }
        return Ok(());
    }

    if cli.headless {
        config.agent.browser.headless = true;
    }

    // eml paths are relative to the config file
    let base_path = cli
        .config
        .parent()
        .unwrap_or_else(|| std::path::Path::new("."));

    let runner = unsub_runner::Runner::from_config(&config)?.with_base_path(base_path);
    let report = runner.run(&config).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Running: {}", config.name);
        println!();
        for r in &report.results {
            let mark = if r.success { "✓" } else { "✗" };
            println!("{} {}", mark, r.url);
            println!("  {}", r.message);
        }
        for e in &report.source_errors {
            println!("✗ source: {}", e);
        }
        println!();
        println!("  Emails scanned: {}", report.emails_scanned);
        if report.emails_without_link > 0 {
            println!("  Without a link: {}", report.emails_without_link);
        }
        println!("  Links: {}", report.results.len());
        println!("  Succeeded: {}", report.succeeded());
        println!("  Failed: {}", report.failed());
        println!("  Duration: {}ms", report.duration_ms);
    }

    if !report.success() {
        std::process::exit(1);
    }

    Ok(())
}
