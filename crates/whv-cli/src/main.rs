use std::fs::{self, File};
use std::path::PathBuf;
use std::time::Duration;
use std::{env, io};

use clap::{CommandFactory, Parser};
use clap_complete::{generate, Shell};
use tokio::runtime;
use url::Url;
use whv_harvester::{extract, harvest, validate, HarvesterConfig, RunOutcome, StorageFormat};

/// Web content harvester
#[derive(Debug, Parser)]
#[command(name = "whv", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: SubCommand,
}

#[derive(Debug, clap::Subcommand)]
pub enum SubCommand {
    #[command(name = "harvest")]
    Harvest(HarvestArgs),
    #[command(name = "probe")]
    Probe(ProbeArgs),
    #[command(hide = true)]
    Completion,
}

/// Fetch, extract, validate and store content for a set of seed URLs
#[derive(Debug, clap::Args)]
pub struct HarvestArgs {
    /// Seed URLs to harvest
    pub urls: Vec<String>,
    /// File with one seed URL per line (# comments and blanks ignored)
    #[arg(long, short)]
    pub seed_file: Option<PathBuf>,
    /// Optional default harvester yaml configuration file
    #[arg(env = "WHV_CONFIG", long)]
    pub config: Option<PathBuf>,
    /// Override the output directory
    #[arg(long, short)]
    pub output_dir: Option<PathBuf>,
    /// Override the number of concurrent workers
    #[arg(long)]
    pub max_workers: Option<usize>,
    /// Override the minimum delay between requests, in seconds
    #[arg(long)]
    pub rate_limit_delay: Option<f64>,
    /// Override the per-attempt request timeout, in seconds
    #[arg(long)]
    pub request_timeout: Option<u64>,
    /// Override the total number of fetch attempts per URL
    #[arg(long)]
    pub retry_attempts: Option<u32>,
    /// Override the base retry backoff, in seconds
    #[arg(long)]
    pub retry_backoff: Option<f64>,
    /// Replace the configured user agents (repeatable)
    #[arg(long)]
    pub user_agent: Vec<String>,
    /// Replace the configured storage formats (repeatable)
    #[arg(long, value_enum)]
    pub format: Vec<StorageFormat>,
    /// No SIGINT handling; an interrupt kills the run instead of draining it
    #[arg(long)]
    pub no_sigint: bool,
    /// When quiet no logs are outputted
    #[arg(long, short)]
    pub quiet: bool,
}

impl TryFrom<&HarvestArgs> for HarvesterConfig {
    type Error = anyhow::Error;

    fn try_from(args: &HarvestArgs) -> Result<Self, Self::Error> {
        let mut conf = if let Some(file) = args.config.as_ref().map(File::open) {
            serde_yaml::from_reader(file?)?
        } else {
            HarvesterConfig::default()
        };
        if let Some(output_dir) = &args.output_dir {
            conf.output_dir = output_dir.clone();
        }
        if let Some(max_workers) = args.max_workers {
            conf.max_workers = max_workers;
        }
        if let Some(rate_limit_delay) = args.rate_limit_delay {
            conf.rate_limit_delay_secs = rate_limit_delay;
        }
        if let Some(request_timeout) = args.request_timeout {
            conf.request_timeout_secs = request_timeout;
        }
        if let Some(retry_attempts) = args.retry_attempts {
            conf.retry_attempts = retry_attempts;
        }
        if let Some(retry_backoff) = args.retry_backoff {
            conf.retry_backoff_secs = retry_backoff;
        }
        if !args.user_agent.is_empty() {
            conf.user_agents = args.user_agent.clone();
        }
        if !args.format.is_empty() {
            conf.storage_formats = args.format.clone();
        }
        if args.no_sigint {
            conf.handle_sigint = false;
        }
        Ok(conf)
    }
}

pub fn run_harvest(args: HarvestArgs) -> anyhow::Result<()> {
    let conf: HarvesterConfig = (&args).try_into()?;
    conf.validate()?;

    let mut seeds = args.urls.clone();
    if let Some(seed_file) = &args.seed_file {
        seeds.extend(read_seed_file(seed_file)?);
    }
    if seeds.is_empty() {
        anyhow::bail!("no seed URLs given; pass URLs or --seed-file");
    }

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    let outcome = rt.block_on(harvest(&conf, seeds))?;
    print_summary(&outcome);
    Ok(())
}

fn read_seed_file(path: &PathBuf) -> anyhow::Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}

fn print_summary(outcome: &RunOutcome) {
    println!(
        "pages: {} stored, {} rejected, {} failed, {} skipped",
        outcome.stored, outcome.rejected, outcome.failed, outcome.skipped
    );
    println!(
        "images: {} stored, {} rejected, {} failed",
        outcome.images.stored, outcome.images.rejected, outcome.images.failed
    );
    if !outcome.rejections.is_empty() {
        println!("rejected:");
        for r in &outcome.rejections {
            println!("  {}: {}", r.url, r.reason);
        }
    }
    if !outcome.failures.is_empty() {
        println!("failed:");
        for f in &outcome.failures {
            println!("  {}: {} ({} attempts)", f.url, f.cause, f.attempts);
        }
    }
}

/// Fetch a single page and print extraction and validation results
#[derive(Debug, clap::Args)]
pub struct ProbeArgs {
    /// The page to probe
    pub url: String,
    /// Optional default harvester yaml configuration file
    #[arg(env = "WHV_CONFIG", long)]
    pub config: Option<PathBuf>,
    /// Custom user agent for the request
    #[arg(long)]
    pub ua: Option<String>,
}

pub fn run_probe(args: ProbeArgs) -> anyhow::Result<()> {
    let conf: HarvesterConfig = if let Some(file) = args.config.as_ref().map(File::open) {
        serde_yaml::from_reader(file?)?
    } else {
        HarvesterConfig::default()
    };

    let url = Url::parse(&args.url)?;
    let ua = args
        .ua
        .or_else(|| conf.user_agents.first().cloned())
        .unwrap_or_else(|| String::from("whvbot/0.1"));
    let client = reqwest::blocking::ClientBuilder::new()
        .user_agent(ua)
        .timeout(Duration::from_secs(conf.request_timeout_secs))
        .build()?;
    let page = client.get(url.as_str()).send()?.error_for_status()?.text()?;

    let extraction = extract(&page, &url);
    println!("url: {url}");
    match validate(url.as_str(), &extraction.text, &conf.content_filters) {
        Ok(record) => println!(
            "verdict: accepted (language {}, {} chars)",
            record.language(),
            record.length()
        ),
        Err(reason) => println!("verdict: rejected ({reason})"),
    }
    println!("images: {}", extraction.image_urls.len());
    for image_url in &extraction.image_urls {
        println!("  {image_url}");
    }
    println!("---\n{}", extraction.text);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.cmd {
        SubCommand::Harvest(args) => {
            if !args.quiet {
                if env::var("RUST_LOG").is_err() {
                    env::set_var("RUST_LOG", "whv_harvester=info,whv_cli=info");
                }
                env_logger::init();
            }
            run_harvest(args)
        }
        SubCommand::Probe(args) => {
            if env::var("RUST_LOG").is_err() {
                env::set_var("RUST_LOG", "whv_harvester=warn");
            }
            env_logger::init();
            run_probe(args)
        }
        SubCommand::Completion => {
            generate(Shell::Bash, &mut Args::command(), "whv", &mut io::stdout());
            Ok(())
        }
    }
}
