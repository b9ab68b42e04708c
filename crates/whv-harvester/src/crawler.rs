use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{future, stream, StreamExt};
use url::Url;

use crate::config::HarvesterConfig;
use crate::error::{FetchCause, FetchError, RejectReason, StoreError};
use crate::extract;
use crate::fetch::RetryingFetcher;
use crate::image::{ImageDownloader, ImageOutcome};
use crate::limiter::RateLimiter;
use crate::robots::RobotsGate;
use crate::store::RecordStore;
use crate::validate;

/// Terminal result for one seed URL.
#[derive(Debug)]
pub enum PageOutcome {
    Stored { url: String, images: ImageTally },
    Rejected { url: String, reason: RejectReason },
    Failed { url: String, error: FetchError },
    /// Shutdown was observed before this URL started.
    Skipped { url: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageTally {
    pub stored: usize,
    pub rejected: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct FailureDetail {
    pub url: String,
    pub cause: String,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct RejectionDetail {
    pub url: String,
    pub reason: RejectReason,
}

/// Aggregated result of one run over a seed set.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub stored: usize,
    pub rejected: usize,
    pub failed: usize,
    pub skipped: usize,
    pub images: ImageTally,
    pub failures: Vec<FailureDetail>,
    pub rejections: Vec<RejectionDetail>,
}

impl RunOutcome {
    fn absorb(&mut self, outcome: PageOutcome) {
        match outcome {
            PageOutcome::Stored { url, images } => {
                log::info!("stored {url} ({} images)", images.stored);
                self.stored += 1;
                self.images.stored += images.stored;
                self.images.rejected += images.rejected;
                self.images.failed += images.failed;
            }
            PageOutcome::Rejected { url, reason } => {
                log::info!("rejected {url}: {reason}");
                self.rejected += 1;
                self.rejections.push(RejectionDetail { url, reason });
            }
            PageOutcome::Failed { url, error } => {
                log::warn!("failed {url}: {error}");
                self.failures.push(FailureDetail {
                    url,
                    cause: error.cause().to_string(),
                    attempts: error.attempts(),
                });
                self.failed += 1;
            }
            PageOutcome::Skipped { url } => {
                log::debug!("skipped {url}: shutting down");
                self.skipped += 1;
            }
        }
    }
}

struct HarvestCtx {
    config: HarvesterConfig,
    fetcher: RetryingFetcher,
    robots: RobotsGate,
    store: RecordStore,
    images: ImageDownloader,
    stop: AtomicBool,
}

/// Runs the full pipeline over `seeds` and reports the aggregate outcome.
///
/// A bounded pool of `max_workers` concurrent workers pulls from the seed
/// stream; each worker runs Fetch→Extract→Validate→Store→Images for its URL
/// in strict sequence, then takes the next. Per-URL failures and rejections
/// only affect their own URL; a storage failure aborts the whole run.
pub async fn harvest(config: &HarvesterConfig, seeds: Vec<String>) -> anyhow::Result<RunOutcome> {
    config.validate()?;

    let run_id = Utc::now().format("%Y%m%dT%H%M%S").to_string();
    let limiter = RateLimiter::new(Duration::from_secs_f64(config.rate_limit_delay_secs));
    let ctx = Arc::new(HarvestCtx {
        fetcher: RetryingFetcher::new(config, limiter)?,
        robots: RobotsGate::new(
            &config.user_agents[0],
            Duration::from_secs(config.request_timeout_secs),
        )?,
        store: RecordStore::open(config, &run_id)?,
        images: ImageDownloader::open(config)?,
        stop: AtomicBool::new(false),
        config: config.clone(),
    });

    if config.handle_sigint {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("interrupt received, finishing in-flight work");
                ctx.stop.store(true, Ordering::SeqCst);
            }
        });
    }

    log::info!(
        "harvesting {} seed urls with {} workers",
        seeds.len(),
        config.max_workers
    );

    let mut fatal = Ok::<(), StoreError>(());
    let outcomes: Vec<PageOutcome> = stream::iter(seeds.into_iter().map(|url| {
        let ctx = ctx.clone();
        async move { process_page(&ctx, url).await }
    }))
    .buffer_unordered(config.max_workers)
    .scan(&mut fatal, until_err)
    .collect()
    .await;

    let mut run = RunOutcome::default();
    for outcome in outcomes {
        run.absorb(outcome);
    }

    if let Err(e) = fatal {
        log::error!("{e}");
        return Err(e.into());
    }
    Ok(run)
}

/// The per-URL pipeline. Stages run strictly in sequence; the shutdown flag
/// is checked at stage boundaries so an in-flight stage always finishes.
async fn process_page(ctx: &HarvestCtx, url: String) -> Result<PageOutcome, StoreError> {
    if ctx.stop.load(Ordering::SeqCst) {
        return Ok(PageOutcome::Skipped { url });
    }

    let parsed = match Url::parse(&url) {
        Ok(parsed) => parsed,
        Err(e) => {
            return Ok(PageOutcome::Failed {
                error: FetchError::Permanent {
                    url: url.clone(),
                    attempts: 0,
                    cause: FetchCause::MalformedUrl(e.to_string()),
                },
                url,
            });
        }
    };

    if !ctx.robots.allowed(&parsed).await {
        return Ok(PageOutcome::Rejected {
            url,
            reason: RejectReason::RejectedByPolicy,
        });
    }

    let fetched = match ctx.fetcher.fetch_url(&parsed).await {
        Ok(fetched) => fetched,
        Err(error) => return Ok(PageOutcome::Failed { url, error }),
    };

    let extraction = extract::extract(&fetched.text(), &parsed);

    let record = match validate::validate(&url, &extraction.text, &ctx.config.content_filters) {
        Ok(record) => record,
        Err(reason) => return Ok(PageOutcome::Rejected { url, reason }),
    };

    ctx.store.append(&record)?;

    let mut images = ImageTally::default();
    for image_url in &extraction.image_urls {
        if ctx.stop.load(Ordering::SeqCst) {
            break;
        }
        match ctx
            .images
            .download_and_verify(&ctx.fetcher, image_url, &parsed)
            .await?
        {
            ImageOutcome::Stored(_) => images.stored += 1,
            ImageOutcome::Rejected(_) => images.rejected += 1,
            ImageOutcome::Failed(_) => images.failed += 1,
        }
    }

    Ok(PageOutcome::Stored { url, images })
}

fn until_err<T, E>(
    err: &mut &mut Result<(), E>,
    item: Result<T, E>,
) -> impl Future<Output = Option<T>> {
    match item {
        Ok(item) => future::ready(Some(item)),
        Err(e) => {
            **err = Err(e);
            future::ready(None)
        }
    }
}
