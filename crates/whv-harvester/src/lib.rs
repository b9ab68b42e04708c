mod config;
mod crawler;
mod error;
mod extract;
mod fetch;
mod image;
mod limiter;
mod robots;
mod store;
mod validate;

pub use config::{ContentFilters, HarvesterConfig, StorageFormat};
pub use crawler::{harvest, FailureDetail, ImageTally, PageOutcome, RejectionDetail, RunOutcome};
pub use error::{FetchCause, FetchError, ImageReject, RejectReason, StoreError};
pub use extract::{extract, Extraction};
pub use fetch::{Fetched, RetryingFetcher};
pub use image::{ImageAsset, ImageDownloader, ImageFormat, ImageOutcome};
pub use limiter::RateLimiter;
pub use robots::RobotsGate;
pub use store::{RecordSink, RecordStore};
pub use validate::{validate, TextRecord};

pub use anyhow;
