use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::config::HarvesterConfig;
use crate::error::{FetchError, ImageReject, StoreError};
use crate::fetch::RetryingFetcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
}

impl ImageFormat {
    /// Magic-byte sniff; the transfer's Content-Type is not trusted.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(Self::Png)
        } else if bytes.starts_with(b"\xff\xd8\xff") {
            Some(Self::Jpeg)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(Self::Gif)
        } else if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
            Some(Self::Webp)
        } else {
            None
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Gif => "gif",
            Self::Webp => "webp",
        }
    }
}

/// A stored, verified image. Only payloads that passed verification become
/// assets; everything else is discarded before touching disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAsset {
    pub source_url: String,
    pub page_url: String,
    pub local_path: PathBuf,
    pub byte_size: u64,
    pub content_hash: String,
    pub format: ImageFormat,
}

/// Per-image terminal result. Verification rejects are permanent and never
/// retried; transfer failures already exhausted the fetcher's retries.
#[derive(Debug)]
pub enum ImageOutcome {
    Stored(ImageAsset),
    Rejected(ImageReject),
    Failed(FetchError),
}

/// Downloads image bytes through the shared fetcher, verifies them, and
/// persists verified payloads under `<output_dir>/images/` with a sidecar
/// manifest line per asset. Files are named by content hash, so identical
/// payloads land on the same path instead of colliding.
pub struct ImageDownloader {
    images_dir: PathBuf,
    max_bytes: u64,
    manifest: Mutex<BufWriter<File>>,
}

impl ImageDownloader {
    pub fn open(config: &HarvesterConfig) -> anyhow::Result<Self> {
        let images_dir = config.output_dir.join("images");
        fs::create_dir_all(&images_dir)?;
        let manifest = OpenOptions::new()
            .create(true)
            .append(true)
            .open(images_dir.join("manifest.jsonl"))?;
        Ok(Self {
            images_dir,
            max_bytes: config.max_image_bytes,
            manifest: Mutex::new(BufWriter::new(manifest)),
        })
    }

    /// Transfer, verify, persist. A sink error is fatal for the run, like
    /// any other storage failure; transfer and verification outcomes are
    /// per-image and merely accounted.
    pub async fn download_and_verify(
        &self,
        fetcher: &RetryingFetcher,
        image_url: &Url,
        page_url: &Url,
    ) -> Result<ImageOutcome, StoreError> {
        let fetched = match fetcher.fetch_url(image_url).await {
            Ok(fetched) => fetched,
            Err(e) => {
                log::warn!("image transfer failed: {e}");
                return Ok(ImageOutcome::Failed(e));
            }
        };

        match self.verify(&fetched.body) {
            Ok(format) => {
                let asset = self
                    .persist(&fetched.body, format, image_url, page_url)
                    .map_err(|source| StoreError {
                        sink: "images",
                        source_url: image_url.to_string(),
                        source,
                    })?;
                Ok(ImageOutcome::Stored(asset))
            }
            Err(reject) => {
                log::debug!("discarding {image_url}: {reject}");
                Ok(ImageOutcome::Rejected(reject))
            }
        }
    }

    fn verify(&self, bytes: &[u8]) -> Result<ImageFormat, ImageReject> {
        if bytes.is_empty() {
            return Err(ImageReject::Empty);
        }
        let format = ImageFormat::sniff(bytes).ok_or(ImageReject::UnknownSignature)?;
        if bytes.len() as u64 > self.max_bytes {
            return Err(ImageReject::Oversized);
        }
        Ok(format)
    }

    fn persist(
        &self,
        bytes: &[u8],
        format: ImageFormat,
        image_url: &Url,
        page_url: &Url,
    ) -> io::Result<ImageAsset> {
        let content_hash = hex::encode(Sha256::digest(bytes));
        let local_path = self
            .images_dir
            .join(format!("{content_hash}.{}", format.extension()));
        // Same hash means same bytes; rewriting would only churn the disk.
        if !local_path.exists() {
            fs::write(&local_path, bytes)?;
        }

        let asset = ImageAsset {
            source_url: image_url.to_string(),
            page_url: page_url.to_string(),
            local_path,
            byte_size: bytes.len() as u64,
            content_hash,
            format,
        };

        let mut manifest = self.manifest.lock().unwrap_or_else(|e| e.into_inner());
        serde_json::to_writer(&mut *manifest, &asset)?;
        manifest.write_all(b"\n")?;
        manifest.flush()?;
        Ok(asset)
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarvesterConfig;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\x0arest-of-file";

    fn downloader(max_bytes: u64) -> (tempfile::TempDir, ImageDownloader) {
        let dir = tempfile::tempdir().unwrap();
        let config = HarvesterConfig {
            output_dir: dir.path().to_path_buf(),
            max_image_bytes: max_bytes,
            ..Default::default()
        };
        let dl = ImageDownloader::open(&config).unwrap();
        (dir, dl)
    }

    #[test]
    fn sniffs_known_signatures() {
        assert_eq!(ImageFormat::sniff(PNG_MAGIC), Some(ImageFormat::Png));
        assert_eq!(
            ImageFormat::sniff(b"\xff\xd8\xff\xe0rest"),
            Some(ImageFormat::Jpeg)
        );
        assert_eq!(ImageFormat::sniff(b"GIF89a..."), Some(ImageFormat::Gif));
        assert_eq!(
            ImageFormat::sniff(b"RIFF\x00\x00\x00\x00WEBPVP8 "),
            Some(ImageFormat::Webp)
        );
        assert_eq!(ImageFormat::sniff(b"<html>not an image</html>"), None);
        assert_eq!(ImageFormat::sniff(b""), None);
    }

    #[test]
    fn verify_rejects_empty_payload() {
        let (_dir, dl) = downloader(1024);
        assert_eq!(dl.verify(b""), Err(ImageReject::Empty));
    }

    #[test]
    fn verify_rejects_unknown_signature() {
        let (_dir, dl) = downloader(1024);
        assert_eq!(
            dl.verify(b"definitely not an image"),
            Err(ImageReject::UnknownSignature)
        );
    }

    #[test]
    fn valid_signature_but_oversized_is_oversized_not_unknown() {
        let (_dir, dl) = downloader(8);
        assert_eq!(dl.verify(PNG_MAGIC), Err(ImageReject::Oversized));
    }

    #[test]
    fn persist_names_file_by_hash_and_appends_manifest() {
        let (dir, dl) = downloader(1024);
        let image_url = Url::parse("https://cdn.ex.test/a.png").unwrap();
        let page_url = Url::parse("https://ex.test/post").unwrap();

        let asset = dl
            .persist(PNG_MAGIC, ImageFormat::Png, &image_url, &page_url)
            .unwrap();
        assert_eq!(asset.content_hash, hex::encode(Sha256::digest(PNG_MAGIC)));
        assert!(asset.local_path.exists());
        assert_eq!(fs::read(&asset.local_path).unwrap(), PNG_MAGIC);

        let manifest =
            fs::read_to_string(dir.path().join("images").join("manifest.jsonl")).unwrap();
        let entry: ImageAsset = serde_json::from_str(manifest.lines().next().unwrap()).unwrap();
        assert_eq!(entry.page_url, "https://ex.test/post");
        assert_eq!(entry.byte_size, PNG_MAGIC.len() as u64);
    }
}
