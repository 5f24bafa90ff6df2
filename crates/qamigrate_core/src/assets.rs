use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::github::DiscussionsApi;
use crate::transform::{extract_image_refs, image_filename, rewrite_image_refs};

/// Repository folder that holds re-hosted images.
pub const ASSET_DIR: &str = "discussion_images";

/// Copies locally cached images into the remote asset store, at most once per filename.
#[derive(Debug, Default)]
pub struct ImageRehoster {
    local: BTreeMap<String, PathBuf>,
    hosted: BTreeMap<String, String>,
    uploaded: usize,
}

impl ImageRehoster {
    /// Index every file under `folder` by filename. A missing folder yields an empty cache.
    pub fn index(folder: &Path) -> Result<Self> {
        let mut local = BTreeMap::new();
        if !folder.exists() {
            warn!("image folder {} does not exist; images will not be re-hosted", folder.display());
            return Ok(Self::default());
        }
        for entry in WalkDir::new(folder).follow_links(false) {
            let entry = entry.with_context(|| format!("failed to walk {}", folder.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(filename) = entry.file_name().to_str() else {
                continue;
            };
            local
                .entry(filename.to_string())
                .or_insert_with(|| entry.path().to_path_buf());
        }
        info!("indexed {} cached images in {}", local.len(), folder.display());
        Ok(Self {
            local,
            ..Self::default()
        })
    }

    /// Upload referenced images not yet hosted and point the text at their new URLs.
    pub fn rehost<A: DiscussionsApi>(&mut self, api: &mut A, text: &str) -> Result<String> {
        let mut url_map = BTreeMap::new();
        for url in extract_image_refs(text) {
            let filename = image_filename(&url);
            if filename.is_empty() {
                continue;
            }
            if let Some(remote) = self.hosted.get(&filename) {
                url_map.insert(url, remote.clone());
                continue;
            }
            let Some(local_path) = self.local.get(&filename).cloned() else {
                warn!("local image not found for URL {url}, skipping upload");
                continue;
            };
            let remote_path = format!("{ASSET_DIR}/{filename}");
            if api.asset_exists(&remote_path)? {
                debug!("image {remote_path} already hosted");
            } else {
                let contents = fs::read(&local_path)
                    .with_context(|| format!("failed to read {}", local_path.display()))?;
                api.upload_asset(&remote_path, &contents)
                    .with_context(|| format!("failed to upload {remote_path}"))?;
                self.uploaded += 1;
                info!("uploaded image {remote_path}");
            }
            let remote = api.asset_url(&remote_path);
            self.hosted.insert(filename, remote.clone());
            url_map.insert(url, remote);
        }
        Ok(rewrite_image_refs(text, &url_map))
    }

    pub fn uploaded(&self) -> usize {
        self.uploaded
    }

    pub fn cached(&self) -> usize {
        self.local.len()
    }
}
