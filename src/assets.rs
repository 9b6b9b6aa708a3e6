//! Release asset list loader
//!
//! Turns a JSON list of published image assets into remap entries. Each
//! asset gets a stable, human-typable key derived from its board,
//! distribution, kernel branch and variant, so that a request for
//! `nightly/rockpro64/Bullseye_current_minimal` lands on whatever file is
//! currently published for that combination.

use crate::error::{RedirectorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;
use url::Url;

/// Asset list document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetList {
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

/// One published file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseAsset {
    pub board_slug: String,
    pub file_url: String,
    pub file_updated: String,
    pub file_size: String,
    pub distro_release: String,
    pub kernel_branch: String,
    pub image_variant: String,
    #[serde(rename = "preinstalled_application")]
    pub preinstalled: String,
    pub promoted: String,
    #[serde(rename = "download_repository")]
    pub repository: String,
    #[serde(rename = "file_extension")]
    pub extension: String,
}

/// Extension markers that add a suffix to the key; first match wins
const EXTENSION_SUFFIXES: &[(&str, &str)] = &[
    ("boot-sms.img.xz", "-boot-sms"),
    ("boot-boe.img.xz", "-boot-boe"),
    ("boot-csot.img.xz", "-boot-csot"),
    ("rootfs.img.xz", "-rootfs"),
    ("img.qcow2.xz", "-qcow2"),
    ("boot.bin.xz", "-uboot-bin"),
];

/// Extensions of primary image archives, which also claim the bare key
const IMAGE_EXTENSIONS: &[&str] = &["img.xz", "img.qcow2.xz", "boot.bin.xz"];

/// Auxiliary file extensions shortened in the dotted key
const AUXILIARY_EXTENSIONS: &[(&str, &str)] = &[
    (".sha", "sha"),
    (".asc", "asc"),
    (".torrent", "torrent"),
];

/// Repository classifier whose assets live under `nightly/`
const NIGHTLY_REPOSITORY: &str = "os";

/// Keys derived for a single asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetKeys {
    /// Extension-less key, only for primary image archives
    pub bare: Option<String>,
    /// Key with a dotted extension suffix
    pub dotted: String,
}

impl ReleaseAsset {
    /// Derive the remap keys for this asset
    pub fn keys(&self) -> AssetKeys {
        let mut key = String::new();

        if self.repository == NIGHTLY_REPOSITORY {
            key.push_str("nightly/");
        }

        key.push_str(&self.board_slug);
        key.push('/');
        key.push_str(&title_case(&self.distro_release));
        key.push('_');
        key.push_str(&self.kernel_branch);
        key.push('_');
        key.push_str(&self.image_variant);

        if !self.preinstalled.is_empty() {
            key.push('-');
            key.push_str(&self.preinstalled);
        }

        if let Some((_, suffix)) = EXTENSION_SUFFIXES
            .iter()
            .find(|(marker, _)| self.extension.contains(marker))
        {
            key.push_str(suffix);
        }

        let bare = IMAGE_EXTENSIONS
            .iter()
            .any(|ext| self.extension.ends_with(ext))
            .then(|| key.clone());

        let extension = AUXILIARY_EXTENSIONS
            .iter()
            .find(|(ext, _)| self.extension.ends_with(ext))
            .map(|(_, short)| *short)
            .unwrap_or(self.extension.as_str());

        AssetKeys {
            bare,
            dotted: format!("{}.{}", key, extension),
        }
    }
}

/// Uppercase the first letter of each word and lowercase the rest
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut word_start = true;

    for c in s.chars() {
        if c.is_alphanumeric() {
            if word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            word_start = false;
        } else {
            out.push(c);
            word_start = true;
        }
    }

    out
}

/// Extract the path component of an asset URL
///
/// The redirect engine always attaches a mirror's own host, so scheme and
/// host are dropped. Relative references are kept as their path part.
pub fn url_path(raw: &str) -> std::result::Result<String, url::ParseError> {
    match Url::parse(raw) {
        Ok(url) => Ok(url.path().to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let end = raw.find(|c: char| c == '?' || c == '#').unwrap_or(raw.len());
            Ok(raw[..end].to_string())
        }
        Err(e) => Err(e),
    }
}

/// Build remap entries from a JSON asset list
///
/// # Returns
/// * `Ok((entries, skipped))` where `skipped` counts assets with unparsable URLs
/// * `Err(RemapParse)` if the payload is not a valid asset list
pub fn load_asset_list(bytes: &[u8]) -> Result<(BTreeMap<String, String>, usize)> {
    let list: AssetList = serde_json::from_slice(bytes)
        .map_err(|e| RedirectorError::RemapParse(format!("invalid asset list: {}", e)))?;

    let mut entries = BTreeMap::new();
    let mut skipped = 0;

    for asset in &list.assets {
        let path = match url_path(&asset.file_url) {
            Ok(path) => path,
            Err(e) => {
                warn!(
                    error = %e,
                    uri = %asset.file_url,
                    "Error parsing redirect url or path"
                );
                skipped += 1;
                continue;
            }
        };

        let keys = asset.keys();
        if let Some(bare) = keys.bare {
            entries.insert(bare, path.clone());
        }
        entries.insert(keys.dotted, path);
    }

    Ok((entries, skipped))
}
