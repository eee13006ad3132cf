//! Typed content model for playlists and menus.
//!
//! The structs accept both the canonical field names and the names used by
//! the upstream API (`contentType`, `nome_categoria`, `produtos`, `preco`, ...),
//! so a descriptor written back to the cache deserializes with the same code.
//!
//! Descriptors are immutable once fetched. Cache status is tracked next to
//! them, keyed by [`LeafId`].

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

use crate::protocol::{DescriptorKind, DescriptorSummary};

/// Used when an item carries no usable duration.
pub const DEFAULT_ITEM_DURATION: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Descriptor {
    Playlist(Playlist),
    Menu(Menu),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Playlist {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default, alias = "contents")]
    pub items: Vec<ContentItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentItem {
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub id: Option<String>,
    #[serde(rename = "contentType", alias = "content_type", default)]
    pub content_type: String,
    #[serde(default, deserialize_with = "lenient_number")]
    pub duration: Option<f64>,
    #[serde(default)]
    pub media: Option<Media>,
    #[serde(default)]
    pub html: Option<HtmlBlock>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Media {
    #[serde(default)]
    pub file_url: String,
    #[serde(default)]
    pub file_extension: String,
    #[serde(default)]
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HtmlBlock {
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub id: Option<String>,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Menu {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    #[serde(default, alias = "nome_categoria")]
    pub name: String,
    #[serde(default, alias = "produtos")]
    pub products: Vec<Product>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    #[serde(default, alias = "nome")]
    pub name: String,
    #[serde(default, alias = "descricao")]
    pub description: Option<String>,
    #[serde(default, alias = "preco", deserialize_with = "lenient_price")]
    pub price: f64,
    #[serde(default)]
    pub media: Option<Media>,
}

/// Borrowed view of what a playlist item is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ItemKind<'a> {
    File(Option<&'a Media>),
    Html(Option<&'a HtmlBlock>),
    Unsupported(&'a str),
}

impl ContentItem {
    pub fn kind(&self) -> ItemKind<'_> {
        match self.content_type.as_str() {
            "file" => ItemKind::File(self.media.as_ref().filter(|m| m.is_fetchable())),
            "html" => ItemKind::Html(self.html.as_ref()),
            other => ItemKind::Unsupported(other),
        }
    }

    /// The item duration, or `default` when absent, non-positive or too
    /// large to represent.
    pub fn effective_duration(&self, default: Duration) -> Duration {
        match self.duration {
            Some(secs) if secs > 0.0 => Duration::try_from_secs_f64(secs).unwrap_or(default),
            _ => default,
        }
    }
}

impl Media {
    pub fn is_fetchable(&self) -> bool {
        !self.file_url.trim().is_empty()
    }

    pub fn is_video(&self) -> bool {
        matches!(
            self.file_extension.trim_start_matches('.').to_ascii_lowercase().as_str(),
            "mp4" | "webm" | "mov" | "m4v"
        )
    }
}

impl HtmlBlock {
    /// Stable cache key for inline markup.
    pub fn cache_key(&self) -> String {
        match self.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => format!("html-{id}"),
            _ => format!("html-sha-{}", hex::encode(Sha256::digest(self.content.as_bytes()))),
        }
    }
}

/// Joins a descriptor `base_url` with a media `file_url`.
///
/// Absolute file URLs are returned unchanged.
pub fn media_url(base_url: &str, file_url: &str) -> String {
    if file_url.starts_with("http://") || file_url.starts_with("https://") {
        return file_url.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        file_url.trim_start_matches('/')
    )
}

// ── Leaves ────────────────────────────────────────────────────────────────────

/// Identity of a cacheable unit inside a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LeafId {
    PlaylistItem(usize),
    Product { category: usize, product: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum LeafPayload {
    /// Fetched over the network from a fully-qualified URL.
    Remote { url: String },
    /// Inline markup stored under a synthetic key, never fetched.
    Inline { key: String, markup: String },
}

impl LeafPayload {
    pub fn cache_key(&self) -> &str {
        match self {
            LeafPayload::Remote { url } => url,
            LeafPayload::Inline { key, .. } => key,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub id: LeafId,
    pub payload: LeafPayload,
}

impl Descriptor {
    pub fn kind(&self) -> DescriptorKind {
        match self {
            Descriptor::Playlist(_) => DescriptorKind::Playlist,
            Descriptor::Menu(_) => DescriptorKind::Menu,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Descriptor::Playlist(p) => &p.name,
            Descriptor::Menu(m) => &m.name,
        }
    }

    pub fn base_url(&self) -> &str {
        match self {
            Descriptor::Playlist(p) => &p.base_url,
            Descriptor::Menu(m) => &m.base_url,
        }
    }

    /// Number of rotation units: playlist items or menu categories.
    pub fn len(&self) -> usize {
        match self {
            Descriptor::Playlist(p) => p.items.len(),
            Descriptor::Menu(m) => m.categories.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self, offline: bool) -> DescriptorSummary {
        DescriptorSummary {
            kind: self.kind(),
            name: self.name().to_string(),
            len: self.len(),
            offline,
        }
    }

    /// Every cacheable leaf, in descriptor order.
    pub fn leaves(&self) -> Vec<Leaf> {
        let base_url = self.base_url();
        match self {
            Descriptor::Playlist(p) => p
                .items
                .iter()
                .enumerate()
                .filter_map(|(idx, item)| {
                    let payload = match item.kind() {
                        ItemKind::File(Some(media)) => LeafPayload::Remote {
                            url: media_url(base_url, &media.file_url),
                        },
                        ItemKind::Html(Some(html)) => LeafPayload::Inline {
                            key: html.cache_key(),
                            markup: html.content.clone(),
                        },
                        _ => return None,
                    };
                    Some(Leaf {
                        id: LeafId::PlaylistItem(idx),
                        payload,
                    })
                })
                .collect(),
            Descriptor::Menu(m) => m
                .categories
                .iter()
                .enumerate()
                .flat_map(|(c, category)| {
                    category
                        .products
                        .iter()
                        .enumerate()
                        .filter_map(move |(p, product)| {
                            let media = product.media.as_ref().filter(|m| m.is_fetchable())?;
                            Some(Leaf {
                                id: LeafId::Product {
                                    category: c,
                                    product: p,
                                },
                                payload: LeafPayload::Remote {
                                    url: media_url(base_url, &media.file_url),
                                },
                            })
                        })
                })
                .collect(),
        }
    }
}

// ── Lenient field decoding ────────────────────────────────────────────────────

fn number_from_value(value: &serde_json::Value) -> Option<f64> {
    let n = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(number_from_value(&value))
}

/// Prices arrive as numbers, numeric strings, or garbage; garbage becomes 0.
fn lenient_price<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(number_from_value(&value).unwrap_or(0.0))
}

fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_opt_string(deserializer)?.unwrap_or_default())
}
