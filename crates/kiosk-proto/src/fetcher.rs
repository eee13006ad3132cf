//! Descriptor and media fetching over HTTP.
//!
//! Descriptor responses look like `{"data": [row]}` where `row.content` is a
//! JSON-encoded string holding the playlist items or menu categories. Older
//! playlist endpoints return the playlist object directly with a structured
//! `contents` array; both shapes decode to the same [`Descriptor`].

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::MediaCache;
use crate::content::{Category, ContentItem, Descriptor, Menu, Playlist};
use crate::error::{EngineError, EngineResult};
use crate::protocol::Target;

/// Anything that can produce the bytes behind a media URL.
pub trait MediaSource: Send + Sync {
    fn fetch_media(&self, url: &str) -> impl Future<Output = EngineResult<Vec<u8>>> + Send;
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    origin: String,
    token: String,
    descriptor_timeout: Duration,
    media_timeout: Duration,
}

/// A decoded descriptor plus whether it came from the local store.
#[derive(Debug, Clone)]
pub struct LoadedDescriptor {
    pub descriptor: Descriptor,
    pub offline: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Row {
    #[serde(default)]
    id: Value,
    #[serde(default, alias = "nome")]
    name: Option<String>,
    #[serde(default, alias = "descricao")]
    description: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    content: Value,
    #[serde(default)]
    contents: Value,
}

impl ApiClient {
    pub fn new(origin: impl Into<String>, token: impl Into<String>) -> EngineResult<Self> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self {
            client,
            origin: origin.into().trim_end_matches('/').to_string(),
            token: token.into(),
            descriptor_timeout: Duration::from_secs(15),
            media_timeout: Duration::from_secs(30),
        })
    }

    pub fn with_timeouts(mut self, descriptor: Duration, media: Duration) -> Self {
        self.descriptor_timeout = descriptor;
        self.media_timeout = media;
        self
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Fetches and decodes the descriptor for `target`. No retries.
    pub async fn fetch_descriptor(&self, target: &Target) -> EngineResult<Descriptor> {
        let url = format!("{}/{}", self.origin, target.api_path());
        debug!("ApiClient: GET {}", url);

        let mut request = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.descriptor_timeout);
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            let reason = serde_json::from_slice::<ErrorBody>(&body)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or_else(|| format!("HTTP {status}"));
            warn!("ApiClient: {} returned {}: {}", url, status, reason);
            return Err(EngineError::transport(reason));
        }

        let body: Value = serde_json::from_slice(&response.bytes().await?)?;
        decode_descriptor(target, body)
    }

    /// Fetches `target`, keeping a copy in `cache`. When the API cannot be
    /// reached and `fallback` is set, the last stored copy is used instead.
    pub async fn load(
        &self,
        target: &Target,
        cache: &MediaCache,
        fallback: bool,
    ) -> EngineResult<LoadedDescriptor> {
        match self.fetch_descriptor(target).await {
            Ok(descriptor) => {
                if let Err(e) = store_descriptor(cache, target, &descriptor).await {
                    warn!("ApiClient: could not store {} for offline use: {}", target, e);
                }
                Ok(LoadedDescriptor {
                    descriptor,
                    offline: false,
                })
            }
            Err(EngineError::Transport { reason }) if fallback => {
                match stored_descriptor(cache, target).await {
                    Some(descriptor) => {
                        warn!("ApiClient: {} unreachable ({}), using stored copy", target, reason);
                        Ok(LoadedDescriptor {
                            descriptor,
                            offline: true,
                        })
                    }
                    None => Err(EngineError::Transport { reason }),
                }
            }
            Err(e) => Err(e),
        }
    }
}

impl MediaSource for ApiClient {
    async fn fetch_media(&self, url: &str) -> EngineResult<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .timeout(self.media_timeout)
            .send()
            .await
            .map_err(|e| EngineError::media_fetch(url, e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::media_fetch(url, format!("HTTP {status}")));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| EngineError::media_fetch(url, e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Decodes a descriptor response body for `target`.
pub fn decode_descriptor(target: &Target, body: Value) -> EngineResult<Descriptor> {
    let row = match body {
        Value::Object(mut map) if map.contains_key("data") => match map.remove("data") {
            Some(Value::Array(rows)) => rows
                .into_iter()
                .next()
                .ok_or_else(|| EngineError::EmptyContent {
                    target: target.clone(),
                })?,
            Some(Value::Object(row)) => Value::Object(row),
            Some(Value::Null) | None => {
                return Err(EngineError::EmptyContent {
                    target: target.clone(),
                })
            }
            Some(other) => {
                return Err(EngineError::Parse(format!("unexpected data field: {other}")))
            }
        },
        other => other,
    };

    let row: Row = serde_json::from_value(row)?;
    let structured = match (row.content, row.contents) {
        (Value::String(encoded), _) => serde_json::from_str::<Value>(&encoded)?,
        (Value::Null, contents) => contents,
        (content, _) => content,
    };

    let id = match row.id {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => target.id().to_string(),
    };
    let name = row.name.unwrap_or_default();
    let base_url = row.base_url.unwrap_or_default();

    let descriptor = match target {
        Target::Playlist { .. } => Descriptor::Playlist(Playlist {
            id,
            name,
            base_url,
            items: decode_list::<ContentItem>(structured, "contents")?,
        }),
        Target::Menu { .. } => Descriptor::Menu(Menu {
            id,
            name,
            description: row.description,
            base_url,
            categories: decode_list::<Category>(structured, "categories")?,
        }),
    };
    info!(
        "ApiClient: decoded {} ({} entries)",
        target,
        descriptor.len()
    );
    Ok(descriptor)
}

/// Accepts a bare array or an object wrapping one under `field`.
fn decode_list<T: serde::de::DeserializeOwned>(value: Value, field: &str) -> EngineResult<Vec<T>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(_) => Ok(serde_json::from_value(value)?),
        Value::Object(mut map) => match map.remove(field) {
            Some(list @ Value::Array(_)) => Ok(serde_json::from_value(list)?),
            _ => Err(EngineError::Parse(format!("content has no `{field}` list"))),
        },
        other => Err(EngineError::Parse(format!("content is not a list: {other}"))),
    }
}

pub async fn store_descriptor(
    cache: &MediaCache,
    target: &Target,
    descriptor: &Descriptor,
) -> EngineResult<()> {
    let bytes = serde_json::to_vec(descriptor)?;
    cache.put(&target.descriptor_key(), &bytes).await?;
    Ok(())
}

pub async fn stored_descriptor(cache: &MediaCache, target: &Target) -> Option<Descriptor> {
    let handle = cache.lookup(&target.descriptor_key()).await?;
    let bytes = cache.read(&handle).await.ok()?;
    match serde_json::from_slice::<Descriptor>(&bytes) {
        Ok(d) if d.kind() == target_kind(target) => Some(d),
        Ok(_) => None,
        Err(e) => {
            warn!("ApiClient: stored descriptor for {} is unreadable: {}", target, e);
            None
        }
    }
}

fn target_kind(target: &Target) -> crate::protocol::DescriptorKind {
    match target {
        Target::Playlist { .. } => crate::protocol::DescriptorKind::Playlist,
        Target::Menu { .. } => crate::protocol::DescriptorKind::Menu,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ItemKind;
    use serde_json::json;

    fn playlist() -> Target {
        Target::Playlist { id: "3".into() }
    }

    fn menu() -> Target {
        Target::Menu { id: "8".into() }
    }

    #[test]
    fn decodes_encoded_menu_content() {
        let content = json!([
            {"nome_categoria": "Lanches", "produtos": [
                {"nome": "X", "preco": "12,90", "media": {"file_url": "x.jpg"}}
            ]},
            {"nome_categoria": "Bebidas", "produtos": []}
        ])
        .to_string();
        let body = json!({"data": [
            {"id": 8, "name": "Cardapio", "base_url": "http://cdn", "content": content}
        ]});
        let Descriptor::Menu(menu) = decode_descriptor(&menu(), body).unwrap() else {
            panic!("expected a menu");
        };
        assert_eq!(menu.id, "8");
        assert_eq!(menu.categories.len(), 2);
        assert_eq!(menu.categories[0].products[0].price, 12.9);
    }

    #[test]
    fn decodes_bare_playlist_with_contents() {
        let body = json!({
            "id": 3,
            "base_url": "http://cdn",
            "contents": [
                {"contentType": "file", "duration": 5, "media":
                    {"file_url": "a.png", "file_extension": "png", "file_name": "a"}},
                {"contentType": "html", "html": {"id": 1, "content": "<h1>hi</h1>"}}
            ]
        });
        let Descriptor::Playlist(p) = decode_descriptor(&playlist(), body).unwrap() else {
            panic!("expected a playlist");
        };
        assert_eq!(p.items.len(), 2);
        assert!(matches!(p.items[1].kind(), ItemKind::Html(Some(_))));
    }

    #[test]
    fn empty_data_is_empty_content() {
        let err = decode_descriptor(&menu(), json!({"data": []})).unwrap_err();
        assert!(matches!(err, EngineError::EmptyContent { .. }));
    }

    #[test]
    fn malformed_content_string_is_parse_error() {
        let body = json!({"data": [{"content": "{not json"}]});
        let err = decode_descriptor(&menu(), body).unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
    }

    #[tokio::test]
    async fn stored_descriptor_matches_target_kind() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MediaCache::open(dir.path(), "media").await.unwrap();
        let descriptor = decode_descriptor(&playlist(), json!({"contents": []})).unwrap();
        store_descriptor(&cache, &playlist(), &descriptor).await.unwrap();
        assert_eq!(stored_descriptor(&cache, &playlist()).await, Some(descriptor));
        assert!(stored_descriptor(&cache, &menu()).await.is_none());
    }
}
