use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Which remote descriptor a session plays.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    Playlist { id: String },
    Menu { id: String },
}

impl Target {
    pub fn id(&self) -> &str {
        match self {
            Target::Playlist { id } | Target::Menu { id } => id,
        }
    }

    /// API path segment for this target (`playlist/{id}` or `cardapio/{id}`).
    pub fn api_path(&self) -> String {
        match self {
            Target::Playlist { id } => format!("playlist/{id}"),
            Target::Menu { id } => format!("cardapio/{id}"),
        }
    }

    /// Synthetic cache key under which the last good descriptor is kept.
    pub fn descriptor_key(&self) -> String {
        match self {
            Target::Playlist { id } => format!("descriptor:playlist/{id}"),
            Target::Menu { id } => format!("descriptor:menu/{id}"),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Playlist { id } => write!(f, "playlist {id}"),
            Target::Menu { id } => write!(f, "menu {id}"),
        }
    }
}

/// Commands accepted from the host surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    Select { target: Target },
    Retry,
    Exit,
    Refresh,
    GetState,
}

/// Session state machine as seen by the host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle, // no descriptor selected
    Loading, // descriptor fetch or first population running
    Playing, // rotation timer armed
    Error,   // halted, waiting for retry or exit
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorKind {
    Playlist,
    Menu,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DescriptorSummary {
    pub kind: DescriptorKind,
    pub name: String,
    /// Playlist items or menu categories.
    pub len: usize,
    /// True when the descriptor came from the local cache instead of the API.
    #[serde(default)]
    pub offline: bool,
}

/// Where the rotation cursor currently points.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Position {
    Item {
        index: usize,
        len: usize,
    },
    /// A page of whole categories (`category_pairs` layout).
    Categories {
        start: usize,
        end: usize,
        len: usize,
    },
    /// A page of products inside one category (`product_pages` layout).
    Products {
        category: usize,
        page: usize,
        pages: usize,
    },
}

/// Where a renderer should load a media payload from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum MediaLocation {
    /// Served from the local cache.
    Cached {
        digest: String,
        path: std::path::PathBuf,
    },
    /// Caching failed; the renderer falls back to the live URL.
    Remote { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaView {
    pub file_name: String,
    pub file_extension: String,
    pub is_video: bool,
    pub source: MediaLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductView {
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub media: Option<MediaView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryView {
    pub name: String,
    pub products: Vec<ProductView>,
}

/// What is on screen right now.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentView {
    Media(MediaView),
    Html {
        markup: String,
    },
    MenuPage {
        title: String,
        description: Option<String>,
        categories: Vec<CategoryView>,
    },
    /// File item without a media reference.
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    /// Leaves that are still not cached.
    pub failed_count: usize,
    /// Recovery actions offered to the operator.
    pub actions: Vec<String>,
}

impl ErrorReport {
    pub fn new(kind: ErrorKind, message: impl Into<String>, failed_count: usize) -> Self {
        Self {
            kind,
            message: message.into(),
            failed_count,
            actions: vec!["retry".to_string(), "exit".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheSummary {
    pub cached: usize,
    pub failed: usize,
}

/// Full state of the daemon. `rev` increases on every change so the
/// renderer can poll cheaply.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DaemonState {
    #[serde(default)]
    pub rev: u64,
    pub status: PlaybackStatus,
    pub target: Option<Target>,
    pub descriptor: Option<DescriptorSummary>,
    pub position: Option<Position>,
    pub current: Option<ContentView>,
    pub error: Option<ErrorReport>,
    #[serde(default)]
    pub retrying: bool,
    #[serde(default)]
    pub cache: CacheSummary,
}
