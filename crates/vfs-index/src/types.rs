//! Core value types shared by the build pipeline, the searchers and the
//! query boundary.
//!
//! The service layer serializes `SearchResult` and `PageResp` directly;
//! everything else stays internal to the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One object (file or directory) of the virtual filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl Entry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
            size,
            modified: None,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
            size: 0,
            modified: None,
        }
    }
}

/// A discovered entry together with the virtual path of its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedItem {
    pub entry: Entry,
    pub parent: String,
}

impl QueuedItem {
    pub fn new(entry: Entry, parent: impl Into<String>) -> Self {
        Self {
            entry,
            parent: parent.into(),
        }
    }

    /// Full virtual path of the entry.
    pub fn path(&self) -> String {
        crate::paths::join(&self.parent, &self.entry.name)
    }

    pub fn to_node(&self) -> SearchNode {
        SearchNode {
            parent: self.parent.clone(),
            name: self.entry.name.clone(),
            is_dir: self.entry.is_dir,
            size: self.entry.size,
        }
    }
}

/// The record a searcher stores for every indexed object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchNode {
    pub parent: String,
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

impl SearchNode {
    pub fn path(&self) -> String {
        crate::paths::join(&self.parent, &self.name)
    }
}

/// Object type classification reported with every search result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjType {
    Unknown = 0,
    Folder = 1,
    Video = 2,
    Audio = 3,
    Text = 4,
    Image = 5,
}

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "rmvb", "webm", "flv", "m3u8", "wmv", "ts", "m4v",
];
const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "m4a", "wav", "opus", "wma", "aac", "ape",
];
const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "htm", "html", "xml", "java", "properties", "sql", "js", "md", "json", "conf", "ini",
    "vue", "php", "py", "bat", "gitignore", "yml", "go", "sh", "c", "cpp", "h", "hpp", "tsx",
    "vtt", "srt", "ass", "rs", "lrc", "toml",
];
const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "tiff", "jpeg", "png", "gif", "bmp", "svg", "ico", "swf", "webp", "avif", "heic",
];

impl ObjType {
    /// Classifies an object by its extension.
    pub fn classify(name: &str, is_dir: bool) -> Self {
        if is_dir {
            return Self::Folder;
        }
        let Some(ext) = crate::paths::extension(name) else {
            return Self::Unknown;
        };
        let ext = ext.as_str();
        if VIDEO_EXTENSIONS.contains(&ext) {
            Self::Video
        } else if AUDIO_EXTENSIONS.contains(&ext) {
            Self::Audio
        } else if TEXT_EXTENSIONS.contains(&ext) {
            Self::Text
        } else if IMAGE_EXTENSIONS.contains(&ext) {
            Self::Image
        } else {
            Self::Unknown
        }
    }
}

impl Serialize for ObjType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

/// A single search hit as returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub name: String,
    pub parent: String,
    pub is_dir: bool,
    pub size: u64,
    #[serde(rename = "type")]
    pub obj_type: ObjType,
}

impl From<SearchNode> for SearchResult {
    fn from(node: SearchNode) -> Self {
        let obj_type = ObjType::classify(&node.name, node.is_dir);
        Self {
            name: node.name,
            parent: node.parent,
            is_dir: node.is_dir,
            size: node.size,
            obj_type,
        }
    }
}

/// A page of results plus the total the caller should paginate against.
#[derive(Debug, Clone, Serialize)]
pub struct PageResp<T> {
    pub content: Vec<T>,
    pub total: u64,
}
