use std::fmt;

use serde::Deserialize;

use crate::error::ManifestError;

/// Root of one download session's manifest.
///
/// The wire format names its track lists `video` and `audio`; a structurally
/// incomplete document fails to parse rather than being defaulted. The value
/// is immutable after parse and owned by the session that loaded it.
#[derive(Debug, Clone, Deserialize)]
pub struct MasterManifest {
    pub clip_id: String,
    /// Base URL the whole manifest is relative to, itself relative to the
    /// URL the manifest was fetched from.
    pub base_url: String,
    #[serde(rename = "video")]
    pub videos: Vec<Track>,
    #[serde(rename = "audio")]
    pub audios: Vec<Track>,
}

/// One selectable video or audio stream.
///
/// Both variants share a shape; the numeric stream metadata is optional and
/// `height` is only present on video tracks.
#[derive(Debug, Clone, Deserialize)]
pub struct Track {
    pub id: String,
    /// Base URL for this track's segments, relative to the manifest base.
    pub base_url: String,
    pub codecs: String,
    #[serde(default)]
    pub bitrate: Option<u64>,
    #[serde(default)]
    pub avg_bitrate: Option<u64>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub framerate: Option<f64>,
    #[serde(default)]
    pub height: Option<u32>,
    /// Base64-encoded header bytes that prefix the assembled stream. No
    /// media segment is decodable without them.
    pub init_segment: String,
    /// URL of the track's index segment, relative to `base_url`. Fetched as
    /// one extra segment at the end of the download plan.
    #[serde(rename = "index_segment")]
    pub index_segment_url: String,
    /// Ordered media segments; the order is playback order and the fetch
    /// appends in exactly this order.
    pub segments: Vec<Segment>,
}

/// One fetchable chunk of a track's media data.
#[derive(Debug, Clone, Deserialize)]
pub struct Segment {
    /// Location, relative to the owning track's `base_url`.
    pub url: String,
    /// Declared byte length of the segment body. Used for planning and
    /// display only, never to truncate or validate a fetch.
    pub size: u64,
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub end: Option<f64>,
}

/// Labels which manifest list a track came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Video => write!(f, "video"),
            TrackKind::Audio => write!(f, "audio"),
        }
    }
}

impl MasterManifest {
    /// Parse a manifest from a JSON document.
    pub fn parse(input: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(input)?)
    }

    /// Parse a manifest from raw response bytes.
    pub fn parse_slice(input: &[u8]) -> Result<Self, ManifestError> {
        Ok(serde_json::from_slice(input)?)
    }

    pub fn tracks(&self, kind: TrackKind) -> &[Track] {
        match kind {
            TrackKind::Video => &self.videos,
            TrackKind::Audio => &self.audios,
        }
    }

    /// Find a track by id within the given list. Ids are unique per list.
    pub fn track(&self, kind: TrackKind, id: &str) -> Option<&Track> {
        self.tracks(kind).iter().find(|t| t.id == id)
    }
}
