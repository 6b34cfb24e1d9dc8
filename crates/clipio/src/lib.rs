//! # clipio-engine
//!
//! Segmented clip download engine: given a master manifest that describes a
//! clip as separate video and audio tracks, it reconstructs each selected
//! track as one contiguous byte buffer and reports per-track progress while
//! doing so. The finished buffers are handed to an external muxing step;
//! rendering progress and driving the phases belongs to the host.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod progress;
pub mod resolver;
pub mod session;

// Re-exports for easier access
pub use clip_manifest::{ManifestError, MasterManifest, Segment, Track, TrackKind};
pub use config::{DEFAULT_USER_AGENT, DownloaderConfig, create_client};
pub use error::DownloadError;
pub use fetcher::{HttpSegmentSource, SegmentSource, TrackFetcher};
pub use progress::{ProgressReceiver, ProgressReporter, ProgressSender};
pub use session::{
    DownloadSession, SelectionBuffers, SelectionDownload, TrackDownload, fetch_manifest,
};
