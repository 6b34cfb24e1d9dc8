// Download session: explicit per-session context and per-track
// orchestration. One session owns the shared HTTP client, the parsed
// manifest and the effective base URL; it is created when the user commits
// to a clip and discarded when the buffers have been handed off.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::{Client, StatusCode};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use clip_manifest::{MasterManifest, Track, TrackKind};

use crate::config::{DownloaderConfig, create_client};
use crate::error::DownloadError;
use crate::fetcher::{HttpSegmentSource, SegmentSource, TrackFetcher};
use crate::progress::{self, ProgressReceiver, ProgressReporter};
use crate::resolver;

/// Fetch and parse the master manifest. Only a 200 response is accepted; a
/// JSON decode failure propagates as a manifest parse error, never a
/// defaulted document.
pub async fn fetch_manifest(client: &Client, url: &Url) -> Result<MasterManifest, DownloadError> {
    debug!(url = %url, "fetching master manifest");
    let response = client.get(url.clone()).send().await?;
    if response.status() != StatusCode::OK {
        return Err(DownloadError::http_status(
            response.status(),
            url.as_str(),
            "manifest fetch",
        ));
    }
    let body = response.bytes().await?;
    let manifest = MasterManifest::parse_slice(&body)?;
    info!(
        clip_id = %manifest.clip_id,
        videos = manifest.videos.len(),
        audios = manifest.audios.len(),
        "manifest loaded"
    );
    Ok(manifest)
}

/// One in-flight track download: the progress stream plus the eventual
/// buffer.
pub struct TrackDownload {
    /// Percentages 0..=100, closed when the fetch finishes either way.
    pub progress: ProgressReceiver,
    handle: JoinHandle<Result<Bytes, DownloadError>>,
}

impl TrackDownload {
    /// Wait for the fetch to finish and return the assembled buffer.
    pub async fn join(self) -> Result<Bytes, DownloadError> {
        flatten(self.handle.await)
    }
}

/// Both finished buffers, ready for the external muxing step.
#[derive(Debug)]
pub struct SelectionBuffers {
    pub video: Bytes,
    pub audio: Bytes,
}

/// A video+audio selection in flight. The two fetches run concurrently,
/// each owning its buffer and its progress channel; they share no mutable
/// state.
#[derive(Debug)]
pub struct SelectionDownload {
    pub video_progress: ProgressReceiver,
    pub audio_progress: ProgressReceiver,
    video: JoinHandle<Result<Bytes, DownloadError>>,
    audio: JoinHandle<Result<Bytes, DownloadError>>,
    token: CancellationToken,
}

impl SelectionDownload {
    /// Cancel both track fetches.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for both fetches to finish. The first originating failure wins:
    /// a sibling that failed with `Cancelled` because of it never masks the
    /// real error.
    pub async fn join(self) -> Result<SelectionBuffers, DownloadError> {
        let (video, audio) = tokio::join!(self.video, self.audio);
        match (flatten(video), flatten(audio)) {
            (Ok(video), Ok(audio)) => Ok(SelectionBuffers { video, audio }),
            (Err(err), Ok(_)) | (Ok(_), Err(err)) => Err(err),
            (Err(video_err), Err(audio_err)) => {
                if video_err.is_cancelled() {
                    Err(audio_err)
                } else {
                    Err(video_err)
                }
            }
        }
    }
}

fn flatten(
    joined: Result<Result<Bytes, DownloadError>, tokio::task::JoinError>,
) -> Result<Bytes, DownloadError> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(DownloadError::Internal {
            reason: format!("track task failed: {e}"),
        }),
    }
}

/// Explicit context for one download session.
///
/// Holds the immutable manifest (safe to share across the track tasks), the
/// segment source backed by the shared client, and the effective base URL:
/// the page URL resolved once against the manifest-declared base, not once
/// per segment.
pub struct DownloadSession {
    manifest: Arc<MasterManifest>,
    effective_base: Url,
    source: Arc<dyn SegmentSource>,
    token: CancellationToken,
}

impl DownloadSession {
    pub fn new(
        manifest: MasterManifest,
        page_url: &Url,
        config: &DownloaderConfig,
    ) -> Result<Self, DownloadError> {
        let client = create_client(config)?;
        Self::with_source(manifest, page_url, Arc::new(HttpSegmentSource::new(client)))
    }

    /// Build a session around a custom segment source. Tests script these.
    pub fn with_source(
        manifest: MasterManifest,
        page_url: &Url,
        source: Arc<dyn SegmentSource>,
    ) -> Result<Self, DownloadError> {
        let effective_base = resolver::effective_base(page_url, &manifest.base_url)?;
        debug!(effective_base = %effective_base, "session created");
        Ok(Self {
            manifest: Arc::new(manifest),
            effective_base,
            source,
            token: CancellationToken::new(),
        })
    }

    pub fn manifest(&self) -> &MasterManifest {
        &self.manifest
    }

    pub fn effective_base(&self) -> &Url {
        &self.effective_base
    }

    /// Cancel everything this session has started.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Look up a track by id, failing fast when absent.
    pub fn track(&self, kind: TrackKind, id: &str) -> Result<&Track, DownloadError> {
        self.manifest
            .track(kind, id)
            .ok_or_else(|| DownloadError::track_not_found(kind, id))
    }

    /// Start one track download on its own task, with its own progress
    /// channel and its own cancellation scope.
    pub fn download_track(&self, kind: TrackKind, id: &str) -> Result<TrackDownload, DownloadError> {
        self.track(kind, id)?;
        let (progress, handle) = self.spawn_track(kind, id.to_string(), self.token.child_token());
        Ok(TrackDownload { progress, handle })
    }

    /// Download the chosen video and audio tracks concurrently.
    ///
    /// Both lookups fail fast before anything is spawned. The two fetches
    /// share one child token: the first task to fail with a real error
    /// cancels it, so the sibling stops instead of running to completion.
    #[instrument(skip(self), fields(clip_id = %self.manifest.clip_id))]
    pub fn download_selection(
        &self,
        video_id: &str,
        audio_id: &str,
    ) -> Result<SelectionDownload, DownloadError> {
        self.track(TrackKind::Video, video_id)?;
        self.track(TrackKind::Audio, audio_id)?;

        let token = self.token.child_token();
        let (video_progress, video) =
            self.spawn_track(TrackKind::Video, video_id.to_string(), token.clone());
        let (audio_progress, audio) =
            self.spawn_track(TrackKind::Audio, audio_id.to_string(), token.clone());

        Ok(SelectionDownload {
            video_progress,
            audio_progress,
            video,
            audio,
            token,
        })
    }

    fn spawn_track(
        &self,
        kind: TrackKind,
        id: String,
        token: CancellationToken,
    ) -> (ProgressReceiver, JoinHandle<Result<Bytes, DownloadError>>) {
        let (tx, rx) = progress::channel();
        let manifest = Arc::clone(&self.manifest);
        let fetcher = TrackFetcher::new(Arc::clone(&self.source));
        let effective_base = self.effective_base.clone();

        let handle = tokio::spawn(async move {
            let track = manifest
                .track(kind, &id)
                .ok_or_else(|| DownloadError::track_not_found(kind, &id))?;
            let reporter = ProgressReporter::new(tx, track.segments.len());
            let result = fetcher
                .fetch_track(track, kind, &effective_base, reporter, &token)
                .await;
            if let Err(err) = &result
                && !err.is_cancelled()
            {
                warn!(%kind, track_id = %id, error = %err, "track fetch failed, cancelling siblings");
                token.cancel();
            }
            result
        });

        (rx, handle)
    }
}
