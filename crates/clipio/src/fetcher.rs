// Track fetcher: strictly sequential segment download and append into one
// contiguous buffer.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};
use url::Url;

use clip_manifest::{Track, TrackKind};

use crate::error::DownloadError;
use crate::progress::ProgressReporter;
use crate::resolver;

/// Fetches one absolute segment URL fully into memory.
///
/// Implementations either return the complete body or an error; a partial
/// body is never surfaced, which is what keeps the track buffer free of
/// half-appended segments when a fetch aborts.
#[async_trait]
pub trait SegmentSource: Send + Sync {
    async fn fetch_segment(&self, url: &Url) -> Result<Bytes, DownloadError>;
}

/// Segment source backed by the session's shared HTTP client. Only a 200
/// response is accepted; the body is streamed chunk-wise and the stream is
/// consumed to the end on success and dropped on every error path.
pub struct HttpSegmentSource {
    client: Client,
}

impl HttpSegmentSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SegmentSource for HttpSegmentSource {
    async fn fetch_segment(&self, url: &Url) -> Result<Bytes, DownloadError> {
        let response = self.client.get(url.clone()).send().await?;
        if response.status() != StatusCode::OK {
            return Err(DownloadError::http_status(
                response.status(),
                url.as_str(),
                "segment fetch",
            ));
        }

        let mut buf = BytesMut::with_capacity(response.content_length().unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buf.extend_from_slice(&chunk);
        }

        trace!(url = %url, size = buf.len(), "segment body received");
        Ok(buf.freeze())
    }
}

/// Downloads a whole track: decoded init segment first, the declared media
/// segments in manifest order, then the index segment as one synthetic
/// final fetch. Segments are never fetched concurrently within a track;
/// sequential fetches are what guarantee append order without a reassembly
/// step, since the segments are not independently decodable.
pub struct TrackFetcher {
    source: Arc<dyn SegmentSource>,
}

impl TrackFetcher {
    pub fn new(source: Arc<dyn SegmentSource>) -> Self {
        Self { source }
    }

    /// Fetch `track` into one contiguous buffer, emitting progress after
    /// each fully appended media segment.
    ///
    /// Any single failure aborts the whole track: no retry, no
    /// skip-and-continue. The declared segment sizes pre-size the buffer but
    /// never validate the fetched bytes.
    #[instrument(
        skip(self, track, effective_base, progress, token),
        fields(kind = %kind, track_id = %track.id)
    )]
    pub async fn fetch_track(
        &self,
        track: &Track,
        kind: TrackKind,
        effective_base: &Url,
        mut progress: ProgressReporter,
        token: &CancellationToken,
    ) -> Result<Bytes, DownloadError> {
        let init = track.init_payload()?;
        let declared: usize = track.segments.iter().map(|s| s.size as usize).sum();
        let mut buffer = BytesMut::with_capacity(init.len() + declared);
        buffer.extend_from_slice(&init);
        debug!(init_len = init.len(), segments = track.segments.len(), "track fetch started");

        for (index, segment) in track.segments.iter().enumerate() {
            let url = resolver::segment_url(effective_base, &track.base_url, &segment.url)?;
            let bytes = self.fetch_cancellable(&url, token).await?;
            buffer.extend_from_slice(&bytes);
            progress.segment_done();
            trace!(index, size = bytes.len(), "media segment appended");
        }
        progress.finish();

        // The index segment carries no declared size and is fetched like any
        // media segment, appended after the final progress emission.
        let url = resolver::segment_url(effective_base, &track.base_url, &track.index_segment_url)?;
        let bytes = self.fetch_cancellable(&url, token).await?;
        buffer.extend_from_slice(&bytes);

        debug!(total = buffer.len(), "track fetch complete");
        Ok(buffer.freeze())
    }

    async fn fetch_cancellable(
        &self,
        url: &Url,
        token: &CancellationToken,
    ) -> Result<Bytes, DownloadError> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(DownloadError::Cancelled),
            res = self.source.fetch_segment(url) => res,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use clip_manifest::Segment;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::progress;

    /// Scripted segment source: maps absolute URLs to canned outcomes and
    /// records the request order.
    #[derive(Default)]
    struct ScriptedSource {
        responses: HashMap<String, ScriptedResponse>,
        requests: Mutex<Vec<String>>,
    }

    struct ScriptedResponse {
        delay: Option<Duration>,
        result: Result<Bytes, StatusCode>,
    }

    impl ScriptedSource {
        fn body(mut self, url: &str, body: &'static [u8]) -> Self {
            self.responses.insert(
                url.to_string(),
                ScriptedResponse {
                    delay: None,
                    result: Ok(Bytes::from_static(body)),
                },
            );
            self
        }

        fn slow_body(mut self, url: &str, body: &'static [u8], delay: Duration) -> Self {
            self.responses.insert(
                url.to_string(),
                ScriptedResponse {
                    delay: Some(delay),
                    result: Ok(Bytes::from_static(body)),
                },
            );
            self
        }

        fn status(mut self, url: &str, status: StatusCode) -> Self {
            self.responses.insert(
                url.to_string(),
                ScriptedResponse {
                    delay: None,
                    result: Err(status),
                },
            );
            self
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SegmentSource for ScriptedSource {
        async fn fetch_segment(&self, url: &Url) -> Result<Bytes, DownloadError> {
            self.requests.lock().unwrap().push(url.to_string());
            let scripted = self
                .responses
                .get(url.as_str())
                .unwrap_or_else(|| panic!("unscripted URL {url}"));
            if let Some(delay) = scripted.delay {
                tokio::time::sleep(delay).await;
            }
            match &scripted.result {
                Ok(bytes) => Ok(bytes.clone()),
                Err(status) => Err(DownloadError::http_status(*status, url.as_str(), "segment fetch")),
            }
        }
    }

    fn make_track(id: &str, init: &[u8], segment_urls: &[&str]) -> Track {
        Track {
            id: id.to_string(),
            base_url: "video/1080p/".to_string(),
            codecs: "avc1.640028".to_string(),
            bitrate: None,
            avg_bitrate: None,
            duration: None,
            framerate: None,
            height: Some(1080),
            init_segment: STANDARD.encode(init),
            index_segment_url: "index.m4s".to_string(),
            segments: segment_urls
                .iter()
                .map(|url| Segment {
                    url: url.to_string(),
                    size: 0,
                    start: None,
                    end: None,
                })
                .collect(),
        }
    }

    fn base() -> Url {
        Url::parse("https://example.com/media/").unwrap()
    }

    fn seg(url: &str) -> String {
        format!("https://example.com/media/video/1080p/{url}")
    }

    fn drain(rx: &mut progress::ProgressReceiver) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(p) = rx.try_recv() {
            out.push(p);
        }
        out
    }

    #[tokio::test]
    async fn test_buffer_is_init_then_segments_then_index() {
        let source = Arc::new(
            ScriptedSource::default()
                .body(&seg("seg-0.m4s"), b"AAAA")
                .body(&seg("seg-1.m4s"), b"BBBB")
                .body(&seg("seg-2.m4s"), b"CCCC")
                .body(&seg("index.m4s"), b"IDX"),
        );
        let fetcher = TrackFetcher::new(source.clone());
        let track = make_track("v1", b"init", &["seg-0.m4s", "seg-1.m4s", "seg-2.m4s"]);
        let (tx, _rx) = progress::channel();

        let buffer = fetcher
            .fetch_track(
                &track,
                TrackKind::Video,
                &base(),
                ProgressReporter::new(tx, track.segments.len()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(buffer.as_ref(), b"initAAAABBBBCCCCIDX");
        assert_eq!(
            source.requests(),
            vec![
                seg("seg-0.m4s"),
                seg("seg-1.m4s"),
                seg("seg-2.m4s"),
                seg("index.m4s"),
            ]
        );
    }

    #[tokio::test]
    async fn test_append_order_survives_uneven_response_latency() {
        // Segment 0 is much slower than segment 1; the sequential design must
        // still append in declared order.
        let source = Arc::new(
            ScriptedSource::default()
                .slow_body(&seg("seg-0.m4s"), b"FIRST", Duration::from_millis(80))
                .body(&seg("seg-1.m4s"), b"SECOND")
                .body(&seg("index.m4s"), b"IDX"),
        );
        let fetcher = TrackFetcher::new(source);
        let track = make_track("v1", b"init:", &["seg-0.m4s", "seg-1.m4s"]);
        let (tx, _rx) = progress::channel();

        let buffer = fetcher
            .fetch_track(
                &track,
                TrackKind::Video,
                &base(),
                ProgressReporter::new(tx, track.segments.len()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(buffer.as_ref(), b"init:FIRSTSECONDIDX");
    }

    #[tokio::test]
    async fn test_progress_for_two_segments() {
        let source = Arc::new(
            ScriptedSource::default()
                .body(&seg("seg-0.m4s"), b"A")
                .body(&seg("seg-1.m4s"), b"B")
                .body(&seg("index.m4s"), b"I"),
        );
        let fetcher = TrackFetcher::new(source);
        let track = make_track("v1", b"i", &["seg-0.m4s", "seg-1.m4s"]);
        let (tx, mut rx) = progress::channel();

        fetcher
            .fetch_track(
                &track,
                TrackKind::Video,
                &base(),
                ProgressReporter::new(tx, track.segments.len()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(drain(&mut rx), vec![50, 100]);
    }

    #[tokio::test]
    async fn test_failed_segment_aborts_track() {
        let source = Arc::new(
            ScriptedSource::default()
                .body(&seg("seg-0.m4s"), b"A")
                .status(&seg("seg-1.m4s"), StatusCode::NOT_FOUND)
                .body(&seg("seg-2.m4s"), b"C")
                .body(&seg("index.m4s"), b"I"),
        );
        let fetcher = TrackFetcher::new(source.clone());
        let track = make_track("v1", b"i", &["seg-0.m4s", "seg-1.m4s", "seg-2.m4s"]);
        let (tx, mut rx) = progress::channel();

        let err = fetcher
            .fetch_track(
                &track,
                TrackKind::Video,
                &base(),
                ProgressReporter::new(tx, track.segments.len()),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        match err {
            DownloadError::HttpStatus { status, .. } => assert_eq!(status, StatusCode::NOT_FOUND),
            other => panic!("unexpected error: {other}"),
        }
        // Nothing past the failed segment was requested, so the buffer held
        // exactly init + segment 0 when the fetch aborted.
        assert_eq!(source.requests(), vec![seg("seg-0.m4s"), seg("seg-1.m4s")]);
        // The progress channel closed after the last completed segment.
        assert_eq!(drain(&mut rx), vec![33]);
    }

    #[tokio::test]
    async fn test_index_segment_failure_is_terminal() {
        let source = Arc::new(
            ScriptedSource::default()
                .body(&seg("seg-0.m4s"), b"A")
                .status(&seg("index.m4s"), StatusCode::INTERNAL_SERVER_ERROR),
        );
        let fetcher = TrackFetcher::new(source);
        let track = make_track("v1", b"i", &["seg-0.m4s"]);
        let (tx, _rx) = progress::channel();

        let err = fetcher
            .fetch_track(
                &track,
                TrackKind::Video,
                &base(),
                ProgressReporter::new(tx, track.segments.len()),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::HttpStatus { .. }));
    }

    #[tokio::test]
    async fn test_bad_init_segment_fails_before_any_request() {
        let source = Arc::new(ScriptedSource::default());
        let fetcher = TrackFetcher::new(source.clone());
        let mut track = make_track("v1", b"i", &["seg-0.m4s"]);
        track.init_segment = "@@not-base64@@".to_string();
        let (tx, _rx) = progress::channel();

        let err = fetcher
            .fetch_track(
                &track,
                TrackKind::Video,
                &base(),
                ProgressReporter::new(tx, track.segments.len()),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Manifest { .. }));
        assert!(source.requests().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_the_fetch() {
        let source = Arc::new(
            ScriptedSource::default()
                .slow_body(&seg("seg-0.m4s"), b"A", Duration::from_secs(5)),
        );
        let fetcher = TrackFetcher::new(source);
        let track = make_track("v1", b"i", &["seg-0.m4s"]);
        let (tx, _rx) = progress::channel();

        let token = CancellationToken::new();
        token.cancel();
        let err = fetcher
            .fetch_track(
                &track,
                TrackKind::Video,
                &base(),
                ProgressReporter::new(tx, track.segments.len()),
                &token,
            )
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_empty_track_fetches_only_the_index_segment() {
        let source = Arc::new(ScriptedSource::default().body(&seg("index.m4s"), b"IDX"));
        let fetcher = TrackFetcher::new(source.clone());
        let track = make_track("v1", b"init", &[]);
        let (tx, mut rx) = progress::channel();

        let buffer = fetcher
            .fetch_track(
                &track,
                TrackKind::Video,
                &base(),
                ProgressReporter::new(tx, track.segments.len()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(buffer.as_ref(), b"initIDX");
        assert_eq!(drain(&mut rx), vec![100]);
        assert_eq!(source.requests(), vec![seg("index.m4s")]);
    }
}
