// URL resolution chain: page URL -> manifest base -> track base -> segment.

use url::Url;

use crate::error::DownloadError;

fn join(base: &Url, reference: &str) -> Result<Url, DownloadError> {
    base.join(reference)
        .map_err(|e| DownloadError::invalid_url(reference, e.to_string()))
}

/// Resolve the session's effective base URL: the page/manifest URL resolved
/// once against the manifest-declared base. Computed once per session, not
/// per segment.
pub fn effective_base(page_url: &Url, manifest_base: &str) -> Result<Url, DownloadError> {
    join(page_url, manifest_base)
}

/// Resolve one segment's absolute fetch URL.
///
/// RFC3986 relative-reference resolution applies left to right: the track
/// base against the effective base, then the segment URL against that. An
/// absolute segment URL short-circuits the chain. Failures are explicit;
/// no stage falls back to a zero-value URL.
pub fn segment_url(
    effective_base: &Url,
    track_base: &str,
    segment_url: &str,
) -> Result<Url, DownloadError> {
    let track_base = join(effective_base, track_base)?;
    join(&track_base, segment_url)
}
