// Declared-size estimation for selection listings.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use humansize::{BINARY, format_size};

use crate::error::ManifestError;
use crate::manifest::{MasterManifest, Track};

impl Track {
    /// Decode this track's base64 init segment payload.
    pub fn init_payload(&self) -> Result<Vec<u8>, ManifestError> {
        STANDARD
            .decode(&self.init_segment)
            .map_err(|source| ManifestError::init_segment_decode(&self.id, source))
    }

    /// Total declared byte size of the track: decoded init-segment length
    /// plus the sum of declared segment sizes.
    ///
    /// The assembled buffer may end up a different length, since actual
    /// bytes come from the network responses; the declared size exists for
    /// ordering and display.
    pub fn declared_size(&self) -> Result<u64, ManifestError> {
        let init = self.init_payload()?;
        let segments: u64 = self.segments.iter().map(|s| s.size).sum();
        Ok(init.len() as u64 + segments)
    }
}

impl MasterManifest {
    /// Video tracks ordered by vertical resolution, lowest first, the order
    /// a selection listing presents them in.
    pub fn videos_by_height(&self) -> Vec<&Track> {
        let mut tracks: Vec<&Track> = self.videos.iter().collect();
        tracks.sort_by_key(|t| t.height.unwrap_or(0));
        tracks
    }

    /// Audio tracks with their declared sizes, smallest first.
    ///
    /// The first track with an undecodable init segment fails the whole
    /// listing; callers must not present a partial selection.
    pub fn audios_by_size(&self) -> Result<Vec<(&Track, u64)>, ManifestError> {
        let mut tracks = Vec::with_capacity(self.audios.len());
        for track in &self.audios {
            tracks.push((track, track.declared_size()?));
        }
        tracks.sort_by_key(|(_, size)| *size);
        Ok(tracks)
    }
}

/// Human-readable byte size for selection labels.
pub fn human_size(bytes: u64) -> String {
    format_size(bytes, BINARY)
}
