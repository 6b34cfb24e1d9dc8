#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("malformed manifest JSON: {source}")]
    Parse {
        #[from]
        source: serde_json::Error,
    },

    #[error("invalid base64 init segment for track `{track_id}`: {source}")]
    InitSegmentDecode {
        track_id: String,
        source: base64::DecodeError,
    },
}

impl ManifestError {
    pub fn init_segment_decode(track_id: impl Into<String>, source: base64::DecodeError) -> Self {
        Self::InitSegmentDecode {
            track_id: track_id.into(),
            source,
        }
    }
}
