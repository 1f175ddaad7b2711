use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("model artifact unreadable: {0}")]
    ArtifactIo(#[from] std::io::Error),

    #[error("model artifact malformed: {0}")]
    ArtifactMalformed(#[from] serde_json::Error),

    #[error("unsupported model artifact version {found} (supported: {supported})")]
    UnsupportedArtifact { found: u32, supported: u32 },

    #[error("model artifact invalid: {0}")]
    ArtifactInvalid(String),

    #[error("model inference failed: {0}")]
    Inference(String),

    #[error("log error: {0}")]
    Log(#[from] helios_rohrpost::LogError),
}
