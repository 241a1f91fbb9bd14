#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("truncated image")]
    TruncatedImage,
    #[error("corrupt image: {0}")]
    CorruptImage(String),
    #[error("partition `{0}` not found")]
    NotFound(String),
    #[error("archive contains no image member")]
    NoImageMember,
    #[error("unsupported archive: {0}")]
    UnsupportedArchive(String),
    #[error("invalid GUID text `{0}`")]
    InvalidGuid(String),
    #[error("partition {name} ends at byte {end}, past image end {image_len}")]
    OutOfBounds {
        name: String,
        end: u64,
        image_len: u64,
    },
    #[error("io failed")]
    Io(#[from] std::io::Error),
    #[error("scroll read failed")]
    Scroll(#[from] scroll::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
