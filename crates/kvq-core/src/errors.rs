use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvqError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] crate::parser::Error),

    #[error("query not classifiable: {0}")]
    Classify(String),

    #[error("read past end of tuple")]
    ShortTuple,

    #[error("did not consume entire tuple")]
    LongTuple,

    #[error("failed to convert element {index} from {in_type} to {out_type}")]
    Conversion {
        index: usize,
        in_type: &'static str,
        out_type: &'static str,
    },

    #[error("value codec error: {0}")]
    Codec(String),

    #[error("directory error: {0}")]
    Directory(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("schema mismatch under strict mode: {0}")]
    StrictViolation(String),
}

pub type Result<T> = std::result::Result<T, KvqError>;
