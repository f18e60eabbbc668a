use holdover_core::RetainError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SaveError {
    #[error(transparent)]
    Retain(#[from] RetainError),

    #[error("saveable state for `{key}` could not be (de)serialized: {source}")]
    Serde {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("saveable registry keys must not be blank")]
    BlankKey,
}
