use failure::Fail;

#[derive(Debug, Fail, Clone, PartialEq)]
pub enum ChainError {
    #[fail(display = "the signing key is not a valid EC private key")]
    InvalidKey,
    #[fail(display = "no signature in this transaction")]
    MissingSignature,
    #[fail(
        display = "invalid block: previous hash {} does not match tip {}",
        found, expected
    )]
    LinkMismatch { expected: String, found: String },
    #[fail(display = "invalid block {}: failed validation", hash)]
    InvalidBlock { hash: String },
    #[fail(display = "malformed payload: {}", reason)]
    MalformedPayload { reason: String },
}

impl ChainError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        ChainError::MalformedPayload {
            reason: reason.into(),
        }
    }
}
