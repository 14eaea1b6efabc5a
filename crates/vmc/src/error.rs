use thiserror::Error;

#[derive(Debug, Error)]
pub enum VmcError {
    #[error("malformed certificate: {0}")]
    Malformed(String),
    #[error("certificate carries no logotype extension (1.3.6.1.5.5.7.1.12)")]
    MissingLogotypeExtension,
    #[error("logotype extension carries no data: URI")]
    NoIndicatorUri,
}
