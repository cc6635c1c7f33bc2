use thiserror::Error;

/// Wharf error types
#[derive(Error, Debug)]
pub enum WharfError {
    /// No local image matches the given name or id
    #[error("no such image: {0}")]
    ImageNotFound(String),

    /// No container matches the given name or id
    #[error("no such container: {0}")]
    ContainerNotFound(String),

    /// Malformed caller input (credentials, references, argument combinations)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unsupported manifest format keyword
    #[error("unknown format {0:?}. Choose one of the supported formats: 'oci', 'v2s1', or 'v2s2'")]
    UnknownFormat(String),

    /// Requested label is missing or empty on the image
    #[error("{image} does not contain the label {label}")]
    EmptyLabel { image: String, label: String },

    /// Image cannot be removed because something still references it
    #[error("image {image} is in use: {message}")]
    ImageInUse { image: String, message: String },

    /// Registry, network or archive transport failure
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// Local content-store operation failure
    #[error("Store error: {0}")]
    StoreError(String),

    /// Build engine failure
    #[error("Build error: {0}")]
    BuildError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// External command failure
    #[error("Exec error: {0}")]
    ExecError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl WharfError {
    /// Whether this error means "the image does not exist" rather than a fault.
    pub fn is_image_not_found(&self) -> bool {
        matches!(self, WharfError::ImageNotFound(_))
    }

    /// Shorthand for a registry error against `registry`.
    pub fn registry(registry: impl Into<String>, message: impl Into<String>) -> Self {
        WharfError::RegistryError {
            registry: registry.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for WharfError {
    fn from(err: serde_json::Error) -> Self {
        WharfError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for WharfError {
    fn from(err: serde_yaml::Error) -> Self {
        WharfError::SerializationError(err.to_string())
    }
}

/// Result type alias for Wharf operations
pub type Result<T> = std::result::Result<T, WharfError>;
