use thiserror::Error;

/// Errors surfaced by the annotation parser registry (§4.B, §7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnnotationError {
    #[error("annotation {0} not present")]
    Missing(String),
    #[error("annotation {key} has invalid content: {reason}")]
    InvalidContent { key: String, reason: String },
    #[error("location denied: {0}")]
    LocationDenied(String),
}

/// Errors from the checksum admission gate (§4.F).
#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("no declared checksum matches local checksum {local} (diff: {diff})")]
    Mismatch { local: String, diff: String },
    #[error("object {0} missing a required ID component, skipped")]
    SkippedObject(String),
}

/// Errors from the configuration assembler (§4.E, §7).
#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("referenced service {0} not found")]
    ServiceNotFound(String),
    #[error("referenced secret {0} not found")]
    SecretNotFound(String),
    #[error("canary referrer {0} not permitted")]
    InvalidCanaryReferrer(String),
}

/// Errors from the dual-channel publisher (§4.G, §7).
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("template render failed: {0}")]
    TemplateRender(String),
    #[error("full reload failed: {0}")]
    FullReload(String),
    #[error("dynamic reconfiguration failed after retries: {0}")]
    DynamicReconfigure(String),
    #[error("shared-memory write failed: {0}")]
    SharedMemory(#[from] ShmError),
}

#[derive(Debug, Error)]
pub enum ShmError {
    #[error("failed to acquire file lock at {0}")]
    Lock(String),
    #[error("failed to open/create shared-memory segment {0}")]
    Open(String),
    #[error("short write to shared-memory segment: wrote {wrote} of {want} bytes")]
    ShortWrite { wrote: usize, want: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Top-level error type for the reconcile worker and binary entry point.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    Checksum(#[from] ChecksumError),
    #[error(transparent)]
    Assemble(#[from] AssembleError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error("fatal initialization error: {0}")]
    Fatal(String),
}
