//! Domain-specific error types for sandbox operations.
//!
//! Typed errors let the orchestrator tell infrastructure faults apart
//! without parsing error message strings. Limit violations are not errors;
//! they are reported through [`super::ExecOutcome`].

/// Errors that can occur during sandbox operations.
#[derive(Debug, thiserror::Error)]
pub(crate) enum SandboxError {
    /// Docker daemon is not running or not accessible.
    #[error("Docker is not available: {message}")]
    DockerUnavailable { message: String },

    /// Sandbox image was not found.
    #[error("Sandbox image not found: {image}")]
    ImageNotFound { image: String },

    /// Container operation failed (create, start, copy, kill).
    #[error("Sandbox {operation} failed for {name}: {message}")]
    ContainerFailed {
        operation: &'static str,
        name: String,
        message: String,
    },

    /// A command could not be executed or its output could not be read.
    #[error("Sandbox exec failed: {message}")]
    ExecFailed { message: String },
}

impl SandboxError {
    /// Creates a `DockerUnavailable` error.
    pub fn docker_unavailable(message: impl Into<String>) -> Self {
        Self::DockerUnavailable {
            message: message.into(),
        }
    }

    /// Creates an `ImageNotFound` error.
    pub fn image_not_found(image: impl Into<String>) -> Self {
        Self::ImageNotFound {
            image: image.into(),
        }
    }

    /// Creates a `ContainerFailed` error for the given operation.
    pub fn container_failed(
        operation: &'static str,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ContainerFailed {
            operation,
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates an `ExecFailed` error.
    pub fn exec_failed(message: impl Into<String>) -> Self {
        Self::ExecFailed {
            message: message.into(),
        }
    }

    /// Returns true if this is a Docker unavailability error.
    pub fn is_docker_unavailable(&self) -> bool {
        matches!(self, Self::DockerUnavailable { .. })
    }

    /// Returns true if this is an image not found error.
    pub fn is_image_not_found(&self) -> bool {
        matches!(self, Self::ImageNotFound { .. })
    }
}
