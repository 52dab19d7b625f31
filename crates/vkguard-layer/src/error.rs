use ash::vk;

#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    #[error("no loader link info in the {0} create chain")]
    MissingLink(&'static str),

    #[error("next layer does not provide {0}")]
    MissingEntryPoint(&'static str),

    #[error("no {kind} context for dispatch key 0x{key:x}")]
    UnknownContext { kind: &'static str, key: usize },

    #[error("driver returned {0:?}")]
    Driver(vk::Result),
}

impl LayerError {
    /// Result code returned to the application for this failure.
    pub fn to_vk_result(&self) -> vk::Result {
        match self {
            LayerError::MissingLink(_) | LayerError::MissingEntryPoint(_) => {
                vk::Result::ERROR_INITIALIZATION_FAILED
            }
            LayerError::UnknownContext { .. } => vk::Result::ERROR_INITIALIZATION_FAILED,
            LayerError::Driver(result) => *result,
        }
    }
}
