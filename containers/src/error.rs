use thiserror::Error;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Error)]
pub enum ContainerError {
    #[error("Expected a valid handle, got the invalid sentinel or an out of range index")]
    InvalidHandle,

    #[error("Handle generation does not match the slot, the value was freed")]
    UseAfterFree,
}
