//! Errors from bringing a context up.

use rp_hw::HwError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContextError {
    #[error(transparent)]
    Hw(#[from] HwError),
    #[error("failed to start context task: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type ContextResult<T> = Result<T, ContextError>;
