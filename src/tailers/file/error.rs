// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

use crate::tailers::file::state::TailerState;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Cannot {operation} a tailer in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: TailerState,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
