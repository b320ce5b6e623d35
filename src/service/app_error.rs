// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

pub type AppResult<T> = Result<T, AppError>;

/// Coarse classification of every transport failure.
///
/// Callers use this to decide what to do with an error without matching on
/// individual variants: protocol violations and incompatibilities are fatal
/// to the message or connection, transport failures leave retry policy to
/// the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ProtocolViolation,
    Incompatibility,
    ResourceExhaustion,
    AddressingError,
    TransportFailure,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// wire data errors
    #[error("malformed protocol: {0}")]
    MalformedProtocol(String),

    #[error("fragment for unknown message: {0}")]
    UnknownFragment(String),

    #[error("cdr stream endianness not configured")]
    StreamNotConfigured,

    #[error("cdr stream already configured")]
    StreamAlreadyConfigured,

    #[error("read of {requested} bytes at offset {offset} exceeds the message content")]
    EndOfMessage { offset: usize, requested: usize },

    /// marker error, more bytes are needed before a frame can be parsed
    #[error("incomplete frame")]
    Incomplete,

    /// code set errors
    #[error("no compatible code set: {0}")]
    IncompatibleCodeSet(String),

    #[error("data conversion failed: {0}")]
    DataConversion(String),

    #[error("code sets already initialized, override must happen before first use")]
    BadInvOrder,

    /// connection errors
    #[error("request ids exhausted on connection {0}")]
    RequestIdsExhausted(u64),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// addressing errors
    #[error("invalid object reference: {0}")]
    InvalidReference(String),

    #[error("bad parameter: {0}")]
    BadParam(String),

    /// general errors
    #[error("internal error: {0}")]
    Internal(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::MalformedProtocol(_)
            | AppError::UnknownFragment(_)
            | AppError::StreamNotConfigured
            | AppError::StreamAlreadyConfigured
            | AppError::EndOfMessage { .. }
            | AppError::Incomplete => ErrorKind::ProtocolViolation,
            AppError::IncompatibleCodeSet(_) | AppError::DataConversion(_) => {
                ErrorKind::Incompatibility
            }
            AppError::RequestIdsExhausted(_) => ErrorKind::ResourceExhaustion,
            AppError::InvalidReference(_) | AppError::BadParam(_) => ErrorKind::AddressingError,
            AppError::TransportFailure(_) | AppError::IoError(_) => ErrorKind::TransportFailure,
            AppError::BadInvOrder
            | AppError::Internal(_)
            | AppError::InvalidValue(_)
            | AppError::ConfigFileError(_) => ErrorKind::Internal,
        }
    }
}
