// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for zerobuffer operations.
//!
//! Soft timeouts are not errors: blocking operations return `Ok(None)` (or
//! `false`) when the timeout elapses and the peer is still alive. Everything
//! in this enum is a hard failure that leaves the endpoint unusable, except
//! where noted on the variant.

use std::fmt;
use std::io;

/// Result type for zerobuffer operations
pub type Result<T> = std::result::Result<T, ZeroBufferError>;

/// Errors that can occur on a zerobuffer endpoint
#[derive(Debug)]
pub enum ZeroBufferError {
    /// A live reader already owns a buffer with this name
    BufferAlreadyExists(String),

    /// Writer tried to open a buffer that does not exist
    BufferNotFound(String),

    /// Another live writer is already attached to the buffer
    WriterAlreadyConnected,

    /// Writer process died while the reader was blocked
    WriterDead,

    /// Reader process died while the writer was blocked
    ReaderDead,

    /// Frame (header + body) does not fit in the payload ring
    FrameTooLarge { size: usize, capacity: usize },

    /// Zero-length frame bodies are reserved for wrap markers
    InvalidFrameSize,

    /// Reader observed a non-consecutive sequence number
    SequenceError { expected: u64, got: u64 },

    /// Metadata may be written only once per writer attach
    MetadataAlreadyWritten,

    /// Metadata does not fit in the metadata region
    MetadataTooLarge { size: usize, capacity: usize },

    /// Zero-copy protocol misuse (e.g. write while a reservation is pending)
    InvalidState(&'static str),

    /// Requested feature is not implemented
    Unsupported(&'static str),

    /// Shared state violates the protocol (corrupt OIEB, bad frame layout)
    Corruption(String),

    /// Invalid buffer or resource name
    InvalidName(String),

    /// A duplex handler panicked; delivered to error observers, not fatal
    HandlerPanic(String),

    /// Underlying OS operation failed (shm, semaphore, lock file)
    Io(io::Error),
}

impl fmt::Display for ZeroBufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferAlreadyExists(name) => {
                write!(f, "Buffer already exists with a live owner: {name}")
            }
            Self::BufferNotFound(name) => write!(f, "Buffer not found: {name}"),
            Self::WriterAlreadyConnected => write!(f, "Another writer is already connected"),
            Self::WriterDead => write!(f, "Writer process died"),
            Self::ReaderDead => write!(f, "Reader process died"),
            Self::FrameTooLarge { size, capacity } => {
                write!(
                    f,
                    "Frame too large: {size} bytes exceeds payload capacity {capacity}"
                )
            }
            Self::InvalidFrameSize => write!(f, "Invalid frame size: 0"),
            Self::SequenceError { expected, got } => {
                write!(f, "Sequence error: expected {expected}, got {got}")
            }
            Self::MetadataAlreadyWritten => write!(f, "Metadata has already been written"),
            Self::MetadataTooLarge { size, capacity } => {
                write!(
                    f,
                    "Metadata too large: {size} bytes exceeds region capacity {capacity}"
                )
            }
            Self::InvalidState(msg) => write!(f, "Invalid state: {msg}"),
            Self::Unsupported(msg) => write!(f, "Unsupported: {msg}"),
            Self::Corruption(msg) => write!(f, "Protocol corruption: {msg}"),
            Self::InvalidName(name) => write!(f, "Invalid resource name: {name}"),
            Self::HandlerPanic(msg) => write!(f, "Handler panicked: {msg}"),
            Self::Io(e) => write!(f, "OS error: {e}"),
        }
    }
}

impl std::error::Error for ZeroBufferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ZeroBufferError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
