// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Duplex channel client.
//!
//! The client owns the response buffer as its Reader and attaches to the
//! request buffer as its Writer, the mirror image of the server. Replies
//! are correlated by sequence number: the server echoes each request's
//! sequence on the response ring, so the response reader is created with
//! dense-sequence verification disabled.

use crate::error::{Result, ZeroBufferError};
use crate::frame::Frame;
use crate::reader::Reader;
use crate::types::BufferConfig;
use crate::writer::Writer;
use std::time::Duration;

/// A reply read from the response ring.
///
/// Holds the underlying zero-copy frame; dropping the response releases
/// the response-ring slot.
pub struct DuplexResponse<'a> {
    frame: Frame<'a>,
}

impl DuplexResponse<'_> {
    /// Sequence number of the request this reply answers
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.frame.sequence()
    }

    /// Response body
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.frame.data()
    }

    /// Release the underlying frame (equivalent to dropping).
    pub fn release(self) {
        self.frame.release();
    }
}

impl std::fmt::Debug for DuplexResponse<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexResponse")
            .field("sequence", &self.sequence())
            .field("size", &self.frame.size())
            .finish()
    }
}

/// Client endpoint of a duplex channel.
pub struct DuplexClient {
    channel: String,
    request_writer: Writer,
    response_reader: Reader,
    closed: bool,
}

impl DuplexClient {
    /// Connect to the channel: create the response buffer, then attach to
    /// the server's request buffer.
    ///
    /// The server must have been started first (it creates `C_request`).
    pub fn connect(channel: &str) -> Result<Self> {
        let response_reader = Reader::create_internal(
            &format!("{channel}_response"),
            BufferConfig::default(),
            false,
        )?;
        // Dropping the half-built client on failure closes the response
        // reader and unlinks its buffer.
        let request_writer = Writer::connect(&format!("{channel}_request"))?;

        log::debug!("[ZB] duplex client connected to '{channel}'");

        Ok(Self {
            channel: channel.to_string(),
            request_writer,
            response_reader,
            closed: false,
        })
    }

    /// Channel name
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Send a request; returns the sequence number the server will echo on
    /// the reply.
    pub fn send_request(&mut self, data: &[u8]) -> Result<u64> {
        self.check_open()?;
        let sequence = self.request_writer.next_sequence();
        self.request_writer.write_frame(data)?;
        Ok(sequence)
    }

    /// Reserve a request slot for zero-copy filling.
    ///
    /// Returns the sequence the request will carry and the writable body.
    /// Only one uncommitted acquisition is allowed; commit with
    /// [`DuplexClient::commit_request`].
    pub fn acquire_request_buffer(&mut self, len: usize) -> Result<(u64, &mut [u8])> {
        self.check_open()?;
        let sequence = self.request_writer.next_sequence();
        let buffer = self.request_writer.get_frame_buffer(len)?;
        Ok((sequence, buffer))
    }

    /// Publish the request reserved by
    /// [`DuplexClient::acquire_request_buffer`].
    pub fn commit_request(&mut self) -> Result<()> {
        self.check_open()?;
        self.request_writer.commit_frame()
    }

    /// Receive the next reply, blocking up to `timeout`.
    ///
    /// Returns `Ok(None)` on a soft timeout. In `SingleThread` processing
    /// mode replies arrive in request order.
    pub fn receive_response(&mut self, timeout: Duration) -> Result<Option<DuplexResponse<'_>>> {
        if self.closed {
            return Err(ZeroBufferError::InvalidState("client is closed"));
        }
        let frame = self.response_reader.read_frame(timeout)?;
        Ok(frame.map(|frame| DuplexResponse { frame }))
    }

    /// Whether the server holds both of its channel endpoints: reading our
    /// requests and writing our responses.
    #[must_use]
    pub fn is_server_connected(&self) -> bool {
        if self.closed {
            return false;
        }
        self.request_writer.is_reader_connected()
            && self.response_reader.is_writer_connected(Duration::ZERO)
    }

    /// Detach from the request buffer and destroy the response buffer.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.request_writer.close();
        self.response_reader.close();
        log::debug!("[ZB] duplex client closed '{}'", self.channel);
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(ZeroBufferError::InvalidState("client is closed"));
        }
        Ok(())
    }
}

impl Drop for DuplexClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_without_server_fails() {
        // No server has created the request buffer, so after the client
        // creates its response buffer the writer attach must fail - and
        // the half-built client must not leak its response buffer.
        let channel = format!("zb_cli_orphan_{}", std::process::id());
        let result = DuplexClient::connect(&channel);
        assert!(matches!(result, Err(ZeroBufferError::BufferNotFound(_))));

        let resources =
            crate::resources::BufferResources::for_buffer(&format!("{channel}_response"))
                .expect("resolve");
        assert!(!crate::platform::SharedMemory::exists(resources.shm_name()));
    }
}
