// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Duplex request/response channels layered on two ring buffers.
//!
//! A channel `C` is the buffer pair `C_request` / `C_response`. The server
//! consumes the request buffer and produces on the response buffer; the
//! client holds the inverse pair. Responses carry the *request's* sequence
//! number so the client can correlate replies - which means the response
//! ring's sequence field is not monotonic, and the client's response
//! reader is built with dense-sequence verification disabled.

mod client;
mod factory;
mod server;

pub use client::{DuplexClient, DuplexResponse};
pub use factory::DuplexChannelFactory;
pub use server::{ImmutableDuplexServer, MutableDuplexServer, ServerOptions};

use crate::error::ZeroBufferError;
use crate::frame::Frame;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Policy governing how the server consumes requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingMode {
    /// One worker thread: read, handle, respond, release, repeat.
    /// Responses are emitted in request order.
    #[default]
    SingleThread,
    /// Reserved for future work; `start` declines it with `Unsupported`.
    ThreadPool,
}

/// Handler for immutable servers: receives a read-only request frame and
/// returns the response body.
pub trait RequestHandler: Send + 'static {
    fn handle(&mut self, frame: &Frame<'_>) -> Vec<u8>;
}

impl<F> RequestHandler for F
where
    F: FnMut(&Frame<'_>) -> Vec<u8> + Send + 'static,
{
    fn handle(&mut self, frame: &Frame<'_>) -> Vec<u8> {
        self(frame)
    }
}

/// Handler for mutable servers: transforms the request in place; the
/// mutated request region becomes the response body.
pub trait MutableRequestHandler: Send + 'static {
    fn handle(&mut self, sequence: u64, data: &mut [u8]);
}

impl<F> MutableRequestHandler for F
where
    F: FnMut(u64, &mut [u8]) + Send + 'static,
{
    fn handle(&mut self, sequence: u64, data: &mut [u8]) {
        self(sequence, data)
    }
}

/// Token returned by `add_error_handler`, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorHandlerId(u64);

type ErrorHandlerFn = Box<dyn Fn(&ZeroBufferError) + Send + Sync + 'static>;

/// Observer registry for non-fatal server runtime errors (dead client,
/// handler panic). Shared between the server handle and its worker.
#[derive(Default)]
pub(crate) struct ErrorHandlers {
    handlers: Mutex<Vec<(u64, ErrorHandlerFn)>>,
    next_id: AtomicU64,
}

impl ErrorHandlers {
    pub(crate) fn add(&self, handler: ErrorHandlerFn) -> ErrorHandlerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().push((id, handler));
        ErrorHandlerId(id)
    }

    pub(crate) fn remove(&self, id: ErrorHandlerId) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id.0);
        handlers.len() != before
    }

    pub(crate) fn notify(&self, error: &ZeroBufferError) {
        log::warn!("[ZB] duplex server error: {error}");
        for (_, handler) in self.handlers.lock().iter() {
            handler(error);
        }
    }
}
