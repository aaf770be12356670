// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Duplex channel servers.
//!
//! `start` creates the request buffer synchronously (so a client can
//! connect as soon as it returns) and spawns the worker thread. The worker
//! attaches to the response buffer once the client has created it, invokes
//! `on_init` with the request metadata, then loops: read request, dispatch
//! handler, write the response under the request's sequence, release.
//!
//! Handler panics and recoverable write failures go to the error
//! observers and the worker continues; a dead peer stops the worker after
//! notifying, but leaves the server object usable for `stop`.

use super::{
    ErrorHandlerId, ErrorHandlers, MutableRequestHandler, ProcessingMode, RequestHandler,
};
use crate::error::{Result, ZeroBufferError};
use crate::reader::Reader;
use crate::types::BufferConfig;
use crate::writer::Writer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Interval between attempts to attach to the client's response buffer
const RESPONSE_ATTACH_POLL: Duration = Duration::from_millis(100);

/// Tuning for a duplex server.
#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    /// Bound on each request-read iteration. Shorter values make `stop`
    /// more responsive; longer values reduce idle wakeups.
    pub timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

type OnInit = Box<dyn FnOnce(&[u8]) + Send + 'static>;

enum HandlerKind {
    Immutable(Box<dyn RequestHandler>),
    Mutable(Box<dyn MutableRequestHandler>),
}

/// Shared implementation behind both server variants.
struct ServerCore {
    channel: String,
    config: BufferConfig,
    options: ServerOptions,
    cancel: Arc<AtomicBool>,
    errors: Arc<ErrorHandlers>,
    worker: Option<JoinHandle<()>>,
}

impl ServerCore {
    fn new(channel: &str, config: BufferConfig, options: ServerOptions) -> Self {
        Self {
            channel: channel.to_string(),
            config,
            options,
            cancel: Arc::new(AtomicBool::new(false)),
            errors: Arc::new(ErrorHandlers::default()),
            worker: None,
        }
    }

    fn start(
        &mut self,
        handler: HandlerKind,
        mode: ProcessingMode,
        on_init: Option<OnInit>,
    ) -> Result<()> {
        if mode == ProcessingMode::ThreadPool {
            return Err(ZeroBufferError::Unsupported(
                "THREAD_POOL processing mode is reserved for future work",
            ));
        }
        if self.worker.is_some() {
            return Err(ZeroBufferError::InvalidState("server already started"));
        }

        // Create the request buffer before returning so clients can
        // connect immediately after start().
        let request_reader =
            Reader::create(&format!("{}_request", self.channel), self.config)?;

        self.cancel.store(false, Ordering::Relaxed);
        let ctx = WorkerContext {
            channel: self.channel.clone(),
            options: self.options,
            cancel: Arc::clone(&self.cancel),
            errors: Arc::clone(&self.errors),
        };

        log::info!("[ZB] duplex server '{}' starting", self.channel);
        self.worker = Some(std::thread::spawn(move || {
            run_worker(ctx, request_reader, handler, on_init);
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("[ZB] duplex server '{}' worker panicked", self.channel);
            }
            log::info!("[ZB] duplex server '{}' stopped", self.channel);
        }
    }

    fn is_running(&self) -> bool {
        !self.cancel.load(Ordering::Relaxed)
            && self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }
}

impl Drop for ServerCore {
    fn drop(&mut self) {
        self.stop();
    }
}

struct WorkerContext {
    channel: String,
    options: ServerOptions,
    cancel: Arc<AtomicBool>,
    errors: Arc<ErrorHandlers>,
}

fn run_worker(
    ctx: WorkerContext,
    mut request_reader: Reader,
    mut handler: HandlerKind,
    mut on_init: Option<OnInit>,
) {
    // The client owns the response buffer; wait for it to appear.
    let response_name = format!("{}_response", ctx.channel);
    let mut response_writer = loop {
        if ctx.cancel.load(Ordering::Relaxed) {
            return;
        }
        match Writer::connect(&response_name) {
            Ok(writer) => break writer,
            Err(ZeroBufferError::BufferNotFound(_)) => {
                std::thread::sleep(RESPONSE_ATTACH_POLL);
            }
            Err(e) => {
                ctx.errors.notify(&e);
                return;
            }
        }
    };

    // First metadata observation, possibly empty, before any handler call.
    if let Some(init) = on_init.take() {
        init(request_reader.get_metadata());
    }

    while !ctx.cancel.load(Ordering::Relaxed) {
        match request_reader.read_frame(ctx.options.timeout) {
            Ok(Some(mut frame)) => {
                let sequence = frame.sequence();

                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(
                    || match &mut handler {
                        HandlerKind::Immutable(h) => Some(h.handle(&frame)),
                        HandlerKind::Mutable(h) => {
                            h.handle(sequence, frame.data_mut());
                            None
                        }
                    },
                ));

                let write_result = match outcome {
                    Ok(Some(body)) => {
                        response_writer.write_frame_with_sequence(&body, sequence)
                    }
                    Ok(None) => {
                        // Mutable mode: the transformed request region is
                        // the response body.
                        response_writer.write_frame_with_sequence(frame.data(), sequence)
                    }
                    Err(payload) => {
                        ctx.errors
                            .notify(&ZeroBufferError::HandlerPanic(panic_message(&payload)));
                        continue; // frame drops here, slot released
                    }
                };

                if let Err(e) = write_result {
                    let fatal = matches!(
                        e,
                        ZeroBufferError::ReaderDead | ZeroBufferError::WriterDead
                    );
                    ctx.errors.notify(&e);
                    if fatal {
                        return;
                    }
                }
            }
            // Soft timeout: client idle or not yet connected, keep serving.
            Ok(None) => {}
            Err(e) => {
                // WriterDead (client gone) and protocol violations stop
                // this worker; the server object itself stays up.
                ctx.errors.notify(&e);
                return;
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Server whose handler receives a read-only request frame and returns a
/// response buffer.
pub struct ImmutableDuplexServer {
    core: ServerCore,
}

impl ImmutableDuplexServer {
    /// Create a server for `channel`. Buffers are created by `start`.
    pub fn new(channel: &str, config: BufferConfig, options: ServerOptions) -> Result<Self> {
        // Validate the channel name early; the buffer names derive from it.
        crate::resources::BufferResources::for_buffer(&format!("{channel}_request"))?;
        Ok(Self {
            core: ServerCore::new(channel, config, options),
        })
    }

    /// Start background consumption of the request buffer.
    pub fn start<H: RequestHandler>(&mut self, handler: H, mode: ProcessingMode) -> Result<()> {
        self.core
            .start(HandlerKind::Immutable(Box::new(handler)), mode, None)
    }

    /// Start with an initialization callback, invoked exactly once with
    /// the request buffer's metadata (possibly empty) before the first
    /// handler call.
    pub fn start_with_init<H, F>(
        &mut self,
        handler: H,
        mode: ProcessingMode,
        on_init: F,
    ) -> Result<()>
    where
        H: RequestHandler,
        F: FnOnce(&[u8]) + Send + 'static,
    {
        self.core.start(
            HandlerKind::Immutable(Box::new(handler)),
            mode,
            Some(Box::new(on_init)),
        )
    }

    /// Signal cancellation and join the worker.
    pub fn stop(&mut self) {
        self.core.stop();
    }

    /// Whether the worker is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    /// Register an observer for non-fatal runtime errors.
    pub fn add_error_handler<F>(&self, handler: F) -> ErrorHandlerId
    where
        F: Fn(&ZeroBufferError) + Send + Sync + 'static,
    {
        self.core.errors.add(Box::new(handler))
    }

    /// Unregister an error observer. Returns `false` if already removed.
    pub fn remove_error_handler(&self, id: ErrorHandlerId) -> bool {
        self.core.errors.remove(id)
    }
}

/// Server whose handler transforms the request region in place; the
/// mutated region becomes the response body.
pub struct MutableDuplexServer {
    core: ServerCore,
}

impl MutableDuplexServer {
    /// Create a server for `channel`. Buffers are created by `start`.
    pub fn new(channel: &str, config: BufferConfig, options: ServerOptions) -> Result<Self> {
        crate::resources::BufferResources::for_buffer(&format!("{channel}_request"))?;
        Ok(Self {
            core: ServerCore::new(channel, config, options),
        })
    }

    /// Start background consumption of the request buffer.
    pub fn start<H: MutableRequestHandler>(
        &mut self,
        handler: H,
        mode: ProcessingMode,
    ) -> Result<()> {
        self.core
            .start(HandlerKind::Mutable(Box::new(handler)), mode, None)
    }

    /// Start with an initialization callback; see
    /// [`ImmutableDuplexServer::start_with_init`].
    pub fn start_with_init<H, F>(
        &mut self,
        handler: H,
        mode: ProcessingMode,
        on_init: F,
    ) -> Result<()>
    where
        H: MutableRequestHandler,
        F: FnOnce(&[u8]) + Send + 'static,
    {
        self.core.start(
            HandlerKind::Mutable(Box::new(handler)),
            mode,
            Some(Box::new(on_init)),
        )
    }

    /// Signal cancellation and join the worker.
    pub fn stop(&mut self) {
        self.core.stop();
    }

    /// Whether the worker is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    /// Register an observer for non-fatal runtime errors.
    pub fn add_error_handler<F>(&self, handler: F) -> ErrorHandlerId
    where
        F: Fn(&ZeroBufferError) + Send + Sync + 'static,
    {
        self.core.errors.add(Box::new(handler))
    }

    /// Unregister an error observer. Returns `false` if already removed.
    pub fn remove_error_handler(&self, id: ErrorHandlerId) -> bool {
        self.core.errors.remove(id)
    }
}
