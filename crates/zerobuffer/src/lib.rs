// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # ZeroBuffer - shared-memory ring buffer IPC
//!
//! A single-producer / single-consumer inter-process transport for large,
//! variably sized frames (video, sensor, telemetry) built on a lock-free
//! shared-memory ring buffer with named counting semaphores for wakeup.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use zerobuffer::{BufferConfig, Reader, Writer, Result};
//! use std::time::Duration;
//!
//! fn main() -> Result<()> {
//!     // The consumer owns the buffer
//!     let mut reader = Reader::create("cam0", BufferConfig::new(4096, 10 << 20))?;
//!
//!     // The producer attaches by name (typically from another process)
//!     let mut writer = Writer::connect("cam0")?;
//!     writer.set_metadata(b"format=bgr24")?;
//!     writer.write_frame(&[0x46; 1024])?;
//!
//!     // Frames are zero-copy views; dropping one releases its slot
//!     if let Some(frame) = reader.read_frame(Duration::from_secs(1))? {
//!         assert_eq!(frame.sequence(), 1);
//!         assert_eq!(frame.size(), 1024);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +------------------+                    +------------------+
//! |   Process A      |   Shared Memory    |   Process B      |
//! |     Writer       |  [OIEB|meta|ring]  |     Reader       |
//! |        |         |                    |        |         |
//! |        v         |   sem-w (data)     |        v         |
//! |   write_frame  --+--------------------+-> read_frame     |
//! |   capacity wait <-+-------------------+-- Frame::drop    |
//! +------------------+   sem-r (space)    +------------------+
//! ```
//!
//! The Reader creates the segment, both semaphores, and a pid lock file;
//! the Writer attaches by name. Frames carry dense sequence numbers
//! starting at 1; wrap-around is handled with in-band wrap markers so the
//! consumer's decode loop has a single uniform path.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Reader`] | Buffer owner; consumes frames, detects a dead writer |
//! | [`Writer`] | Buffer attacher; produces frames, detects a dead reader |
//! | [`Frame`] | Zero-copy frame view; drop releases the ring slot |
//! | [`BufferConfig`] | Metadata/payload region sizing |
//! | [`DuplexChannelFactory`] | Request/response channels over buffer pairs |
//!
//! ## Duplex Channels
//!
//! A duplex channel pairs two buffers (`<name>_request`,
//! `<name>_response`) into a request/response transport with
//! sequence-correlated replies. See [`duplex`].

pub mod duplex;
pub mod error;
pub mod frame;
pub mod oieb;
pub mod platform;
pub mod reader;
pub mod resources;
pub mod types;
pub mod writer;

pub use duplex::{
    DuplexChannelFactory, DuplexClient, DuplexResponse, ErrorHandlerId, ImmutableDuplexServer,
    MutableDuplexServer, MutableRequestHandler, ProcessingMode, RequestHandler, ServerOptions,
};
pub use error::{Result, ZeroBufferError};
pub use frame::Frame;
pub use oieb::{Oieb, ProtocolVersion, OIEB_SIZE};
pub use reader::Reader;
pub use resources::{cleanup_stale_resources, BufferResources};
pub use types::{BufferConfig, FrameHeader, FRAME_HEADER_SIZE};
pub use writer::Writer;
