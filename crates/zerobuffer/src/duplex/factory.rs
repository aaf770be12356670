// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Factory for duplex channel endpoints.
//!
//! Encapsulates the channel naming convention (`<channel>_request` /
//! `<channel>_response`) and the construction order: servers are created
//! idle and build their buffers on `start`; clients connect immediately.

use super::server::{ImmutableDuplexServer, MutableDuplexServer, ServerOptions};
use super::DuplexClient;
use crate::error::Result;
use crate::types::BufferConfig;

/// Factory for duplex servers and clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct DuplexChannelFactory;

impl DuplexChannelFactory {
    /// Create a factory
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Create an immutable server (handler returns a response buffer) with
    /// default options.
    pub fn create_immutable_server(
        &self,
        channel: &str,
        config: BufferConfig,
    ) -> Result<ImmutableDuplexServer> {
        ImmutableDuplexServer::new(channel, config, ServerOptions::default())
    }

    /// Create an immutable server with explicit options.
    pub fn create_immutable_server_with(
        &self,
        channel: &str,
        config: BufferConfig,
        options: ServerOptions,
    ) -> Result<ImmutableDuplexServer> {
        ImmutableDuplexServer::new(channel, config, options)
    }

    /// Create a mutable server (handler transforms the request in place)
    /// with default options.
    pub fn create_mutable_server(
        &self,
        channel: &str,
        config: BufferConfig,
    ) -> Result<MutableDuplexServer> {
        MutableDuplexServer::new(channel, config, ServerOptions::default())
    }

    /// Create a mutable server with explicit options.
    pub fn create_mutable_server_with(
        &self,
        channel: &str,
        config: BufferConfig,
        options: ServerOptions,
    ) -> Result<MutableDuplexServer> {
        MutableDuplexServer::new(channel, config, options)
    }

    /// Connect a client to a running server's channel.
    pub fn create_client(&self, channel: &str) -> Result<DuplexClient> {
        DuplexClient::connect(channel)
    }
}
