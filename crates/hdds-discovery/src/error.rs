// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery error type.
//!
//! Lookups of unknown participants/entities are not errors at the facade level
//! (they return sentinels). `Error` covers what callers must act on: bad input,
//! bind/init failures, topic conflicts and malformed datagrams.

use std::fmt;

/// Errors reported by the discovery engine.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration value rejected.
    InvalidConfig(String),
    /// QoS policy is invalid (e.g., zero history depth).
    InvalidQos(String),
    /// Port formula overflowed u16 for this domain/participant index.
    PortOverflow { domain_id: u32, participant_index: u16 },

    // ========================================================================
    // Entity Errors
    // ========================================================================
    /// No local participant with this (domain, guid).
    ParticipantNotFound,
    /// No local topic with this guid or name.
    TopicNotFound,
    /// Topic exists with another type name; the first registration stands.
    TopicTypeMismatch { topic: String, existing: String, requested: String },
    /// Endpoint guid unknown to the participant.
    EndpointNotFound,
    /// Participant index space (0..120) exhausted for this domain.
    NoAvailableParticipantIndex(u32),
    /// Engine is not running (shutting down or terminated).
    InvalidState(String),

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// I/O error with underlying cause.
    Io(std::io::Error),
    /// Failed to bind a discovery socket.
    BindFailed(String),
    /// Failed to join a multicast group.
    MulticastJoinFailed(String),
    /// Send operation failed.
    SendFailed(String),

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Datagram could not be decoded.
    Malformed(String),
    /// Encoded message does not fit the transport limit.
    MessageTooLarge { size: usize, limit: usize },

    // ========================================================================
    // Security Errors
    // ========================================================================
    /// Security plugin failed to initialize the participant.
    SecurityInit(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::InvalidQos(msg) => write!(f, "Invalid QoS: {}", msg),
            Error::PortOverflow {
                domain_id,
                participant_index,
            } => write!(
                f,
                "Port overflow for domain {} participant index {}",
                domain_id, participant_index
            ),
            Error::ParticipantNotFound => write!(f, "Participant not found"),
            Error::TopicNotFound => write!(f, "Topic not found"),
            Error::TopicTypeMismatch {
                topic,
                existing,
                requested,
            } => write!(
                f,
                "Topic '{}' already registered with type '{}' (requested '{}')",
                topic, existing, requested
            ),
            Error::EndpointNotFound => write!(f, "Endpoint not found"),
            Error::NoAvailableParticipantIndex(domain) => write!(
                f,
                "No available participant index: all 120 slots in use for domain {}",
                domain
            ),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::BindFailed(msg) => write!(f, "Bind failed: {}", msg),
            Error::MulticastJoinFailed(msg) => write!(f, "Multicast join failed: {}", msg),
            Error::SendFailed(msg) => write!(f, "Send failed: {}", msg),
            Error::Malformed(msg) => write!(f, "Malformed datagram: {}", msg),
            Error::MessageTooLarge { size, limit } => {
                write!(f, "Message too large: {} bytes (limit {})", size, limit)
            }
            Error::SecurityInit(msg) => write!(f, "Security init failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Convenient alias for results using the crate `Error` type.
pub type Result<T> = core::result::Result<T, Error>;
