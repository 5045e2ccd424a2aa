//! EMM layer configuration
//!
//! Timer deadlines, network algorithm priority orders and store capacity.
//! The embedding node deserializes this from its YAML configuration; every
//! field has a working default.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::security::{CipheringAlgorithm, IntegrityAlgorithm};
use crate::timer::TimerPurpose;

/// Default wait for authentication material from the subscriber-data source
pub const DEFAULT_SUBSCRIBER_DATA_WAIT_MS: u64 = 2_000;
/// Default wait for an inter-node context-transfer response
pub const DEFAULT_CONTEXT_TRANSFER_WAIT_MS: u64 = 5_000;
/// Default generic procedure-retry interval
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 300;
/// Default wait for an identity response from the UE
pub const DEFAULT_IDENTITY_WAIT_MS: u64 = 6_000;
/// Default wait for an authentication response from the UE
pub const DEFAULT_AUTHENTICATION_WAIT_MS: u64 = 6_000;
/// Default upper bound on simultaneously registered contexts
pub const DEFAULT_MAX_CONTEXTS: usize = 65_536;

/// EMM context layer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmmConfig {
    /// Identity-response wait (milliseconds)
    pub t_identity_ms: u64,
    /// Authentication-response wait (milliseconds)
    pub t_authentication_ms: u64,
    /// Context-transfer-response wait (milliseconds)
    pub t_context_transfer_ms: u64,
    /// Subscriber-data-fetch wait (milliseconds)
    pub t_subscriber_data_ms: u64,
    /// Generic procedure-retry interval (milliseconds)
    pub t_retry_ms: u64,
    /// Ciphering algorithm ids in network preference order
    pub ciphering_order: Vec<u8>,
    /// Integrity algorithm ids in network preference order
    pub integrity_order: Vec<u8>,
    /// Maximum number of simultaneously registered contexts
    pub max_contexts: usize,
}

impl Default for EmmConfig {
    fn default() -> Self {
        Self {
            t_identity_ms: DEFAULT_IDENTITY_WAIT_MS,
            t_authentication_ms: DEFAULT_AUTHENTICATION_WAIT_MS,
            t_context_transfer_ms: DEFAULT_CONTEXT_TRANSFER_WAIT_MS,
            t_subscriber_data_ms: DEFAULT_SUBSCRIBER_DATA_WAIT_MS,
            t_retry_ms: DEFAULT_RETRY_INTERVAL_MS,
            ciphering_order: vec![2, 1, 0],
            integrity_order: vec![2, 1],
            max_contexts: DEFAULT_MAX_CONTEXTS,
        }
    }
}

impl EmmConfig {
    /// Deadline for a given timer purpose
    pub fn deadline(&self, purpose: TimerPurpose) -> Duration {
        let ms = match purpose {
            TimerPurpose::Identity => self.t_identity_ms,
            TimerPurpose::Authentication => self.t_authentication_ms,
            TimerPurpose::ContextTransfer => self.t_context_transfer_ms,
            TimerPurpose::SubscriberData => self.t_subscriber_data_ms,
            TimerPurpose::Retry => self.t_retry_ms,
        };
        Duration::from_millis(ms)
    }

    /// Ciphering priority order as typed algorithm ids.
    /// Unknown ids are skipped with a warning.
    pub fn ciphering_priority(&self) -> Vec<CipheringAlgorithm> {
        self.ciphering_order
            .iter()
            .filter_map(|&id| {
                let alg = CipheringAlgorithm::from_bits(id);
                if alg.is_none() {
                    log::warn!("Ignoring unknown ciphering algorithm id {id} in config");
                }
                alg
            })
            .collect()
    }

    /// Integrity priority order as typed algorithm ids.
    /// Unknown ids are skipped with a warning.
    pub fn integrity_priority(&self) -> Vec<IntegrityAlgorithm> {
        self.integrity_order
            .iter()
            .filter_map(|&id| {
                let alg = IntegrityAlgorithm::from_bits(id);
                if alg.is_none() {
                    log::warn!("Ignoring unknown integrity algorithm id {id} in config");
                }
                alg
            })
            .collect()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
