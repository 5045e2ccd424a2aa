//! EPS Mobility Management Context Library
//!
//! Per-subscriber EMM state for an MME-style node as specified in
//! 3GPP TS 24.301: identities and mobility bookkeeping, the two-slot NAS
//! security context with its authentication-vector cache, per-attribute
//! presence/confirmation tracking, and the procedure timers that drive
//! retransmission.
//!
//! # Features
//!
//! - Context store with IMSI and GUTI secondary indexes
//! - Typed attribute tracker (absent / present / valid per field)
//! - Current and non-current security context slots with NH chaining
//! - Algorithm negotiation against the UE security capability
//! - Pluggable key derivation with a default HMAC-SHA256 provider
//! - Poll-driven per-subscriber timers with retransmission budgets
//!
//! # Example
//!
//! ```rust
//! use emm_context::prelude::*;
//!
//! let config = EmmConfig::default();
//! let store = EmmContextStore::new(&config);
//!
//! let ctx = store.create().unwrap();
//! let mut guard = ctx.lock().unwrap();
//! let ue_id = guard.ue_id();
//!
//! let imsi = Imsi::from_bcd("001010123456789").unwrap();
//! guard.set_valid_imsi(imsi);
//! drop(guard);
//!
//! store.index_by_imsi(imsi, ue_id).unwrap();
//! assert!(store.get_by_imsi(&imsi).is_some());
//! ```

pub mod attributes;
pub mod config;
pub mod context;
pub mod error;
pub mod security;
pub mod store;
pub mod timer;
pub mod types;

#[cfg(test)]
mod property_tests;

pub use error::{EmmCtxError, EmmCtxResult};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::attributes::{AttributeTracker, CtxField, FieldState, MAX_AUTH_VECTORS};
    pub use crate::config::EmmConfig;
    pub use crate::context::{EmmContext, RetirePolicy, UeId};
    pub use crate::error::{EmmCtxError, EmmCtxResult};
    pub use crate::security::{
        AuthVector, CipheringAlgorithm, HmacSha256Kdf, IntegrityAlgorithm, KeyDerivation,
        negotiate_algorithms, SecurityCapability, SecurityContext, SecurityContextType,
        SecuritySlot, SecurityTransfer, SelectedAlgorithms,
    };
    pub use crate::store::{EmmContextRef, EmmContextStore};
    pub use crate::timer::{EmmTimerMgr, TimerCallback, TimerEvent, TimerPurpose};
    pub use crate::types::{
        AdditionalUpdateType, AttachType, DrxParameter, Guti, Imei, Imeisv, Imsi, KeySetId,
        MsNetworkCapability, PlmnId, Tai, UeNetworkCapability,
    };
}
