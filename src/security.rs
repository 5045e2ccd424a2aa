//! NAS security context model
//!
//! EPS NAS security state for one subscriber: the security-context record
//! (key set identifier, derived NAS keys, next-hop chaining material,
//! anti-replay counters, negotiated algorithms), the authentication-vector
//! tuple, and network-side algorithm selection. Key derivation itself is an
//! opaque provider; a default HMAC-SHA256 provider is included so the model
//! is usable out of the box.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{EmmCtxError, EmmCtxResult};
use crate::types::{KeySetId, EKSI_MAX_VALUE};

// ============================================================================
// Constants
// ============================================================================

/// NAS ciphering key length
pub const KNAS_ENC_SIZE: usize = 16;
/// NAS integrity key length
pub const KNAS_INT_SIZE: usize = 16;
/// Master key (KASME) length
pub const KASME_SIZE: usize = 32;
/// Network challenge (RAND) length
pub const RAND_SIZE: usize = 16;
/// Authentication token (AUTN) length
pub const AUTN_SIZE: usize = 16;
/// Maximum expected-response (XRES) length
pub const XRES_MAX_SIZE: usize = 16;
/// Next-hop key length
pub const NH_SIZE: usize = 32;

/// Next-hop chaining counter modulus (3-bit counter)
pub const NCC_MODULUS: u8 = 8;

/// NAS count modulus (24-bit space: 8-bit overflow + 16-bit sequence)
pub const NAS_COUNT_MODULUS: u32 = 1 << 24;

/// Successive synchronisation failures tolerated before resync is abandoned
pub const AUTH_SYNC_FAILURE_MAX: u32 = 2;

// ============================================================================
// Algorithm Enumerations
// ============================================================================

/// EPS ciphering algorithm identifier (4-bit field)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CipheringAlgorithm {
    /// EEA0 - null ciphering
    #[default]
    Eea0 = 0,
    /// 128-EEA1 - SNOW 3G
    Eea1 = 1,
    /// 128-EEA2 - AES-CTR
    Eea2 = 2,
    /// 128-EEA3 - ZUC
    Eea3 = 3,
}

impl CipheringAlgorithm {
    /// Build from a 4-bit identifier
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(CipheringAlgorithm::Eea0),
            1 => Some(CipheringAlgorithm::Eea1),
            2 => Some(CipheringAlgorithm::Eea2),
            3 => Some(CipheringAlgorithm::Eea3),
            _ => None,
        }
    }
}

/// EPS integrity algorithm identifier (4-bit field)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IntegrityAlgorithm {
    /// EIA0 - null integrity
    #[default]
    Eia0 = 0,
    /// 128-EIA1 - SNOW 3G
    Eia1 = 1,
    /// 128-EIA2 - AES-CMAC
    Eia2 = 2,
    /// 128-EIA3 - ZUC
    Eia3 = 3,
}

impl IntegrityAlgorithm {
    /// Build from a 4-bit identifier
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(IntegrityAlgorithm::Eia0),
            1 => Some(IntegrityAlgorithm::Eia1),
            2 => Some(IntegrityAlgorithm::Eia2),
            3 => Some(IntegrityAlgorithm::Eia3),
            _ => None,
        }
    }
}

/// Algorithms chosen by the network for one security context
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectedAlgorithms {
    /// Selected ciphering algorithm
    pub encryption: CipheringAlgorithm,
    /// Selected integrity algorithm
    pub integrity: IntegrityAlgorithm,
}

// ============================================================================
// UE Security Capability
// ============================================================================

/// Per-domain algorithm capability bitmaps signalled by the UE.
///
/// Bitmaps are indexed from the MSB: bit 7 corresponds to algorithm 0.
/// UMTS and GPRS records carry independent presence flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SecurityCapability {
    /// EPS ciphering algorithms (EEA bitmap)
    pub eps_encryption: u8,
    /// EPS integrity algorithms (EIA bitmap)
    pub eps_integrity: u8,
    /// UMTS ciphering algorithms (UEA bitmap)
    pub umts_encryption: u8,
    /// UMTS integrity algorithms (UIA bitmap)
    pub umts_integrity: u8,
    /// GPRS ciphering algorithms (GEA bitmap)
    pub gprs_encryption: u8,
    /// UMTS record received
    pub umts_present: bool,
    /// GPRS record received
    pub gprs_present: bool,
}

impl SecurityCapability {
    /// Whether the UE supports the given EPS ciphering algorithm
    pub fn supports_encryption(&self, alg: CipheringAlgorithm) -> bool {
        self.eps_encryption & (0x80 >> alg as u8) != 0
    }

    /// Whether the UE supports the given EPS integrity algorithm
    pub fn supports_integrity(&self, alg: IntegrityAlgorithm) -> bool {
        self.eps_integrity & (0x80 >> alg as u8) != 0
    }
}

// ============================================================================
// Security Context
// ============================================================================

/// Type of a security context
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SecurityContextType {
    /// No security context established
    #[default]
    NotAvailable,
    /// Native context, keys not yet taken into use
    PartialNative,
    /// Native context with NAS keys and selected algorithms
    FullNative,
    /// Context mapped from another system during handover/TAU
    Mapped,
}

impl SecurityContextType {
    /// Whether this is a native (non-mapped) context type
    pub fn is_native(&self) -> bool {
        matches!(
            self,
            SecurityContextType::PartialNative | SecurityContextType::FullNative
        )
    }
}

/// Per-direction NAS codec direction tag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SecurityDirection {
    /// UE to network
    #[default]
    Uplink,
    /// Network to UE
    Downlink,
}

/// One EPS NAS security context.
///
/// A subscriber owns two of these, selected by [`SecuritySlot`]: the current
/// context (activated most recently) and the non-current one. A non-current
/// native context never carries access-stratum material (NH/NCC stay zero).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityContext {
    /// Context type (native or mapped)
    pub sc_type: SecurityContextType,
    /// NAS key set identifier for E-UTRAN
    pub eksi: KeySetId,
    /// Index into the authentication-vector cache, if derived from one
    pub vector_index: Option<usize>,
    /// NAS ciphering key
    pub knas_enc: [u8; KNAS_ENC_SIZE],
    /// NAS integrity key
    pub knas_int: [u8; KNAS_INT_SIZE],
    /// Next-hop chaining counter, always in `0..NCC_MODULUS`
    pub ncc: u8,
    /// Next-hop key
    pub nh: [u8; NH_SIZE],
    /// Downlink NAS count (anti-replay, monotonic while current)
    pub dl_count: u32,
    /// Uplink NAS count (anti-replay, monotonic while current)
    pub ul_count: u32,
    /// UE security capability snapshot
    pub capability: SecurityCapability,
    /// Algorithms selected by the network
    pub selected: SelectedAlgorithms,
    /// Whether the context has been taken into use
    pub activated: bool,
    /// Codec direction for encoding
    pub direction_encode: SecurityDirection,
    /// Codec direction for decoding
    pub direction_decode: SecurityDirection,
}

/// Selects which of a subscriber's two security-context slots an operation
/// addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecuritySlot {
    /// The context activated most recently
    Current,
    /// The retired native context kept alongside the current one
    NonCurrent,
}

impl SecurityContext {
    /// Zero all key material, counters and negotiation state
    pub fn clear(&mut self) {
        *self = SecurityContext::default();
    }

    /// Set the next-hop chaining counter, rejecting out-of-range values
    pub fn set_ncc(&mut self, ncc: u8) -> EmmCtxResult<()> {
        if ncc >= NCC_MODULUS {
            return Err(EmmCtxError::InvalidArgument(format!(
                "next-hop chaining counter {ncc} out of range 0..{NCC_MODULUS}"
            )));
        }
        self.ncc = ncc;
        Ok(())
    }

    /// Drop access-stratum material. Applied when a native context is
    /// retired to the non-current slot.
    pub fn strip_access_stratum(&mut self) {
        self.ncc = 0;
        self.nh = [0u8; NH_SIZE];
    }

    /// Construct a fresh context from an inter-node transfer payload.
    ///
    /// The payload is copied, never aliased; NAS keys are re-derived through
    /// the provider from the transferred master key and algorithm selection.
    pub fn from_transfer(
        xfer: &SecurityTransfer,
        kdf: &dyn KeyDerivation,
    ) -> EmmCtxResult<SecurityContext> {
        if xfer.eksi > EKSI_MAX_VALUE {
            return Err(EmmCtxError::InvalidArgument(format!(
                "transferred key set identifier {} out of range",
                xfer.eksi
            )));
        }
        if xfer.ncc >= NCC_MODULUS {
            return Err(EmmCtxError::InvalidArgument(format!(
                "transferred chaining counter {} out of range",
                xfer.ncc
            )));
        }
        let encryption = CipheringAlgorithm::from_bits(xfer.selected_encryption).ok_or_else(
            || EmmCtxError::InvalidArgument(format!(
                "unknown transferred ciphering algorithm {}",
                xfer.selected_encryption
            )),
        )?;
        let integrity = IntegrityAlgorithm::from_bits(xfer.selected_integrity).ok_or_else(
            || EmmCtxError::InvalidArgument(format!(
                "unknown transferred integrity algorithm {}",
                xfer.selected_integrity
            )),
        )?;

        let selected = SelectedAlgorithms { encryption, integrity };
        let (knas_enc, knas_int) = kdf.derive_nas_keys(&xfer.kasme, selected);

        Ok(SecurityContext {
            sc_type: SecurityContextType::Mapped,
            eksi: KeySetId::Ksi(xfer.eksi),
            vector_index: None,
            knas_enc,
            knas_int,
            ncc: xfer.ncc,
            nh: xfer.nh,
            dl_count: xfer.dl_count,
            ul_count: xfer.ul_count,
            capability: xfer.capability,
            selected,
            activated: false,
            direction_encode: SecurityDirection::Downlink,
            direction_decode: SecurityDirection::Uplink,
        })
    }
}

// ============================================================================
// Authentication Vector
// ============================================================================

/// One EPS authentication vector, good for a single AKA attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthVector {
    /// Network challenge
    pub rand: [u8; RAND_SIZE],
    /// Expected response
    pub xres: [u8; XRES_MAX_SIZE],
    /// Significant length of the expected response
    pub xres_len: u8,
    /// Master key
    pub kasme: [u8; KASME_SIZE],
    /// Network authentication token
    pub autn: [u8; AUTN_SIZE],
}

impl AuthVector {
    /// Zero the vector contents
    pub fn clear(&mut self) {
        *self = AuthVector::default();
    }
}

// ============================================================================
// Inter-Node Transfer Payload
// ============================================================================

/// Security material carried in an inter-node context-transfer payload
/// (handover or tracking-area update with MME change).
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityTransfer {
    /// Key set identifier in use at the source node
    pub eksi: u8,
    /// Transferred master key
    pub kasme: [u8; KASME_SIZE],
    /// Transferred next-hop key
    pub nh: [u8; NH_SIZE],
    /// Transferred chaining counter
    pub ncc: u8,
    /// Uplink NAS count at transfer time
    pub ul_count: u32,
    /// Downlink NAS count at transfer time
    pub dl_count: u32,
    /// Ciphering algorithm id selected at the source node
    pub selected_encryption: u8,
    /// Integrity algorithm id selected at the source node
    pub selected_integrity: u8,
    /// UE security capability as known at the source node
    pub capability: SecurityCapability,
}

// ============================================================================
// Algorithm Negotiation
// ============================================================================

/// Choose NAS algorithms: the first entry of each network priority order
/// that the UE supports wins. Deterministic for identical inputs.
pub fn negotiate_algorithms(
    ciphering_order: &[CipheringAlgorithm],
    integrity_order: &[IntegrityAlgorithm],
    capability: &SecurityCapability,
) -> EmmCtxResult<SelectedAlgorithms> {
    let encryption = ciphering_order
        .iter()
        .copied()
        .find(|alg| capability.supports_encryption(*alg))
        .ok_or_else(|| {
            EmmCtxError::InvalidArgument(
                "no mutually supported ciphering algorithm".to_string(),
            )
        })?;
    let integrity = integrity_order
        .iter()
        .copied()
        .find(|alg| capability.supports_integrity(*alg))
        .ok_or_else(|| {
            EmmCtxError::InvalidArgument(
                "no mutually supported integrity algorithm".to_string(),
            )
        })?;
    Ok(SelectedAlgorithms { encryption, integrity })
}

// ============================================================================
// Key Derivation Provider
// ============================================================================

/// Opaque cryptographic provider for key derivation.
///
/// The context layer never interprets key material; it only asks the
/// provider to turn a master key into NAS keys or to advance the next-hop
/// chain.
pub trait KeyDerivation: Send + Sync {
    /// Derive the NAS ciphering and integrity keys for the selected
    /// algorithms from a master key.
    fn derive_nas_keys(
        &self,
        kasme: &[u8; KASME_SIZE],
        selected: SelectedAlgorithms,
    ) -> ([u8; KNAS_ENC_SIZE], [u8; KNAS_INT_SIZE]);

    /// Derive the next next-hop key from the master key and the previous
    /// chain value.
    fn derive_nh(&self, kasme: &[u8; KASME_SIZE], sync_input: &[u8; NH_SIZE]) -> [u8; NH_SIZE];
}

type HmacSha256 = Hmac<Sha256>;

const FC_EPS_ALGORITHM_KEY: u8 = 0x15;
const FC_NH_DERIVATION: u8 = 0x12;
const ALG_TYPE_NAS_ENC: u8 = 0x01;
const ALG_TYPE_NAS_INT: u8 = 0x02;

/// Default provider implementing the standard HMAC-SHA256 construction
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacSha256Kdf;

fn kdf_common(key: &[u8], fc: u8, params: &[&[u8]]) -> [u8; 32] {
    let mut s = Vec::with_capacity(1 + params.iter().map(|p| p.len() + 2).sum::<usize>());
    s.push(fc);
    for param in params {
        s.extend_from_slice(param);
        s.extend_from_slice(&(param.len() as u16).to_be_bytes());
    }

    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(&s);
    let mut output = [0u8; 32];
    output.copy_from_slice(&mac.finalize().into_bytes());
    output
}

impl KeyDerivation for HmacSha256Kdf {
    fn derive_nas_keys(
        &self,
        kasme: &[u8; KASME_SIZE],
        selected: SelectedAlgorithms,
    ) -> ([u8; KNAS_ENC_SIZE], [u8; KNAS_INT_SIZE]) {
        let enc_full = kdf_common(
            kasme,
            FC_EPS_ALGORITHM_KEY,
            &[&[ALG_TYPE_NAS_ENC], &[selected.encryption as u8]],
        );
        let int_full = kdf_common(
            kasme,
            FC_EPS_ALGORITHM_KEY,
            &[&[ALG_TYPE_NAS_INT], &[selected.integrity as u8]],
        );

        // Keys are the lower 16 bytes of the 32-byte output
        let mut knas_enc = [0u8; KNAS_ENC_SIZE];
        let mut knas_int = [0u8; KNAS_INT_SIZE];
        knas_enc.copy_from_slice(&enc_full[16..]);
        knas_int.copy_from_slice(&int_full[16..]);
        (knas_enc, knas_int)
    }

    fn derive_nh(&self, kasme: &[u8; KASME_SIZE], sync_input: &[u8; NH_SIZE]) -> [u8; NH_SIZE] {
        kdf_common(kasme, FC_NH_DERIVATION, &[sync_input])
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
