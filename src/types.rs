//! Subscriber identity and mobility value types
//!
//! Plain data carried inside an EMM context: permanent and temporary
//! identities, tracking-area bookkeeping, capability records and DRX
//! parameters. Values arrive already parsed from the NAS codec layer and are
//! stored here without reinterpreting their wire encoding.

use crate::error::{EmmCtxError, EmmCtxResult};

// ============================================================================
// Constants
// ============================================================================

/// Maximum IMSI digit count
pub const MAX_IMSI_LEN: usize = 15;
/// Maximum IMEI digit count
pub const MAX_IMEI_LEN: usize = 15;
/// Maximum IMEISV digit count
pub const MAX_IMEISV_LEN: usize = 16;

/// Highest assignable NAS key set identifier
pub const EKSI_MAX_VALUE: u8 = 6;
/// KSI wire value meaning "no key is available"
pub const KSI_NO_KEY_AVAILABLE: u8 = 7;

// ============================================================================
// PLMN / Tracking Area
// ============================================================================

/// PLMN ID
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PlmnId {
    /// MCC digit 1
    pub mcc1: u8,
    /// MCC digit 2
    pub mcc2: u8,
    /// MCC digit 3
    pub mcc3: u8,
    /// MNC digit 1
    pub mnc1: u8,
    /// MNC digit 2
    pub mnc2: u8,
    /// MNC digit 3 (0xf if 2-digit MNC)
    pub mnc3: u8,
}

impl PlmnId {
    /// Create a new PLMN ID from MCC/MNC digit strings
    pub fn new(mcc: &str, mnc: &str) -> Self {
        let mcc_bytes: Vec<u8> = mcc
            .chars()
            .filter_map(|c| c.to_digit(10).map(|d| d as u8))
            .collect();
        let mnc_bytes: Vec<u8> = mnc
            .chars()
            .filter_map(|c| c.to_digit(10).map(|d| d as u8))
            .collect();

        Self {
            mcc1: mcc_bytes.first().copied().unwrap_or(0),
            mcc2: mcc_bytes.get(1).copied().unwrap_or(0),
            mcc3: mcc_bytes.get(2).copied().unwrap_or(0),
            mnc1: mnc_bytes.first().copied().unwrap_or(0),
            mnc2: mnc_bytes.get(1).copied().unwrap_or(0),
            mnc3: mnc_bytes.get(2).copied().unwrap_or(0xf),
        }
    }

    /// Convert to BCD string
    pub fn to_bcd(&self) -> String {
        if self.mnc3 == 0xf {
            format!("{}{}{}{}{}", self.mcc1, self.mcc2, self.mcc3, self.mnc1, self.mnc2)
        } else {
            format!(
                "{}{}{}{}{}{}",
                self.mcc1, self.mcc2, self.mcc3, self.mnc1, self.mnc2, self.mnc3
            )
        }
    }
}

/// EPS TAI (Tracking Area Identity)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Tai {
    /// PLMN ID
    pub plmn_id: PlmnId,
    /// TAC (16 bits for EPS)
    pub tac: u16,
}

// ============================================================================
// Temporary Identity (GUTI)
// ============================================================================

/// EPS GUTI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Guti {
    /// PLMN ID
    pub plmn_id: PlmnId,
    /// MME Group ID
    pub mme_gid: u16,
    /// MME Code
    pub mme_code: u8,
    /// M-TMSI
    pub m_tmsi: u32,
}

// ============================================================================
// Permanent / Equipment Identities
// ============================================================================

/// IMSI, stored as BCD digits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Imsi {
    /// BCD digits (0-9 each)
    pub digits: [u8; MAX_IMSI_LEN],
    /// Number of significant digits
    pub len: usize,
}

impl Imsi {
    /// Parse from a BCD digit string
    pub fn from_bcd(bcd: &str) -> EmmCtxResult<Self> {
        parse_digits(bcd, MAX_IMSI_LEN).map(|(digits, len)| Self { digits, len })
    }

    /// Render as a BCD digit string
    pub fn to_bcd(&self) -> String {
        digits_to_string(&self.digits[..self.len])
    }
}

/// IMEI, stored as BCD digits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Imei {
    /// BCD digits
    pub digits: [u8; MAX_IMEI_LEN],
    /// Number of significant digits
    pub len: usize,
}

impl Imei {
    /// Parse from a BCD digit string
    pub fn from_bcd(bcd: &str) -> EmmCtxResult<Self> {
        parse_digits(bcd, MAX_IMEI_LEN).map(|(digits, len)| Self { digits, len })
    }

    /// Render as a BCD digit string
    pub fn to_bcd(&self) -> String {
        digits_to_string(&self.digits[..self.len])
    }
}

/// IMEISV, stored as BCD digits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Imeisv {
    /// BCD digits
    pub digits: [u8; MAX_IMEISV_LEN],
    /// Number of significant digits
    pub len: usize,
}

impl Imeisv {
    /// Parse from a BCD digit string
    pub fn from_bcd(bcd: &str) -> EmmCtxResult<Self> {
        parse_digits_sv(bcd).map(|(digits, len)| Self { digits, len })
    }

    /// Render as a BCD digit string
    pub fn to_bcd(&self) -> String {
        digits_to_string(&self.digits[..self.len])
    }
}

fn parse_digits(bcd: &str, max: usize) -> EmmCtxResult<([u8; MAX_IMSI_LEN], usize)> {
    if bcd.is_empty() || bcd.len() > max {
        return Err(EmmCtxError::InvalidArgument(format!(
            "identity digit string length {} out of range 1..={max}",
            bcd.len()
        )));
    }
    let mut digits = [0u8; MAX_IMSI_LEN];
    for (i, c) in bcd.chars().enumerate() {
        digits[i] = c
            .to_digit(10)
            .ok_or_else(|| EmmCtxError::InvalidArgument(format!("non-digit '{c}' in identity")))?
            as u8;
    }
    Ok((digits, bcd.len()))
}

fn parse_digits_sv(bcd: &str) -> EmmCtxResult<([u8; MAX_IMEISV_LEN], usize)> {
    if bcd.is_empty() || bcd.len() > MAX_IMEISV_LEN {
        return Err(EmmCtxError::InvalidArgument(format!(
            "IMEISV digit string length {} out of range 1..={MAX_IMEISV_LEN}",
            bcd.len()
        )));
    }
    let mut digits = [0u8; MAX_IMEISV_LEN];
    for (i, c) in bcd.chars().enumerate() {
        digits[i] = c
            .to_digit(10)
            .ok_or_else(|| EmmCtxError::InvalidArgument(format!("non-digit '{c}' in IMEISV")))?
            as u8;
    }
    Ok((digits, bcd.len()))
}

fn digits_to_string(digits: &[u8]) -> String {
    digits.iter().map(|d| char::from(b'0' + d)).collect()
}

// ============================================================================
// Key Set Identifier
// ============================================================================

/// NAS key set identifier for E-UTRAN.
///
/// Either a concrete value in `0..=EKSI_MAX_VALUE` or "no key available",
/// never both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum KeySetId {
    /// No key is available (wire value 7)
    #[default]
    NoKeyAvailable,
    /// Assigned key set identifier, in `0..=EKSI_MAX_VALUE`
    Ksi(u8),
}

impl KeySetId {
    /// Build from a raw wire value
    pub fn from_raw(value: u8) -> EmmCtxResult<Self> {
        match value {
            v if v <= EKSI_MAX_VALUE => Ok(KeySetId::Ksi(v)),
            KSI_NO_KEY_AVAILABLE => Ok(KeySetId::NoKeyAvailable),
            v => Err(EmmCtxError::InvalidArgument(format!(
                "key set identifier {v} out of range"
            ))),
        }
    }

    /// Concrete KSI value, if one is assigned
    pub fn value(&self) -> Option<u8> {
        match self {
            KeySetId::Ksi(v) => Some(*v),
            KeySetId::NoKeyAvailable => None,
        }
    }

    /// Raw wire value
    pub fn to_raw(&self) -> u8 {
        match self {
            KeySetId::Ksi(v) => *v,
            KeySetId::NoKeyAvailable => KSI_NO_KEY_AVAILABLE,
        }
    }
}

// ============================================================================
// Capability Records
// ============================================================================

/// UE network capability (EPS algorithm bitmaps)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UeNetworkCapability {
    /// EEA algorithms (bitmap, bit 7 = EEA0)
    pub eea: u8,
    /// EIA algorithms (bitmap, bit 7 = EIA0)
    pub eia: u8,
    /// UEA algorithms (bitmap)
    pub uea: u8,
    /// UIA algorithms (bitmap)
    pub uia: u8,
    /// IE length as received
    pub length: u8,
}

/// MS network capability (GPRS algorithm bitmap)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MsNetworkCapability {
    /// GEA algorithms (bitmap)
    pub gea: u8,
    /// IE length as received
    pub length: u8,
}

// ============================================================================
// DRX Parameter
// ============================================================================

/// DRX parameter record, stored on behalf of the radio layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrxParameter {
    /// Split PG cycle code
    pub split_pg_cycle_code: u8,
    /// CN-specific DRX cycle length coefficient and value
    pub cn_specific_drx_cycle: u8,
    /// Non-DRX timer / split on CCCH
    pub non_drx_timer: u8,
}

// ============================================================================
// Attach / Update Bookkeeping
// ============================================================================

/// EPS attach type signalled by the UE
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AttachType {
    /// EPS attach
    #[default]
    Eps,
    /// Combined EPS/IMSI attach
    Combined,
    /// Emergency attach
    Emergency,
}

/// Additional update type from combined procedures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AdditionalUpdateType {
    /// No additional information
    #[default]
    NoAdditionalInformation,
    /// SMS only
    SmsOnly,
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_imsi_bcd_round_trip() {
        let imsi = Imsi::from_bcd("001010123456789").unwrap();
        assert_eq!(imsi.len, 15);
        assert_eq!(imsi.to_bcd(), "001010123456789");
    }

    #[test]
    fn test_imsi_rejects_bad_input() {
        assert!(Imsi::from_bcd("").is_err());
        assert!(Imsi::from_bcd("0010101234567890").is_err());
        assert!(Imsi::from_bcd("00101a123456789").is_err());
    }

    #[test]
    fn test_imeisv_accepts_16_digits() {
        let imeisv = Imeisv::from_bcd("3518280071234567").unwrap();
        assert_eq!(imeisv.len, 16);
    }

    #[test]
    fn test_key_set_id_range() {
        assert_eq!(KeySetId::from_raw(0).unwrap(), KeySetId::Ksi(0));
        assert_eq!(KeySetId::from_raw(6).unwrap(), KeySetId::Ksi(6));
        assert_eq!(KeySetId::from_raw(7).unwrap(), KeySetId::NoKeyAvailable);
        assert!(KeySetId::from_raw(8).is_err());
        assert_eq!(KeySetId::Ksi(3).to_raw(), 3);
        assert_eq!(KeySetId::NoKeyAvailable.to_raw(), KSI_NO_KEY_AVAILABLE);
        assert_eq!(KeySetId::NoKeyAvailable.value(), None);
    }

    #[test]
    fn test_plmn_bcd() {
        let plmn = PlmnId::new("001", "01");
        assert_eq!(plmn.to_bcd(), "00101");
        let plmn3 = PlmnId::new("310", "410");
        assert_eq!(plmn3.to_bcd(), "310410");
    }
}
