//! Per-attribute presence and confirmation tracking
//!
//! An EMM context is populated incrementally across signalling procedures, so
//! every logical attribute carries an explicit state: `Absent` (never
//! received), `Present` (received but unconfirmed), or `Valid` (confirmed by
//! a completed procedure). The tracker enforces that a field can only be
//! confirmed after it has been received, and that dropping a field also
//! drops its confirmation. Authentication-vector cache slots are tracked the
//! same way, one state per key-set identifier.

use crate::error::{EmmCtxError, EmmCtxResult};

/// Number of authentication-vector cache slots
pub const MAX_AUTH_VECTORS: usize = 6;

// ============================================================================
// Field Enumeration
// ============================================================================

/// Logical attributes of an EMM context that are tracked individually
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CtxField {
    /// Permanent subscriber identity
    Imsi,
    /// Equipment identity
    Imei,
    /// Equipment identity with software version
    ImeiSv,
    /// Previous temporary identity
    OldGuti,
    /// Current temporary identity
    Guti,
    /// Registered tracking-area list
    TaiList,
    /// Last visited registered TAI
    LvrTai,
    /// Authentication-vector cache as a whole
    AuthVectors,
    /// Current security context
    Security,
    /// Non-current security context
    NonCurrentSecurity,
    /// UE network capability record
    UeNetworkCapability,
    /// MS network capability record
    MsNetworkCapability,
    /// Current DRX parameter
    CurrentDrxParameter,
    /// Pending DRX parameter
    PendingDrxParameter,
    /// EPS bearer context status
    EpsBearerContextStatus,
}

impl CtxField {
    /// Every tracked field, in declaration order
    pub const ALL: [CtxField; 15] = [
        CtxField::Imsi,
        CtxField::Imei,
        CtxField::ImeiSv,
        CtxField::OldGuti,
        CtxField::Guti,
        CtxField::TaiList,
        CtxField::LvrTai,
        CtxField::AuthVectors,
        CtxField::Security,
        CtxField::NonCurrentSecurity,
        CtxField::UeNetworkCapability,
        CtxField::MsNetworkCapability,
        CtxField::CurrentDrxParameter,
        CtxField::PendingDrxParameter,
        CtxField::EpsBearerContextStatus,
    ];

    /// Short display name used in diagnostic dumps
    pub fn name(&self) -> &'static str {
        match self {
            CtxField::Imsi => "imsi",
            CtxField::Imei => "imei",
            CtxField::ImeiSv => "imeisv",
            CtxField::OldGuti => "old_guti",
            CtxField::Guti => "guti",
            CtxField::TaiList => "tai_list",
            CtxField::LvrTai => "lvr_tai",
            CtxField::AuthVectors => "auth_vectors",
            CtxField::Security => "security",
            CtxField::NonCurrentSecurity => "non_current_security",
            CtxField::UeNetworkCapability => "ue_network_capability",
            CtxField::MsNetworkCapability => "ms_network_capability",
            CtxField::CurrentDrxParameter => "current_drx_parameter",
            CtxField::PendingDrxParameter => "pending_drx_parameter",
            CtxField::EpsBearerContextStatus => "eps_bearer_context_status",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

// ============================================================================
// Field State
// ============================================================================

/// Tracked state of a single attribute
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FieldState {
    /// Never received
    #[default]
    Absent,
    /// Received but not confirmed by a completed procedure
    Present,
    /// Received and confirmed
    Valid,
}

// ============================================================================
// Attribute Tracker
// ============================================================================

/// Presence/confirmation tracker for one EMM context.
///
/// `Valid` structurally implies `Present`: there is no state in which a field
/// is confirmed without being populated.
#[derive(Debug, Clone, Default)]
pub struct AttributeTracker {
    fields: [FieldState; CtxField::ALL.len()],
    vectors: [FieldState; MAX_AUTH_VECTORS],
}

impl AttributeTracker {
    /// Create a tracker with every field absent
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a field as received. An already-confirmed field stays confirmed.
    pub fn set_present(&mut self, field: CtxField) {
        let slot = &mut self.fields[field.index()];
        if *slot == FieldState::Absent {
            *slot = FieldState::Present;
        }
    }

    /// Drop a field entirely. Also drops its confirmation.
    pub fn clear_present(&mut self, field: CtxField) {
        self.fields[field.index()] = FieldState::Absent;
    }

    /// Confirm a field. Fails unless the field was received first.
    pub fn set_valid(&mut self, field: CtxField) -> EmmCtxResult<()> {
        let slot = &mut self.fields[field.index()];
        match *slot {
            FieldState::Absent => Err(EmmCtxError::InvalidArgument(format!(
                "cannot mark {} valid while absent",
                field.name()
            ))),
            FieldState::Present | FieldState::Valid => {
                *slot = FieldState::Valid;
                Ok(())
            }
        }
    }

    /// Mark a field as received and confirmed in one step. Used by setters
    /// whose value arrives already confirmed by a completed procedure.
    pub fn set_present_and_valid(&mut self, field: CtxField) {
        self.fields[field.index()] = FieldState::Valid;
    }

    /// Withdraw confirmation; the field stays present.
    pub fn clear_valid(&mut self, field: CtxField) {
        let slot = &mut self.fields[field.index()];
        if *slot == FieldState::Valid {
            *slot = FieldState::Present;
        }
    }

    /// Whether the field has been received
    pub fn is_present(&self, field: CtxField) -> bool {
        self.fields[field.index()] != FieldState::Absent
    }

    /// Whether the field has been confirmed
    pub fn is_valid(&self, field: CtxField) -> bool {
        self.fields[field.index()] == FieldState::Valid
    }

    /// Current state of a field
    pub fn state(&self, field: CtxField) -> FieldState {
        self.fields[field.index()]
    }

    /// Reset every field and vector slot to absent
    pub fn clear_all(&mut self) {
        self.fields = Default::default();
        self.vectors = Default::default();
    }

    // ========================================================================
    // Authentication-Vector Slots
    // ========================================================================

    /// Mark the vector slot for a key-set id as received
    pub fn set_vector_present(&mut self, ksi: u8) -> EmmCtxResult<()> {
        let slot = self.vector_slot_mut(ksi)?;
        if *slot == FieldState::Absent {
            *slot = FieldState::Present;
        }
        Ok(())
    }

    /// Drop the vector slot for a key-set id
    pub fn clear_vector_present(&mut self, ksi: u8) -> EmmCtxResult<()> {
        *self.vector_slot_mut(ksi)? = FieldState::Absent;
        Ok(())
    }

    /// Confirm the vector slot for a key-set id
    pub fn set_vector_valid(&mut self, ksi: u8) -> EmmCtxResult<()> {
        let slot = self.vector_slot_mut(ksi)?;
        match *slot {
            FieldState::Absent => Err(EmmCtxError::InvalidArgument(format!(
                "cannot mark vector slot {ksi} valid while absent"
            ))),
            FieldState::Present | FieldState::Valid => {
                *slot = FieldState::Valid;
                Ok(())
            }
        }
    }

    /// Withdraw confirmation of the vector slot for a key-set id
    pub fn clear_vector_valid(&mut self, ksi: u8) -> EmmCtxResult<()> {
        let slot = self.vector_slot_mut(ksi)?;
        if *slot == FieldState::Valid {
            *slot = FieldState::Present;
        }
        Ok(())
    }

    /// Whether the vector slot for a key-set id has been received
    pub fn is_vector_present(&self, ksi: u8) -> bool {
        (ksi as usize) < MAX_AUTH_VECTORS && self.vectors[ksi as usize] != FieldState::Absent
    }

    /// Whether the vector slot for a key-set id has been confirmed
    pub fn is_vector_valid(&self, ksi: u8) -> bool {
        (ksi as usize) < MAX_AUTH_VECTORS && self.vectors[ksi as usize] == FieldState::Valid
    }

    fn vector_slot_mut(&mut self, ksi: u8) -> EmmCtxResult<&mut FieldState> {
        self.vectors.get_mut(ksi as usize).ok_or_else(|| {
            EmmCtxError::InvalidArgument(format!(
                "vector slot {ksi} out of range 0..{MAX_AUTH_VECTORS}"
            ))
        })
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
