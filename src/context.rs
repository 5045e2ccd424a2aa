//! Per-subscriber EMM context
//!
//! One [`EmmContext`] exists per attached UE. It owns the subscriber's
//! identities, mobility bookkeeping, both security-context slots and the
//! authentication-vector cache, and is populated incrementally as signalling
//! procedures complete. Every mutator keeps the attribute tracker in step
//! with the stored value, so a reader holding the context exclusively never
//! observes one without the other.

use std::any::Any;
use std::fmt;
use std::fmt::Write as _;

use crate::attributes::{AttributeTracker, CtxField, FieldState, MAX_AUTH_VECTORS};
use crate::error::{EmmCtxError, EmmCtxResult};
use crate::security::{
    AUTH_SYNC_FAILURE_MAX, AuthVector, CipheringAlgorithm, IntegrityAlgorithm, KeyDerivation,
    NAS_COUNT_MODULUS, NCC_MODULUS, negotiate_algorithms, SecurityCapability, SecurityContext,
    SecuritySlot, SelectedAlgorithms,
};
use crate::types::{
    AdditionalUpdateType, AttachType, DrxParameter, Guti, Imei, Imeisv, Imsi, KeySetId,
    MsNetworkCapability, Tai, UeNetworkCapability,
};

/// Node-local UE identifier, primary key of the context store
pub type UeId = u32;

/// What to do with the previous current security context on activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetirePolicy {
    /// Keep the previous native context in the non-current slot
    RetireToNonCurrent,
    /// Drop the previous context entirely
    Discard,
}

// ============================================================================
// EMM Context
// ============================================================================

/// EMM context established by the network for a particular UE
pub struct EmmContext {
    ue_id: UeId,

    /// Dynamically allocated context indicator
    pub is_dynamic: bool,
    /// Emergency bearer services indicator
    pub is_emergency: bool,
    /// UE has completed an attach at least once
    pub has_been_attached: bool,
    /// The IMSI was used for identification in the initial NAS message
    pub initial_identity_was_imsi: bool,
    /// Initial attach carried a GUTI
    pub is_guti_based_attach: bool,
    /// EPS attach type
    pub attach_type: AttachType,
    /// Additional update type from combined procedures
    pub additional_update_type: AdditionalUpdateType,
    /// Cause code of the last procedure failure
    pub emm_cause: Option<u8>,
    /// Key set identifier signalled outside any security context
    pub ksi: KeySetId,
    /// TAI the initial message arrived from
    pub originating_tai: Tai,
    /// IMSI retained across identification restarts
    pub saved_imsi: Option<Imsi>,

    imsi: Imsi,
    imei: Imei,
    imeisv: Imeisv,
    guti: Guti,
    old_guti: Guti,
    tai_list: Vec<Tai>,
    lvr_tai: Tai,

    ue_network_capability: UeNetworkCapability,
    ms_network_capability: MsNetworkCapability,
    pending_drx_parameter: DrxParameter,
    current_drx_parameter: DrxParameter,
    eps_bearer_context_status: u16,

    security: SecurityContext,
    non_current_security: SecurityContext,
    vectors: [AuthVector; MAX_AUTH_VECTORS],
    remaining_vectors: usize,
    auth_sync_fail_count: u32,

    procedures: Option<Box<dyn Any + Send>>,
    tracker: AttributeTracker,
}

impl EmmContext {
    /// Create a context with every field absent and default flags
    pub fn new(ue_id: UeId) -> Self {
        Self {
            ue_id,
            is_dynamic: false,
            is_emergency: false,
            has_been_attached: false,
            initial_identity_was_imsi: false,
            is_guti_based_attach: false,
            attach_type: AttachType::default(),
            additional_update_type: AdditionalUpdateType::default(),
            emm_cause: None,
            ksi: KeySetId::default(),
            originating_tai: Tai::default(),
            saved_imsi: None,
            imsi: Imsi::default(),
            imei: Imei::default(),
            imeisv: Imeisv::default(),
            guti: Guti::default(),
            old_guti: Guti::default(),
            tai_list: Vec::new(),
            lvr_tai: Tai::default(),
            ue_network_capability: UeNetworkCapability::default(),
            ms_network_capability: MsNetworkCapability::default(),
            pending_drx_parameter: DrxParameter::default(),
            current_drx_parameter: DrxParameter::default(),
            eps_bearer_context_status: 0,
            security: SecurityContext::default(),
            non_current_security: SecurityContext::default(),
            vectors: [AuthVector::default(); MAX_AUTH_VECTORS],
            remaining_vectors: 0,
            auth_sync_fail_count: 0,
            procedures: None,
            tracker: AttributeTracker::new(),
        }
    }

    /// Node-local UE identifier (immutable after creation)
    pub fn ue_id(&self) -> UeId {
        self.ue_id
    }

    /// Read-only view of the attribute tracker
    pub fn tracker(&self) -> &AttributeTracker {
        &self.tracker
    }

    /// Confirm a field after a procedure completed. Fails if the field was
    /// never populated.
    pub fn mark_valid(&mut self, field: CtxField) -> EmmCtxResult<()> {
        self.tracker.set_valid(field)
    }

    /// Withdraw confirmation of a field
    pub fn mark_unconfirmed(&mut self, field: CtxField) {
        self.tracker.clear_valid(field);
    }

    // ========================================================================
    // Identity Fields
    // ========================================================================

    /// Permanent identity, if populated
    pub fn imsi(&self) -> Option<&Imsi> {
        self.tracker.is_present(CtxField::Imsi).then_some(&self.imsi)
    }

    /// Store the IMSI as received (unconfirmed)
    pub fn set_imsi(&mut self, imsi: Imsi) {
        self.imsi = imsi;
        self.tracker.set_present(CtxField::Imsi);
    }

    /// Store the IMSI as confirmed by an identification procedure
    pub fn set_valid_imsi(&mut self, imsi: Imsi) {
        self.imsi = imsi;
        self.tracker.set_present_and_valid(CtxField::Imsi);
    }

    /// Drop the IMSI
    pub fn clear_imsi(&mut self) {
        self.imsi = Imsi::default();
        self.tracker.clear_present(CtxField::Imsi);
    }

    /// Equipment identity, if populated
    pub fn imei(&self) -> Option<&Imei> {
        self.tracker.is_present(CtxField::Imei).then_some(&self.imei)
    }

    /// Store the IMEI as received
    pub fn set_imei(&mut self, imei: Imei) {
        self.imei = imei;
        self.tracker.set_present(CtxField::Imei);
    }

    /// Store the IMEI as confirmed
    pub fn set_valid_imei(&mut self, imei: Imei) {
        self.imei = imei;
        self.tracker.set_present_and_valid(CtxField::Imei);
    }

    /// Drop the IMEI
    pub fn clear_imei(&mut self) {
        self.imei = Imei::default();
        self.tracker.clear_present(CtxField::Imei);
    }

    /// Equipment identity with software version, if populated
    pub fn imeisv(&self) -> Option<&Imeisv> {
        self.tracker.is_present(CtxField::ImeiSv).then_some(&self.imeisv)
    }

    /// Store the IMEISV as received
    pub fn set_imeisv(&mut self, imeisv: Imeisv) {
        self.imeisv = imeisv;
        self.tracker.set_present(CtxField::ImeiSv);
    }

    /// Store the IMEISV as confirmed
    pub fn set_valid_imeisv(&mut self, imeisv: Imeisv) {
        self.imeisv = imeisv;
        self.tracker.set_present_and_valid(CtxField::ImeiSv);
    }

    /// Drop the IMEISV
    pub fn clear_imeisv(&mut self) {
        self.imeisv = Imeisv::default();
        self.tracker.clear_present(CtxField::ImeiSv);
    }

    /// Current temporary identity, if populated
    pub fn guti(&self) -> Option<&Guti> {
        self.tracker.is_present(CtxField::Guti).then_some(&self.guti)
    }

    /// Store a freshly assigned GUTI (unconfirmed until the UE acknowledges)
    pub fn set_guti(&mut self, guti: Guti) {
        self.guti = guti;
        self.tracker.set_present(CtxField::Guti);
    }

    /// Store the GUTI as confirmed
    pub fn set_valid_guti(&mut self, guti: Guti) {
        self.guti = guti;
        self.tracker.set_present_and_valid(CtxField::Guti);
    }

    /// Drop the GUTI
    pub fn clear_guti(&mut self) {
        self.guti = Guti::default();
        self.tracker.clear_present(CtxField::Guti);
    }

    /// Previous temporary identity, if populated
    pub fn old_guti(&self) -> Option<&Guti> {
        self.tracker.is_present(CtxField::OldGuti).then_some(&self.old_guti)
    }

    /// Store the previous GUTI as received
    pub fn set_old_guti(&mut self, guti: Guti) {
        self.old_guti = guti;
        self.tracker.set_present(CtxField::OldGuti);
    }

    /// Store the previous GUTI as confirmed
    pub fn set_valid_old_guti(&mut self, guti: Guti) {
        self.old_guti = guti;
        self.tracker.set_present_and_valid(CtxField::OldGuti);
    }

    /// Drop the previous GUTI
    pub fn clear_old_guti(&mut self) {
        self.old_guti = Guti::default();
        self.tracker.clear_present(CtxField::OldGuti);
    }

    // ========================================================================
    // Area Bookkeeping
    // ========================================================================

    /// Registered tracking-area list, if populated
    pub fn tai_list(&self) -> Option<&[Tai]> {
        self.tracker
            .is_present(CtxField::TaiList)
            .then_some(self.tai_list.as_slice())
    }

    /// Store the registered tracking-area list (network-assigned, confirmed)
    pub fn set_valid_tai_list(&mut self, tai_list: Vec<Tai>) {
        self.tai_list = tai_list;
        self.tracker.set_present_and_valid(CtxField::TaiList);
    }

    /// Drop the tracking-area list and release its storage
    pub fn clear_tai_list(&mut self) {
        self.tai_list = Vec::new();
        self.tracker.clear_present(CtxField::TaiList);
    }

    /// Last visited registered TAI, if populated
    pub fn lvr_tai(&self) -> Option<&Tai> {
        self.tracker.is_present(CtxField::LvrTai).then_some(&self.lvr_tai)
    }

    /// Store the last visited registered TAI as received
    pub fn set_lvr_tai(&mut self, tai: Tai) {
        self.lvr_tai = tai;
        self.tracker.set_present(CtxField::LvrTai);
    }

    /// Store the last visited registered TAI as confirmed
    pub fn set_valid_lvr_tai(&mut self, tai: Tai) {
        self.lvr_tai = tai;
        self.tracker.set_present_and_valid(CtxField::LvrTai);
    }

    /// Drop the last visited registered TAI
    pub fn clear_lvr_tai(&mut self) {
        self.lvr_tai = Tai::default();
        self.tracker.clear_present(CtxField::LvrTai);
    }

    // ========================================================================
    // Capability / DRX / Bearer Status
    // ========================================================================

    /// UE network capability record, if populated
    pub fn ue_network_capability(&self) -> Option<&UeNetworkCapability> {
        self.tracker
            .is_present(CtxField::UeNetworkCapability)
            .then_some(&self.ue_network_capability)
    }

    /// Store the UE network capability as received
    pub fn set_ue_network_capability(&mut self, cap: UeNetworkCapability) {
        self.ue_network_capability = cap;
        self.tracker.set_present(CtxField::UeNetworkCapability);
    }

    /// Store the UE network capability as confirmed (replayed under security)
    pub fn set_valid_ue_network_capability(&mut self, cap: UeNetworkCapability) {
        self.ue_network_capability = cap;
        self.tracker.set_present_and_valid(CtxField::UeNetworkCapability);
    }

    /// Drop the UE network capability
    pub fn clear_ue_network_capability(&mut self) {
        self.ue_network_capability = UeNetworkCapability::default();
        self.tracker.clear_present(CtxField::UeNetworkCapability);
    }

    /// MS network capability record, if populated
    pub fn ms_network_capability(&self) -> Option<&MsNetworkCapability> {
        self.tracker
            .is_present(CtxField::MsNetworkCapability)
            .then_some(&self.ms_network_capability)
    }

    /// Store the MS network capability as received
    pub fn set_ms_network_capability(&mut self, cap: MsNetworkCapability) {
        self.ms_network_capability = cap;
        self.tracker.set_present(CtxField::MsNetworkCapability);
    }

    /// Store the MS network capability as confirmed
    pub fn set_valid_ms_network_capability(&mut self, cap: MsNetworkCapability) {
        self.ms_network_capability = cap;
        self.tracker.set_present_and_valid(CtxField::MsNetworkCapability);
    }

    /// Drop the MS network capability
    pub fn clear_ms_network_capability(&mut self) {
        self.ms_network_capability = MsNetworkCapability::default();
        self.tracker.clear_present(CtxField::MsNetworkCapability);
    }

    /// Pending DRX parameter, if populated
    pub fn pending_drx_parameter(&self) -> Option<&DrxParameter> {
        self.tracker
            .is_present(CtxField::PendingDrxParameter)
            .then_some(&self.pending_drx_parameter)
    }

    /// Store a pending DRX parameter as received
    pub fn set_pending_drx_parameter(&mut self, drx: DrxParameter) {
        self.pending_drx_parameter = drx;
        self.tracker.set_present(CtxField::PendingDrxParameter);
    }

    /// Drop the pending DRX parameter
    pub fn clear_pending_drx_parameter(&mut self) {
        self.pending_drx_parameter = DrxParameter::default();
        self.tracker.clear_present(CtxField::PendingDrxParameter);
    }

    /// Current DRX parameter, if populated
    pub fn current_drx_parameter(&self) -> Option<&DrxParameter> {
        self.tracker
            .is_present(CtxField::CurrentDrxParameter)
            .then_some(&self.current_drx_parameter)
    }

    /// Promote a DRX parameter to current (confirmed)
    pub fn set_valid_current_drx_parameter(&mut self, drx: DrxParameter) {
        self.current_drx_parameter = drx;
        self.tracker.set_present_and_valid(CtxField::CurrentDrxParameter);
    }

    /// Drop the current DRX parameter
    pub fn clear_current_drx_parameter(&mut self) {
        self.current_drx_parameter = DrxParameter::default();
        self.tracker.clear_present(CtxField::CurrentDrxParameter);
    }

    /// EPS bearer context status, if populated
    pub fn eps_bearer_context_status(&self) -> Option<u16> {
        self.tracker
            .is_present(CtxField::EpsBearerContextStatus)
            .then_some(self.eps_bearer_context_status)
    }

    /// Store the EPS bearer context status as received
    pub fn set_eps_bearer_context_status(&mut self, status: u16) {
        self.eps_bearer_context_status = status;
        self.tracker.set_present(CtxField::EpsBearerContextStatus);
    }

    // ========================================================================
    // External Procedure Record
    // ========================================================================

    /// Attach the driver-owned procedure record
    pub fn set_procedures(&mut self, procedures: Box<dyn Any + Send>) {
        self.procedures = Some(procedures);
    }

    /// Detach and return the procedure record
    pub fn take_procedures(&mut self) -> Option<Box<dyn Any + Send>> {
        self.procedures.take()
    }

    /// Whether a procedure record is attached
    pub fn has_procedures(&self) -> bool {
        self.procedures.is_some()
    }

    // ========================================================================
    // Security Context Management
    // ========================================================================

    /// Security context in the given slot
    pub fn security(&self, slot: SecuritySlot) -> &SecurityContext {
        match slot {
            SecuritySlot::Current => &self.security,
            SecuritySlot::NonCurrent => &self.non_current_security,
        }
    }

    fn security_mut(&mut self, slot: SecuritySlot) -> &mut SecurityContext {
        match slot {
            SecuritySlot::Current => &mut self.security,
            SecuritySlot::NonCurrent => &mut self.non_current_security,
        }
    }

    fn security_field(slot: SecuritySlot) -> CtxField {
        match slot {
            SecuritySlot::Current => CtxField::Security,
            SecuritySlot::NonCurrent => CtxField::NonCurrentSecurity,
        }
    }

    /// Set the type of the security context in the given slot
    pub fn set_security_type(
        &mut self,
        slot: SecuritySlot,
        sc_type: crate::security::SecurityContextType,
    ) {
        self.security_mut(slot).sc_type = sc_type;
        self.tracker.set_present(Self::security_field(slot));
    }

    /// Set the key set identifier of the current security context
    pub fn set_security_eksi(&mut self, eksi: KeySetId) {
        self.security.eksi = eksi;
        self.tracker.set_present(CtxField::Security);
    }

    /// Store the UE security capability snapshot on the current context
    pub fn set_security_capability(&mut self, capability: SecurityCapability) {
        self.security.capability = capability;
        self.tracker.set_present(CtxField::Security);
    }

    /// Point a security context at an authentication-vector cache slot.
    ///
    /// The referenced slot must be present and valid.
    pub fn set_vector_index(&mut self, slot: SecuritySlot, index: usize) -> EmmCtxResult<()> {
        if index >= MAX_AUTH_VECTORS {
            return Err(EmmCtxError::InvalidArgument(format!(
                "vector index {index} out of range 0..{MAX_AUTH_VECTORS}"
            )));
        }
        if !self.tracker.is_vector_valid(index as u8) {
            return Err(EmmCtxError::InvalidArgument(format!(
                "vector index {index} references a slot that is not valid"
            )));
        }
        self.security_mut(slot).vector_index = Some(index);
        Ok(())
    }

    /// Clear the vector reference of a security context
    pub fn clear_vector_index(&mut self, slot: SecuritySlot) {
        self.security_mut(slot).vector_index = None;
    }

    /// Zero the current security context: key material, counters,
    /// negotiation state and its tracker bits.
    pub fn clear_security(&mut self) {
        log::debug!("UE {} clearing current security context", self.ue_id);
        self.security.clear();
        self.tracker.clear_present(CtxField::Security);
    }

    /// Zero the non-current security context and its tracker bits
    pub fn clear_non_current_security(&mut self) {
        self.non_current_security.clear();
        self.tracker.clear_present(CtxField::NonCurrentSecurity);
    }

    /// Promote a just-derived security context to current.
    ///
    /// The previous current context is retired to the non-current slot or
    /// discarded per `retire`; a mapped context is never retained as
    /// non-current. A successful activation resets the synchronisation
    /// failure counter.
    pub fn activate_security(
        &mut self,
        mut fresh: SecurityContext,
        retire: RetirePolicy,
    ) -> EmmCtxResult<()> {
        if fresh.eksi.value().is_none() {
            return Err(EmmCtxError::InvalidArgument(
                "cannot activate a security context without a key set identifier".to_string(),
            ));
        }
        if let Some(index) = fresh.vector_index {
            if index >= MAX_AUTH_VECTORS || !self.tracker.is_vector_valid(index as u8) {
                return Err(EmmCtxError::InvalidArgument(format!(
                    "activation references invalid vector slot {index}"
                )));
            }
        }
        if fresh.ncc >= NCC_MODULUS {
            return Err(EmmCtxError::InvalidArgument(format!(
                "activation carries chaining counter {} out of range",
                fresh.ncc
            )));
        }

        if self.tracker.is_present(CtxField::Security) {
            match retire {
                RetirePolicy::RetireToNonCurrent if self.security.sc_type.is_native() => {
                    let mut retired = std::mem::take(&mut self.security);
                    retired.activated = false;
                    // A non-current native context carries no AS material
                    retired.strip_access_stratum();
                    self.non_current_security = retired;
                    self.tracker.set_present_and_valid(CtxField::NonCurrentSecurity);
                }
                RetirePolicy::RetireToNonCurrent => {
                    log::debug!(
                        "UE {} discarding mapped context instead of retiring it",
                        self.ue_id
                    );
                }
                RetirePolicy::Discard => {}
            }
        }

        fresh.activated = true;
        log::debug!(
            "UE {} activated security context eksi={:?} type={:?}",
            self.ue_id,
            fresh.eksi,
            fresh.sc_type
        );
        self.security = fresh;
        self.tracker.set_present_and_valid(CtxField::Security);
        self.auth_sync_fail_count = 0;
        Ok(())
    }

    /// Negotiate NAS algorithms against the current context's capability
    /// snapshot and record the selection on the current context.
    pub fn select_security_algorithms(
        &mut self,
        ciphering_order: &[CipheringAlgorithm],
        integrity_order: &[IntegrityAlgorithm],
    ) -> EmmCtxResult<SelectedAlgorithms> {
        let selected =
            negotiate_algorithms(ciphering_order, integrity_order, &self.security.capability)?;
        self.security.selected = selected;
        Ok(selected)
    }

    /// Advance the next-hop key chain for handover.
    ///
    /// Requires the current context to reference a present vector slot for
    /// its master key. Returns the new chaining counter.
    pub fn advance_nh_chain(&mut self, kdf: &dyn KeyDerivation) -> EmmCtxResult<u8> {
        let index = self.security.vector_index.ok_or_else(|| {
            EmmCtxError::InvalidArgument(
                "current security context has no vector reference for NH derivation".to_string(),
            )
        })?;
        if !self.tracker.is_vector_present(index as u8) {
            return Err(EmmCtxError::InvalidArgument(format!(
                "vector slot {index} no longer present for NH derivation"
            )));
        }
        let kasme = self.vectors[index].kasme;
        self.security.nh = kdf.derive_nh(&kasme, &self.security.nh);
        self.security.ncc = (self.security.ncc + 1) % NCC_MODULUS;
        Ok(self.security.ncc)
    }

    /// Record a received uplink NAS count. Rejects replays (decreases).
    pub fn update_ul_count(&mut self, count: u32) -> EmmCtxResult<()> {
        if count < self.security.ul_count {
            return Err(EmmCtxError::InvalidArgument(format!(
                "uplink NAS count {count} below current {}",
                self.security.ul_count
            )));
        }
        self.security.ul_count = count;
        Ok(())
    }

    /// Take the next downlink NAS count value. Counts advance modulo the
    /// 24-bit NAS count space; a wrap means the context has outlived its
    /// count space and the driver should re-key.
    pub fn next_dl_count(&mut self) -> u32 {
        let count = self.security.dl_count;
        self.security.dl_count = count.wrapping_add(1) % NAS_COUNT_MODULUS;
        if self.security.dl_count == 0 {
            log::warn!("UE {} downlink NAS count wrapped", self.ue_id);
        }
        count
    }

    // ========================================================================
    // Authentication-Vector Cache
    // ========================================================================

    /// Cached vector for a key-set id, if its slot is present
    pub fn vector(&self, ksi: u8) -> Option<&AuthVector> {
        self.tracker
            .is_vector_present(ksi)
            .then(|| &self.vectors[ksi as usize])
    }

    /// Number of unused cached vectors
    pub fn remaining_vectors(&self) -> usize {
        self.remaining_vectors
    }

    /// Store a fresh authentication vector in the slot for `ksi`
    pub fn store_vector(&mut self, ksi: u8, vector: AuthVector) -> EmmCtxResult<()> {
        let was_present = self.tracker.is_vector_present(ksi);
        self.tracker.set_vector_present(ksi)?;
        self.tracker.set_vector_valid(ksi)?;
        self.vectors[ksi as usize] = vector;
        if !was_present {
            self.remaining_vectors += 1;
        }
        self.tracker.set_present_and_valid(CtxField::AuthVectors);
        log::debug!(
            "UE {} cached auth vector ksi={ksi}, {} remaining",
            self.ue_id,
            self.remaining_vectors
        );
        Ok(())
    }

    /// Consume the vector for `ksi`: the slot becomes absent and invalid,
    /// the remaining counter decrements (never below zero), and any security
    /// context referencing the slot drops its reference.
    pub fn consume_vector(&mut self, ksi: u8) -> EmmCtxResult<()> {
        if !self.tracker.is_vector_present(ksi) {
            return Err(EmmCtxError::NotFound(format!(
                "no cached auth vector for ksi {ksi}"
            )));
        }
        self.tracker.clear_vector_present(ksi)?;
        self.vectors[ksi as usize].clear();
        self.remaining_vectors = self.remaining_vectors.saturating_sub(1);

        let index = ksi as usize;
        if self.security.vector_index == Some(index) {
            self.security.vector_index = None;
        }
        if self.non_current_security.vector_index == Some(index) {
            self.non_current_security.vector_index = None;
        }
        if self.remaining_vectors == 0 {
            self.tracker.clear_present(CtxField::AuthVectors);
        }
        log::debug!(
            "UE {} consumed auth vector ksi={ksi}, {} remaining",
            self.ue_id,
            self.remaining_vectors
        );
        Ok(())
    }

    /// Drop the whole vector cache
    pub fn clear_auth_vectors(&mut self) {
        for ksi in 0..MAX_AUTH_VECTORS as u8 {
            if self.tracker.is_vector_present(ksi) {
                // Range is checked above, the clear cannot fail
                let _ = self.tracker.clear_vector_present(ksi);
                self.vectors[ksi as usize].clear();
            }
        }
        self.remaining_vectors = 0;
        self.security.vector_index = None;
        self.non_current_security.vector_index = None;
        self.tracker.clear_present(CtxField::AuthVectors);
    }

    /// Record an authentication synchronisation failure.
    ///
    /// Returns the updated counter, or [`EmmCtxError::SyncFailureTerminal`]
    /// once the limit has been reached: the caller must abandon resync and
    /// take a recovery decision instead of retrying.
    pub fn record_sync_failure(&mut self) -> EmmCtxResult<u32> {
        if self.auth_sync_fail_count >= AUTH_SYNC_FAILURE_MAX {
            log::warn!(
                "UE {} exceeded {} authentication sync failures",
                self.ue_id,
                AUTH_SYNC_FAILURE_MAX
            );
            return Err(EmmCtxError::SyncFailureTerminal(self.auth_sync_fail_count));
        }
        self.auth_sync_fail_count += 1;
        Ok(self.auth_sync_fail_count)
    }

    /// Successive synchronisation failures recorded so far
    pub fn sync_failure_count(&self) -> u32 {
        self.auth_sync_fail_count
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Release all content, keeping only the UE identifier
    pub fn free_content(&mut self) {
        let ue_id = self.ue_id;
        *self = EmmContext::new(ue_id);
    }

    /// Release all content except the subscriber and equipment identities
    /// and their tracker states. Used when re-keying security state without
    /// losing who the subscriber is.
    pub fn free_content_except_identity(&mut self) {
        let saved = [
            (CtxField::Imsi, self.tracker.state(CtxField::Imsi)),
            (CtxField::Imei, self.tracker.state(CtxField::Imei)),
            (CtxField::ImeiSv, self.tracker.state(CtxField::ImeiSv)),
            (CtxField::Guti, self.tracker.state(CtxField::Guti)),
            (CtxField::OldGuti, self.tracker.state(CtxField::OldGuti)),
        ];
        let imsi = self.imsi;
        let imei = self.imei;
        let imeisv = self.imeisv;
        let guti = self.guti;
        let old_guti = self.old_guti;
        let saved_imsi = self.saved_imsi;

        self.free_content();

        self.imsi = imsi;
        self.imei = imei;
        self.imeisv = imeisv;
        self.guti = guti;
        self.old_guti = old_guti;
        self.saved_imsi = saved_imsi;
        for (field, state) in saved {
            match state {
                FieldState::Absent => {}
                FieldState::Present => self.tracker.set_present(field),
                FieldState::Valid => self.tracker.set_present_and_valid(field),
            }
        }
    }

    // ========================================================================
    // Diagnostic Snapshot
    // ========================================================================

    /// Read-only diagnostic dump of every field with its tracker state.
    /// Never mutates the context.
    pub fn snapshot(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "EMM context ue_id={}", self.ue_id);
        let _ = writeln!(
            out,
            "  flags: dynamic={} emergency={} attached={} initial_imsi={} guti_attach={}",
            self.is_dynamic,
            self.is_emergency,
            self.has_been_attached,
            self.initial_identity_was_imsi,
            self.is_guti_based_attach
        );
        let _ = writeln!(
            out,
            "  attach_type={:?} update_type={:?} ksi={:?} emm_cause={:?}",
            self.attach_type, self.additional_update_type, self.ksi, self.emm_cause
        );

        for field in CtxField::ALL {
            let state = self.tracker.state(field);
            let value = self.field_summary(field);
            let _ = writeln!(out, "  {:<26} {:<8} {}", field.name(), format!("{state:?}"), value);
        }

        for ksi in 0..MAX_AUTH_VECTORS as u8 {
            let present = self.tracker.is_vector_present(ksi);
            let valid = self.tracker.is_vector_valid(ksi);
            let _ = writeln!(
                out,
                "  vector[{ksi}]                  present={present} valid={valid}"
            );
        }
        let _ = writeln!(
            out,
            "  remaining_vectors={} sync_failures={} procedures={}",
            self.remaining_vectors,
            self.auth_sync_fail_count,
            self.procedures.is_some()
        );
        out
    }

    fn field_summary(&self, field: CtxField) -> String {
        match field {
            CtxField::Imsi => self.imsi.to_bcd(),
            CtxField::Imei => self.imei.to_bcd(),
            CtxField::ImeiSv => self.imeisv.to_bcd(),
            CtxField::Guti => format!(
                "plmn={} m_tmsi={:#010x}",
                self.guti.plmn_id.to_bcd(),
                self.guti.m_tmsi
            ),
            CtxField::OldGuti => format!(
                "plmn={} m_tmsi={:#010x}",
                self.old_guti.plmn_id.to_bcd(),
                self.old_guti.m_tmsi
            ),
            CtxField::TaiList => format!("{} entries", self.tai_list.len()),
            CtxField::LvrTai => format!(
                "plmn={} tac={}",
                self.lvr_tai.plmn_id.to_bcd(),
                self.lvr_tai.tac
            ),
            CtxField::AuthVectors => format!("{} remaining", self.remaining_vectors),
            CtxField::Security => format!(
                "type={:?} eksi={:?} vector_index={:?} ncc={} activated={}",
                self.security.sc_type,
                self.security.eksi,
                self.security.vector_index,
                self.security.ncc,
                self.security.activated
            ),
            CtxField::NonCurrentSecurity => format!(
                "type={:?} eksi={:?}",
                self.non_current_security.sc_type, self.non_current_security.eksi
            ),
            CtxField::UeNetworkCapability => format!(
                "eea={:#04x} eia={:#04x}",
                self.ue_network_capability.eea, self.ue_network_capability.eia
            ),
            CtxField::MsNetworkCapability => {
                format!("gea={:#04x}", self.ms_network_capability.gea)
            }
            CtxField::CurrentDrxParameter => format!("{:?}", self.current_drx_parameter),
            CtxField::PendingDrxParameter => format!("{:?}", self.pending_drx_parameter),
            CtxField::EpsBearerContextStatus => {
                format!("{:#06x}", self.eps_bearer_context_status)
            }
        }
    }
}

impl fmt::Debug for EmmContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmmContext")
            .field("ue_id", &self.ue_id)
            .field("imsi", &self.imsi.to_bcd())
            .field("remaining_vectors", &self.remaining_vectors)
            .field("security", &self.security.sc_type)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
