//! EMM context store
//!
//! Owns every per-subscriber context and three lookup indexes: the primary
//! UE-identifier map plus secondary IMSI and GUTI maps. A store is an
//! explicit instance; an embedding node creates one (or several, in tests)
//! and passes it around. Contexts are handed out behind `Arc<Mutex<..>>` so
//! callers can mutate a subscriber without holding the index locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::config::EmmConfig;
use crate::context::{EmmContext, UeId};
use crate::error::{EmmCtxError, EmmCtxResult};
use crate::types::{Guti, Imsi};

/// Shared handle to one subscriber's context
pub type EmmContextRef = Arc<Mutex<EmmContext>>;

// ============================================================================
// Context Store
// ============================================================================

/// Registry of all EMM contexts known to one node instance
pub struct EmmContextStore {
    max_contexts: usize,
    next_ue_id: Mutex<UeId>,
    by_ue_id: RwLock<HashMap<UeId, EmmContextRef>>,
    by_imsi: RwLock<HashMap<Imsi, UeId>>,
    by_guti: RwLock<HashMap<Guti, UeId>>,
}

impl EmmContextStore {
    /// Create an empty store sized from configuration
    pub fn new(config: &EmmConfig) -> Self {
        Self {
            max_contexts: config.max_contexts,
            next_ue_id: Mutex::new(1),
            by_ue_id: RwLock::new(HashMap::new()),
            by_imsi: RwLock::new(HashMap::new()),
            by_guti: RwLock::new(HashMap::new()),
        }
    }

    /// Number of registered contexts
    pub fn len(&self) -> usize {
        self.by_ue_id.read().unwrap().len()
    }

    /// Whether the store holds no contexts
    pub fn is_empty(&self) -> bool {
        self.by_ue_id.read().unwrap().is_empty()
    }

    /// Allocate a fresh context under a new UE identifier
    pub fn create(&self) -> EmmCtxResult<EmmContextRef> {
        let mut pool = self.by_ue_id.write().unwrap();
        if pool.len() >= self.max_contexts {
            log::warn!("EMM context pool exhausted ({} contexts)", pool.len());
            return Err(EmmCtxError::ResourceExhausted("emm context pool"));
        }

        let mut next = self.next_ue_id.lock().unwrap();
        let ue_id = *next;
        *next = next.wrapping_add(1);
        drop(next);

        let ctx = Arc::new(Mutex::new(EmmContext::new(ue_id)));
        pool.insert(ue_id, ctx.clone());
        log::debug!("Created EMM context ue_id={ue_id}");
        Ok(ctx)
    }

    /// Register a context built outside the store, for example one restored
    /// from an inter-node transfer. The context keeps its UE identifier;
    /// later allocations skip past it.
    pub fn insert(&self, ctx: EmmContext) -> EmmCtxResult<EmmContextRef> {
        let ue_id = ctx.ue_id();
        let mut pool = self.by_ue_id.write().unwrap();
        if pool.len() >= self.max_contexts {
            return Err(EmmCtxError::ResourceExhausted("emm context pool"));
        }
        if pool.contains_key(&ue_id) {
            return Err(EmmCtxError::Duplicate {
                index: "ue_id",
                existing: ue_id,
            });
        }

        let mut next = self.next_ue_id.lock().unwrap();
        if *next <= ue_id {
            *next = ue_id.wrapping_add(1);
        }
        drop(next);

        let shared = Arc::new(Mutex::new(ctx));
        pool.insert(ue_id, shared.clone());
        log::debug!("Inserted EMM context ue_id={ue_id}");
        Ok(shared)
    }

    /// Look up a context by its UE identifier
    pub fn get(&self, ue_id: UeId) -> Option<EmmContextRef> {
        self.by_ue_id.read().unwrap().get(&ue_id).cloned()
    }

    /// Look up a context by IMSI
    pub fn get_by_imsi(&self, imsi: &Imsi) -> Option<EmmContextRef> {
        let ue_id = *self.by_imsi.read().unwrap().get(imsi)?;
        self.get(ue_id)
    }

    /// Look up a context by GUTI (current or previous; both are indexed)
    pub fn get_by_guti(&self, guti: &Guti) -> Option<EmmContextRef> {
        let ue_id = *self.by_guti.read().unwrap().get(guti)?;
        self.get(ue_id)
    }

    /// Register an IMSI index entry for a context.
    ///
    /// Fails with [`EmmCtxError::Duplicate`] when the IMSI already maps to a
    /// different UE; re-registering the same pair is a no-op.
    pub fn index_by_imsi(&self, imsi: Imsi, ue_id: UeId) -> EmmCtxResult<()> {
        let mut index = self.by_imsi.write().unwrap();
        match index.get(&imsi) {
            Some(&existing) if existing != ue_id => Err(EmmCtxError::Duplicate {
                index: "imsi",
                existing,
            }),
            Some(_) => Ok(()),
            None => {
                index.insert(imsi, ue_id);
                Ok(())
            }
        }
    }

    /// Register a GUTI index entry for a context.
    ///
    /// Fails with [`EmmCtxError::Duplicate`] when the GUTI already maps to a
    /// different UE; re-registering the same pair is a no-op.
    pub fn index_by_guti(&self, guti: Guti, ue_id: UeId) -> EmmCtxResult<()> {
        let mut index = self.by_guti.write().unwrap();
        match index.get(&guti) {
            Some(&existing) if existing != ue_id => Err(EmmCtxError::Duplicate {
                index: "guti",
                existing,
            }),
            Some(_) => Ok(()),
            None => {
                index.insert(guti, ue_id);
                Ok(())
            }
        }
    }

    /// Register the subscriber's previous GUTI in the temporary-identity
    /// index, so a UE attaching with a stale GUTI is still found. Same
    /// uniqueness rules as [`index_by_guti`](Self::index_by_guti).
    pub fn index_by_old_guti(&self, old_guti: Guti, ue_id: UeId) -> EmmCtxResult<()> {
        self.index_by_guti(old_guti, ue_id)
    }

    /// Move a context from one IMSI to another in a single step, so no
    /// concurrent lookup observes the context under both or neither key.
    /// The old IMSI entry is dropped only if it pointed at this UE.
    pub fn reindex_imsi(
        &self,
        old_imsi: Option<&Imsi>,
        new_imsi: Imsi,
        ue_id: UeId,
    ) -> EmmCtxResult<()> {
        let mut index = self.by_imsi.write().unwrap();
        if let Some(&existing) = index.get(&new_imsi) {
            if existing != ue_id {
                return Err(EmmCtxError::Duplicate {
                    index: "imsi",
                    existing,
                });
            }
        }
        if let Some(old) = old_imsi {
            if index.get(old) == Some(&ue_id) {
                index.remove(old);
            }
        }
        index.insert(new_imsi, ue_id);
        Ok(())
    }

    /// Drop a GUTI index entry if it points at this UE
    pub fn unindex_guti(&self, guti: &Guti, ue_id: UeId) {
        let mut index = self.by_guti.write().unwrap();
        if index.get(guti) == Some(&ue_id) {
            index.remove(guti);
        }
    }

    /// Remove a context and every index entry pointing at it, handing the
    /// final store reference back to the caller for destruction.
    ///
    /// With `clear_fields` the context content is released first, so
    /// outstanding [`EmmContextRef`] clones observe an empty context instead
    /// of stale identities and key material.
    pub fn remove(&self, ue_id: UeId, clear_fields: bool) -> EmmCtxResult<EmmContextRef> {
        let ctx = self
            .by_ue_id
            .write()
            .unwrap()
            .remove(&ue_id)
            .ok_or_else(|| EmmCtxError::NotFound(format!("emm context ue_id={ue_id}")))?;

        self.by_imsi
            .write()
            .unwrap()
            .retain(|_, &mut id| id != ue_id);
        self.by_guti
            .write()
            .unwrap()
            .retain(|_, &mut id| id != ue_id);

        if clear_fields {
            ctx.lock().unwrap().free_content();
        }
        log::debug!("Removed EMM context ue_id={ue_id}");
        Ok(ctx)
    }

    /// UE identifiers of every registered context, in no particular order
    pub fn ue_ids(&self) -> Vec<UeId> {
        self.by_ue_id.read().unwrap().keys().copied().collect()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
