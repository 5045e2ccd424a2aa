//! Property-Based Tests for EMM Context State
//!
//! These tests drive the attribute tracker, the vector cache and the context
//! store with arbitrary operation sequences and check the structural
//! invariants that every sequence must preserve.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    // ========================================================================
    // Attribute Tracker Property Tests
    // ========================================================================

    mod tracker_props {
        use super::*;
        use crate::attributes::{AttributeTracker, CtxField, FieldState};

        #[derive(Debug, Clone, Copy)]
        enum TrackerOp {
            SetPresent(CtxField),
            ClearPresent(CtxField),
            SetValid(CtxField),
            ClearValid(CtxField),
            SetPresentAndValid(CtxField),
        }

        fn arb_field() -> impl Strategy<Value = CtxField> {
            prop::sample::select(CtxField::ALL.to_vec())
        }

        fn arb_op() -> impl Strategy<Value = TrackerOp> {
            arb_field().prop_flat_map(|field| {
                prop::sample::select(vec![
                    TrackerOp::SetPresent(field),
                    TrackerOp::ClearPresent(field),
                    TrackerOp::SetValid(field),
                    TrackerOp::ClearValid(field),
                    TrackerOp::SetPresentAndValid(field),
                ])
            })
        }

        fn apply(tracker: &mut AttributeTracker, op: TrackerOp) {
            match op {
                TrackerOp::SetPresent(f) => tracker.set_present(f),
                TrackerOp::ClearPresent(f) => tracker.clear_present(f),
                TrackerOp::SetValid(f) => {
                    // Legitimately fails while the field is absent
                    let _ = tracker.set_valid(f);
                }
                TrackerOp::ClearValid(f) => tracker.clear_valid(f),
                TrackerOp::SetPresentAndValid(f) => tracker.set_present_and_valid(f),
            }
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(256))]

            // Valid always implies present, under any operation sequence
            #[test]
            fn prop_valid_implies_present(ops in prop::collection::vec(arb_op(), 0..64)) {
                let mut tracker = AttributeTracker::new();
                for op in ops {
                    apply(&mut tracker, op);
                    for field in CtxField::ALL {
                        if tracker.is_valid(field) {
                            prop_assert!(tracker.is_present(field));
                        }
                        if tracker.state(field) == FieldState::Absent {
                            prop_assert!(!tracker.is_valid(field));
                        }
                    }
                }
            }

            // Confirming a field never succeeds from absent
            #[test]
            fn prop_set_valid_fails_while_absent(field in arb_field()) {
                let mut tracker = AttributeTracker::new();
                prop_assert!(tracker.set_valid(field).is_err());
                prop_assert_eq!(tracker.state(field), FieldState::Absent);
            }
        }
    }

    // ========================================================================
    // Vector Cache Property Tests
    // ========================================================================

    mod vector_props {
        use super::*;
        use crate::attributes::MAX_AUTH_VECTORS;
        use crate::context::EmmContext;
        use crate::security::AuthVector;

        #[derive(Debug, Clone, Copy)]
        enum VectorOp {
            Store(u8),
            Consume(u8),
        }

        fn arb_vector_op() -> impl Strategy<Value = VectorOp> {
            (0u8..MAX_AUTH_VECTORS as u8, prop::bool::ANY).prop_map(|(ksi, store)| {
                if store {
                    VectorOp::Store(ksi)
                } else {
                    VectorOp::Consume(ksi)
                }
            })
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(256))]

            // The remaining-vector counter always equals the number of
            // present slots and never leaves 0..=MAX_AUTH_VECTORS.
            #[test]
            fn prop_vector_counter_matches_slots(
                ops in prop::collection::vec(arb_vector_op(), 0..48)
            ) {
                let mut ctx = EmmContext::new(1);
                for op in ops {
                    match op {
                        VectorOp::Store(ksi) => {
                            ctx.store_vector(ksi, AuthVector::default()).unwrap();
                        }
                        VectorOp::Consume(ksi) => {
                            // Fails when the slot is empty; must not move the counter
                            let before = ctx.remaining_vectors();
                            if ctx.consume_vector(ksi).is_err() {
                                prop_assert_eq!(ctx.remaining_vectors(), before);
                            }
                        }
                    }

                    let present = (0..MAX_AUTH_VECTORS as u8)
                        .filter(|&k| ctx.tracker().is_vector_present(k))
                        .count();
                    prop_assert_eq!(ctx.remaining_vectors(), present);
                    prop_assert!(ctx.remaining_vectors() <= MAX_AUTH_VECTORS);
                }
            }
        }
    }

    // ========================================================================
    // Context Store Property Tests
    // ========================================================================

    mod store_props {
        use super::*;
        use crate::config::EmmConfig;
        use crate::store::EmmContextStore;
        use crate::types::Imsi;

        fn arb_imsi() -> impl Strategy<Value = Imsi> {
            prop::collection::vec(0u8..10, 6..=15).prop_map(|digits| {
                let s: String = digits.iter().map(|d| char::from(b'0' + d)).collect();
                Imsi::from_bcd(&s).unwrap()
            })
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            // Every IMSI maps to at most one context, and lookups agree with
            // the registration that succeeded first.
            #[test]
            fn prop_imsi_index_is_injective(imsis in prop::collection::vec(arb_imsi(), 1..16)) {
                let store = EmmContextStore::new(&EmmConfig::default());
                let mut owners = std::collections::HashMap::new();

                for imsi in imsis {
                    let ctx = store.create().unwrap();
                    let ue_id = ctx.lock().unwrap().ue_id();
                    match store.index_by_imsi(imsi, ue_id) {
                        Ok(()) => {
                            owners.entry(imsi).or_insert(ue_id);
                        }
                        Err(_) => {
                            // Already owned by an earlier context
                            prop_assert!(owners.contains_key(&imsi));
                        }
                    }
                }

                for (imsi, ue_id) in owners {
                    let found = store.get_by_imsi(&imsi).unwrap();
                    prop_assert_eq!(found.lock().unwrap().ue_id(), ue_id);
                }
            }

            // Removal is complete: no lookup path reaches a removed context
            #[test]
            fn prop_remove_is_complete(imsi in arb_imsi()) {
                let store = EmmContextStore::new(&EmmConfig::default());
                let ctx = store.create().unwrap();
                let ue_id = ctx.lock().unwrap().ue_id();
                store.index_by_imsi(imsi, ue_id).unwrap();

                store.remove(ue_id, false).unwrap();
                prop_assert!(store.get(ue_id).is_none());
                prop_assert!(store.get_by_imsi(&imsi).is_none());
                prop_assert_eq!(store.len(), 0);
            }
        }
    }
}
