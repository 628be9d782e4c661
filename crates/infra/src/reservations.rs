//! Open-item reservation index.
//!
//! An inventory item may be PENDING or ON_LOAN in at most one loan at a time.
//! Each loan aggregate only sees its own items, so exclusivity across loans
//! is enforced here: a reservation is taken before `ItemAdded` is appended
//! and released when the item is returned, or its loan cancelled or deleted.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use stockloan_inventory::StockItemId;
use stockloan_loans::LoanId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReservationError {
    #[error("stock item {item} is already open on loan {holder}")]
    Held { item: StockItemId, holder: LoanId },
    #[error("reservation index unavailable")]
    Poisoned,
}

/// Atomic check-and-create over (stock item → holding loan).
pub trait OpenItemIndex: Send + Sync {
    /// Claim `item` for `loan`. Fails if any loan, including `loan` itself,
    /// already holds it.
    fn reserve(&self, item: StockItemId, loan: LoanId) -> Result<(), ReservationError>;

    /// Release `item` if `loan` holds it. Returns whether anything was released.
    fn release(&self, item: StockItemId, loan: LoanId) -> bool;

    fn holder(&self, item: StockItemId) -> Option<LoanId>;

    /// Replace the whole index, e.g. from the loan directory after a restart.
    fn rebuild(&self, open: Vec<(StockItemId, LoanId)>);
}

impl<T> OpenItemIndex for Arc<T>
where
    T: OpenItemIndex + ?Sized,
{
    fn reserve(&self, item: StockItemId, loan: LoanId) -> Result<(), ReservationError> {
        (**self).reserve(item, loan)
    }

    fn release(&self, item: StockItemId, loan: LoanId) -> bool {
        (**self).release(item, loan)
    }

    fn holder(&self, item: StockItemId) -> Option<LoanId> {
        (**self).holder(item)
    }

    fn rebuild(&self, open: Vec<(StockItemId, LoanId)>) {
        (**self).rebuild(open)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryOpenItemIndex {
    held: RwLock<HashMap<StockItemId, LoanId>>,
}

impl InMemoryOpenItemIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.held.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OpenItemIndex for InMemoryOpenItemIndex {
    fn reserve(&self, item: StockItemId, loan: LoanId) -> Result<(), ReservationError> {
        let mut held = self.held.write().map_err(|_| ReservationError::Poisoned)?;
        if let Some(holder) = held.get(&item) {
            return Err(ReservationError::Held {
                item,
                holder: *holder,
            });
        }
        held.insert(item, loan);
        Ok(())
    }

    fn release(&self, item: StockItemId, loan: LoanId) -> bool {
        let Ok(mut held) = self.held.write() else {
            return false;
        };
        if held.get(&item) == Some(&loan) {
            held.remove(&item);
            true
        } else {
            false
        }
    }

    fn holder(&self, item: StockItemId) -> Option<LoanId> {
        self.held.read().ok()?.get(&item).copied()
    }

    fn rebuild(&self, open: Vec<(StockItemId, LoanId)>) {
        if let Ok(mut held) = self.held.write() {
            held.clear();
            held.extend(open);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    use stockloan_core::AggregateId;

    fn item() -> StockItemId {
        StockItemId::new(AggregateId::new())
    }

    fn loan() -> LoanId {
        LoanId::new(AggregateId::new())
    }

    #[test]
    fn second_reservation_names_the_holder() {
        let index = InMemoryOpenItemIndex::new();
        let (i, a, b) = (item(), loan(), loan());

        index.reserve(i, a).unwrap();
        let err = index.reserve(i, b).unwrap_err();
        assert_eq!(err, ReservationError::Held { item: i, holder: a });
        assert_eq!(index.holder(i), Some(a));
    }

    #[test]
    fn release_only_by_the_holder() {
        let index = InMemoryOpenItemIndex::new();
        let (i, a, b) = (item(), loan(), loan());
        index.reserve(i, a).unwrap();

        assert!(!index.release(i, b));
        assert_eq!(index.holder(i), Some(a));
        assert!(index.release(i, a));
        assert!(index.reserve(i, b).is_ok());
    }

    #[test]
    fn rebuild_replaces_contents() {
        let index = InMemoryOpenItemIndex::new();
        index.reserve(item(), loan()).unwrap();
        let (i, a) = (item(), loan());

        index.rebuild(vec![(i, a)]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.holder(i), Some(a));
    }

    #[test]
    fn concurrent_reservations_have_exactly_one_winner() {
        let index = Arc::new(InMemoryOpenItemIndex::new());
        let i = item();
        let contenders = 16;
        let barrier = Arc::new(Barrier::new(contenders));

        let handles: Vec<_> = (0..contenders)
            .map(|_| {
                let index = index.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    index.reserve(i, loan()).is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Reserve { item: usize, loan: usize },
            Release { item: usize, loan: usize },
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0..4usize, 0..3usize).prop_map(|(item, loan)| Op::Reserve { item, loan }),
                (0..4usize, 0..3usize).prop_map(|(item, loan)| Op::Release { item, loan }),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(128))]

            #[test]
            fn matches_a_single_holder_model(ops in prop::collection::vec(op(), 1..60)) {
                let items: Vec<StockItemId> = (0..4).map(|_| item()).collect();
                let loans: Vec<LoanId> = (0..3).map(|_| loan()).collect();
                let index = InMemoryOpenItemIndex::new();
                let mut model: HashMap<StockItemId, LoanId> = HashMap::new();

                for op in ops {
                    match op {
                        Op::Reserve { item, loan } => {
                            let (i, l) = (items[item], loans[loan]);
                            let ok = index.reserve(i, l).is_ok();
                            prop_assert_eq!(ok, !model.contains_key(&i));
                            model.entry(i).or_insert(l);
                        }
                        Op::Release { item, loan } => {
                            let (i, l) = (items[item], loans[loan]);
                            let released = index.release(i, l);
                            prop_assert_eq!(released, model.get(&i) == Some(&l));
                            if released {
                                model.remove(&i);
                            }
                        }
                    }
                    prop_assert_eq!(index.len(), model.len());
                }
                for i in &items {
                    prop_assert_eq!(index.holder(*i), model.get(i).copied());
                }
            }
        }
    }
}
