//! Transaction State Machine for confirmed requests (clause 5.4).
//!
//! The client side only: a slot per outstanding invoke ID, a request timer
//! driven by [`TransactionManager::timer_milliseconds`] and a retry counter.
//! When the timer of a slot runs out the encoded PDU is handed back for
//! retransmission until the retry budget is spent, after which the slot goes
//! idle while still holding its invoke ID. The caller notices that through
//! [`TransactionManager::invoke_id_failed`] and releases it.

use std::collections::HashMap;
use std::time::Duration;

use log::{debug, warn};

use crate::datalink::DataLinkAddress;

/// Default APDU timeout
pub const DEFAULT_APDU_TIMEOUT: Duration = Duration::from_millis(3000);
/// Default number of APDU retries
pub const DEFAULT_APDU_RETRIES: u8 = 3;
/// One slot for every usable invoke ID
pub const MAX_TSM_TRANSACTIONS: usize = 255;

/// Transaction states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Reserved, or finished without a confirmation
    Idle,
    /// Request sent, waiting for the response
    AwaitConfirmation,
}

/// Transaction state for one confirmed request
#[derive(Debug, Clone)]
struct Transaction {
    state: TransactionState,
    /// Milliseconds until the request times out
    request_timer: u32,
    retry_count: u8,
    destination: Option<DataLinkAddress>,
    /// NPDU and APDU as sent, kept for retransmission
    pdu: Vec<u8>,
}

/// A request whose timer expired and that must be sent again
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retransmit {
    pub invoke_id: u8,
    pub destination: DataLinkAddress,
    pub pdu: Vec<u8>,
}

/// Allocates invoke IDs and tracks the transactions using them
#[derive(Debug)]
pub struct TransactionManager {
    transactions: HashMap<u8, Transaction>,
    current_invoke_id: u8,
    apdu_timeout_ms: u32,
    apdu_retries: u8,
}

impl TransactionManager {
    pub fn new(apdu_timeout: Duration, apdu_retries: u8) -> Self {
        Self {
            transactions: HashMap::new(),
            current_invoke_id: 1,
            apdu_timeout_ms: apdu_timeout.as_millis().min(u32::MAX as u128) as u32,
            apdu_retries,
        }
    }

    pub fn apdu_timeout(&self) -> Duration {
        Duration::from_millis(self.apdu_timeout_ms as u64)
    }

    pub fn apdu_retries(&self) -> u8 {
        self.apdu_retries
    }

    /// Reserve the next unused invoke ID. Zero is never handed out.
    ///
    /// Returns `None` when every slot is taken.
    pub fn next_free_invoke_id(&mut self) -> Option<u8> {
        if self.transactions.len() >= MAX_TSM_TRANSACTIONS {
            return None;
        }

        for _ in 0..u8::MAX {
            let candidate = self.current_invoke_id;
            self.current_invoke_id = match self.current_invoke_id.wrapping_add(1) {
                0 => 1,
                n => n,
            };

            if let std::collections::hash_map::Entry::Vacant(slot) =
                self.transactions.entry(candidate)
            {
                slot.insert(Transaction {
                    state: TransactionState::Idle,
                    request_timer: self.apdu_timeout_ms,
                    retry_count: 0,
                    destination: None,
                    pdu: Vec::new(),
                });
                return Some(candidate);
            }
        }

        None
    }

    /// Arm the slot of `invoke_id` for an unsegmented confirmed request.
    ///
    /// Unknown invoke IDs are ignored.
    pub fn set_confirmed_unsegmented_transaction(
        &mut self,
        invoke_id: u8,
        destination: DataLinkAddress,
        pdu: Vec<u8>,
    ) {
        let timeout = self.apdu_timeout_ms;
        match self.transactions.get_mut(&invoke_id) {
            Some(transaction) => {
                transaction.state = TransactionState::AwaitConfirmation;
                transaction.request_timer = timeout;
                transaction.retry_count = 0;
                transaction.destination = Some(destination);
                transaction.pdu = pdu;
            }
            None => warn!("TSM: invoke ID {} was not reserved", invoke_id),
        }
    }

    /// Advance all request timers by `milliseconds`.
    ///
    /// Returns the requests that must be retransmitted now.
    pub fn timer_milliseconds(&mut self, milliseconds: u32) -> Vec<Retransmit> {
        let mut retransmits = Vec::new();
        let timeout = self.apdu_timeout_ms;
        let retries = self.apdu_retries;

        for (&invoke_id, transaction) in self.transactions.iter_mut() {
            if transaction.state != TransactionState::AwaitConfirmation {
                continue;
            }

            if transaction.request_timer > milliseconds {
                transaction.request_timer -= milliseconds;
                continue;
            }

            transaction.request_timer = 0;
            if transaction.retry_count < retries {
                transaction.retry_count += 1;
                transaction.request_timer = timeout;
                if let Some(destination) = transaction.destination.clone() {
                    debug!(
                        "TSM: retry {} of {} for invoke ID {}",
                        transaction.retry_count, retries, invoke_id
                    );
                    retransmits.push(Retransmit {
                        invoke_id,
                        destination,
                        pdu: transaction.pdu.clone(),
                    });
                }
            } else {
                warn!("TSM: invoke ID {} timed out after {} retries", invoke_id, retries);
                transaction.state = TransactionState::Idle;
            }
        }

        retransmits.sort_by_key(|r| r.invoke_id);
        retransmits
    }

    /// True when no transaction holds `invoke_id`
    pub fn invoke_id_free(&self, invoke_id: u8) -> bool {
        !self.transactions.contains_key(&invoke_id)
    }

    /// True when the transaction holding `invoke_id` has gone idle without a
    /// confirmation
    pub fn invoke_id_failed(&self, invoke_id: u8) -> bool {
        self.transactions
            .get(&invoke_id)
            .is_some_and(|t| t.state == TransactionState::Idle)
    }

    /// Release the slot holding `invoke_id`
    pub fn free_invoke_id(&mut self, invoke_id: u8) {
        if self.transactions.remove(&invoke_id).is_some() {
            debug!("TSM: freed invoke ID {}", invoke_id);
        }
    }

    /// Destination of the request holding `invoke_id`
    pub fn destination(&self, invoke_id: u8) -> Option<&DataLinkAddress> {
        self.transactions
            .get(&invoke_id)
            .and_then(|t| t.destination.as_ref())
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new(DEFAULT_APDU_TIMEOUT, DEFAULT_APDU_RETRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tsm() -> TransactionManager {
        TransactionManager::new(Duration::from_millis(100), 2)
    }

    #[test]
    fn test_invoke_ids_skip_zero_and_are_unique() {
        let mut tsm = tsm();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..255 {
            let id = tsm.next_free_invoke_id().unwrap();
            assert_ne!(id, 0);
            assert!(seen.insert(id));
        }
        assert!(tsm.next_free_invoke_id().is_none());

        tsm.free_invoke_id(42);
        assert_eq!(tsm.next_free_invoke_id(), Some(42));
    }

    #[test]
    fn test_free_and_reserved() {
        let mut tsm = tsm();
        assert!(tsm.invoke_id_free(1));
        let id = tsm.next_free_invoke_id().unwrap();
        assert_eq!(id, 1);
        assert!(!tsm.invoke_id_free(id));
        tsm.free_invoke_id(id);
        assert!(tsm.invoke_id_free(id));
    }

    #[test]
    fn test_retransmit_then_fail() {
        let mut tsm = tsm();
        let id = tsm.next_free_invoke_id().unwrap();
        tsm.set_confirmed_unsegmented_transaction(id, DataLinkAddress::MsTP(5), vec![1, 2, 3]);
        assert_eq!(tsm.destination(id), Some(&DataLinkAddress::MsTP(5)));

        assert!(tsm.timer_milliseconds(99).is_empty());

        let retries = tsm.timer_milliseconds(1);
        assert_eq!(
            retries,
            vec![Retransmit {
                invoke_id: id,
                destination: DataLinkAddress::MsTP(5),
                pdu: vec![1, 2, 3]
            }]
        );
        assert!(!tsm.invoke_id_failed(id));

        assert_eq!(tsm.timer_milliseconds(100).len(), 1);
        assert!(tsm.timer_milliseconds(100).is_empty());

        // Out of retries: idle but still holding the ID
        assert!(tsm.invoke_id_failed(id));
        assert!(!tsm.invoke_id_free(id));
        tsm.free_invoke_id(id);
        assert!(tsm.invoke_id_free(id));
    }

    #[test]
    fn test_zero_retries_fails_on_first_expiry() {
        let mut tsm = TransactionManager::new(Duration::from_millis(10), 0);
        let id = tsm.next_free_invoke_id().unwrap();
        tsm.set_confirmed_unsegmented_transaction(id, DataLinkAddress::Broadcast, vec![]);
        assert!(tsm.timer_milliseconds(25).is_empty());
        assert!(tsm.invoke_id_failed(id));
    }

    #[test]
    fn test_defaults() {
        let tsm = TransactionManager::default();
        assert_eq!(tsm.apdu_timeout(), Duration::from_millis(3000));
        assert_eq!(tsm.apdu_retries(), 3);
    }
}
