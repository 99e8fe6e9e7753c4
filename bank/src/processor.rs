//! Applies totally-ordered transactions to the local ledger.

use {
    crate::{
        error::{BankError, Result},
        ledger::Ledger,
        transaction::{Transaction, DEPOSIT_PATH, TRANSFER_PATH},
    },
    groupcast_multicast::{total_order::TODispatcher, TOEnvelope},
    log::{error, info},
    std::sync::{Arc, Mutex, MutexGuard, PoisonError},
};

#[derive(Debug, Default)]
pub struct Processor {
    ledger: Mutex<Ledger>,
}

impl Processor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Bind the transaction paths on the TO dispatcher.
    pub fn register(self: &Arc<Self>, dispatcher: &TODispatcher) {
        for path in [DEPOSIT_PATH, TRANSFER_PATH] {
            let processor = self.clone();
            dispatcher.bind(path.to_string(), move |env: TOEnvelope| {
                let processor = processor.clone();
                async move {
                    if let Err(e) = processor.process(&env.path, &env.body) {
                        error!("{} err: {}", env.path, e);
                    }
                }
            });
        }
    }

    /// Decode and apply one delivered payload, then log the balances.
    pub fn process(&self, path: &str, body: &[u8]) -> Result<()> {
        let transaction = Transaction::decode(body)?;
        if transaction.path() != path {
            return Err(BankError::PathMismatch {
                type_id: transaction.type_id().to_string(),
                path: path.to_string(),
            });
        }

        info!("{}: {}", transaction.type_id(), transaction);
        let mut ledger = self.ledger();
        ledger.apply(&transaction)?;
        info!("{}", ledger.snapshot_line());
        Ok(())
    }

    pub fn snapshot_line(&self) -> String {
        self.ledger().snapshot_line()
    }

    pub fn balance(&self, account: &str) -> Option<i64> {
        self.ledger().balance(account)
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use {
        super::*, crate::error::LedgerError, assert_matches::assert_matches,
        groupcast_multicast::dispatcher::Dispatcher,
    };

    #[test]
    fn test_process_in_order() {
        let p = Processor::new();
        for tx in [
            Transaction::deposit("A", 100),
            Transaction::deposit("A", 50),
            Transaction::transfer("A", "B", 30),
        ] {
            p.process(tx.path(), &tx.encode().unwrap()).unwrap();
        }
        assert_eq!(p.snapshot_line(), "BALANCES A:120 B:30");

        let overdraft = Transaction::transfer("A", "B", 1000);
        assert_matches!(
            p.process(TRANSFER_PATH, &overdraft.encode().unwrap()),
            Err(BankError::Ledger(LedgerError::InsufficientFunds { .. }))
        );
        assert_eq!(p.snapshot_line(), "BALANCES A:120 B:30");
    }

    #[test]
    fn test_path_mismatch_rejected() {
        let p = Processor::new();
        let tx = Transaction::deposit("A", 1);
        assert_matches!(
            p.process(TRANSFER_PATH, &tx.encode().unwrap()),
            Err(BankError::PathMismatch { .. })
        );
        assert_matches!(p.process(DEPOSIT_PATH, b"garbage"), Err(BankError::Serialization(_)));
        assert_eq!(p.balance("A"), None);
    }

    #[tokio::test]
    async fn test_register_binds_both_paths() {
        let p = Processor::new();
        let dispatcher: TODispatcher = Dispatcher::new("to-test");
        p.register(&dispatcher);
        assert!(dispatcher.is_bound(DEPOSIT_PATH));
        assert!(dispatcher.is_bound(TRANSFER_PATH));

        let tx = Transaction::deposit("A", 7);
        assert!(dispatcher.route(TOEnvelope::new(tx.path(), tx.encode().unwrap())).await);
        assert_eq!(p.balance("A"), Some(7));
    }
}
