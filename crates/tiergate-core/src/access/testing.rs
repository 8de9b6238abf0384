//! Counting chain reader for cache and gate tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::address::WalletAddress;
use super::checker::{ChainReader, TokenBalance};
use crate::types::GateError;

pub(crate) struct MockReader {
    calls: AtomicUsize,
    balance: Mutex<f64>,
    failure: Mutex<Option<GateError>>,
    delay: Duration,
}

impl MockReader {
    pub(crate) fn with_balance(balance: f64) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            balance: Mutex::new(balance),
            failure: Mutex::new(None),
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn set_balance(&self, balance: f64) {
        *self.balance.lock().unwrap() = balance;
    }

    pub(crate) fn fail_with(&self, failure: Option<GateError>) {
        *self.failure.lock().unwrap() = failure;
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainReader for MockReader {
    async fn token_balance(&self, _wallet: &WalletAddress) -> Result<TokenBalance, GateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failure = self.failure.lock().unwrap().clone();
        if let Some(err) = failure {
            return Err(err);
        }

        let amount = *self.balance.lock().unwrap();
        Ok(TokenBalance {
            amount,
            decimals: 18,
        })
    }
}

/// Distinct valid addresses: 0x00..01, 0x00..02, ...
pub(crate) fn wallet(n: u8) -> WalletAddress {
    WalletAddress::parse(&format!("0x{:040x}", n)).unwrap()
}
