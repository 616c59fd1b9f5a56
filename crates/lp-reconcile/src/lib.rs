//! lp-reconcile
//!
//! Background worker that drives non-terminal orders to a terminal status by
//! polling the accrual authority.
//!
//! One pass:
//! 1. lease a page of pending orders (`uploaded_at` ascending) at `offset`;
//! 2. empty page: wait `idle_delay`, restart at offset 0;
//! 3. per order, sequentially: query upstream, apply the verdict through one
//!    ledger call; failures are logged and the order's lease released;
//! 4. full page: `offset += page_size`; short page: `offset = 0`.
//!
//! Cancellation is checked before every page fetch, accrual call, ledger
//! write and sleep. Ledger writes are transactional, so stopping between two
//! of them never leaves a half-applied credit.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use lp_accrual::{AccrualError, AccrualReply, AccrualSource};
use lp_ledger::{CreditOutcome, Ledger};
use lp_schemas::{PendingOrder, UpstreamStatus};

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub page_size: usize,
    pub idle_delay: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            page_size: 10,
            idle_delay: Duration::from_secs(1),
        }
    }
}

/// Outcome of one [`ReconcileWorker::run_pass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Page processed; continue at this offset.
    Next(usize),
    /// Nothing pending. Wait the idle delay, then restart at offset 0.
    Idle,
    /// The page could not be fetched. Wait the idle delay, keep the offset.
    FetchFailed,
    /// Cancellation observed mid-pass.
    Cancelled,
}

/// Offset of the next page after one of `page_len` rows was read at `offset`.
pub fn next_offset(page_len: usize, page_size: usize, offset: usize) -> usize {
    if page_len == page_size {
        offset + page_len
    } else {
        0
    }
}

pub struct ReconcileWorker {
    ledger: Arc<dyn Ledger>,
    accrual: Arc<dyn AccrualSource>,
    config: ReconcileConfig,
}

/// Owner of a spawned worker.
pub struct WorkerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker and wait for it to observe the signal.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.join.await {
            error!(error = %err, "reconcile worker join failed");
        }
    }
}

impl ReconcileWorker {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        accrual: Arc<dyn AccrualSource>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            ledger,
            accrual,
            config,
        }
    }

    /// Run on the current tokio runtime until [`WorkerHandle::shutdown`].
    pub fn spawn(self) -> WorkerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            self.run(token).await;
        });
        WorkerHandle { cancel, join }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            page_size = self.config.page_size,
            idle_delay_ms = self.config.idle_delay.as_millis() as u64,
            "reconcile worker started"
        );

        let mut offset = 0usize;
        while !cancel.is_cancelled() {
            match self.run_pass(offset, &cancel).await {
                Pass::Next(next) => offset = next,
                Pass::Idle => {
                    offset = 0;
                    if !self.idle(&cancel).await {
                        break;
                    }
                }
                Pass::FetchFailed => {
                    if !self.idle(&cancel).await {
                        break;
                    }
                }
                Pass::Cancelled => break,
            }
        }

        info!("reconcile worker stopped");
    }

    /// Fetch and process one page at `offset`.
    pub async fn run_pass(&self, offset: usize, cancel: &CancellationToken) -> Pass {
        if cancel.is_cancelled() {
            return Pass::Cancelled;
        }

        let page = match self
            .ledger
            .claim_pending_page(self.config.page_size, offset)
            .await
        {
            Ok(page) => page,
            Err(err) => {
                warn!(offset, error = %err, "failed to fetch pending orders");
                return Pass::FetchFailed;
            }
        };

        if page.is_empty() {
            debug!(offset, "no pending orders");
            return Pass::Idle;
        }

        for order in &page {
            if !self.reconcile_order(order, cancel).await {
                return Pass::Cancelled;
            }
        }

        let next = next_offset(page.len(), self.config.page_size, offset);
        debug!(offset, page_len = page.len(), next, "page reconciled");
        Pass::Next(next)
    }

    /// Returns `false` when cancellation stopped the order midway.
    async fn reconcile_order(&self, order: &PendingOrder, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }

        let reply = tokio::select! {
            _ = cancel.cancelled() => return false,
            r = self.accrual.query(&order.number) => r,
        };

        if cancel.is_cancelled() {
            return false;
        }

        match reply {
            Ok(Some(reply)) => self.apply(order, reply).await,
            Ok(None) => {
                debug!(order = %order.number, "not registered upstream yet");
                self.release(order).await;
            }
            // Stuck until upstream changes its reply.
            Err(err @ AccrualError::Decode(_)) => {
                error!(
                    order = %order.number,
                    error = %err,
                    "undecodable accrual reply, order stays pending"
                );
                self.release(order).await;
            }
            Err(err) => {
                warn!(order = %order.number, error = %err, "accrual query failed");
                self.release(order).await;
            }
        }
        true
    }

    async fn apply(&self, order: &PendingOrder, reply: AccrualReply) {
        let result = match reply.status {
            UpstreamStatus::Processed => {
                let amount = reply.accrual.unwrap_or(Decimal::ZERO);
                match self
                    .ledger
                    .credit_accrual(&order.number, order.user_id, amount)
                    .await
                {
                    Ok(CreditOutcome::Credited) => {
                        info!(
                            order = %order.number,
                            user_id = order.user_id,
                            accrual = %amount,
                            "accrual credited"
                        );
                        Ok(())
                    }
                    Ok(CreditOutcome::AlreadyTerminal) => {
                        debug!(order = %order.number, "order already terminal, credit skipped");
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
            other => {
                let status = other.local();
                match self.ledger.set_order_status(&order.number, status).await {
                    Ok(changed) => {
                        if changed && status != order.status {
                            info!(order = %order.number, status = %status, "order status updated");
                        }
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
        };

        if let Err(err) = result {
            warn!(order = %order.number, error = %err, "ledger update failed");
            self.release(order).await;
        }
    }

    async fn release(&self, order: &PendingOrder) {
        if let Err(err) = self.ledger.release_claim(&order.number).await {
            warn!(order = %order.number, error = %err, "failed to release order claim");
        }
    }

    /// Sleep the idle delay. `false` if cancelled first.
    async fn idle(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = sleep(self.config.idle_delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_page_advances_short_page_resets() {
        assert_eq!(next_offset(10, 10, 0), 10);
        assert_eq!(next_offset(10, 10, 20), 30);
        assert_eq!(next_offset(3, 10, 20), 0);
        assert_eq!(next_offset(0, 10, 40), 0);
    }
}
