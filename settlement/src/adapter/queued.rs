//! Protocol that settles through a request queue
//!
//! Deposits and withdrawals are accepted into a queue and only take effect
//! once the protocol works the queue off ([`QueuedVault::process_queue`]).
//! Until then `continue_*` reports the action as unfinished.

use crate::{
    adapter::{ActionOutcome, ContinuationPayload, PoolBook, RedeemRequest},
    range::PackedRange,
    Error, Result,
};
use serde::{Deserialize, Serialize};

/// Queued request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum QueuedRequest {
    Deposit {
        ticket: ContinuationPayload,
        amounts: Vec<u128>,
        processed: bool,
    },
    Withdrawal {
        ticket: ContinuationPayload,
        /// Index-scaled principal detached at request time
        detached: Vec<u128>,
        /// Underlying amounts once processed
        ready: Option<Vec<u128>>,
    },
}

/// Non-atomic vault
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedVault {
    book: PoolBook,
    queue: Option<QueuedRequest>,
}

impl QueuedVault {
    /// Create vault over a pool book
    pub fn new(book: PoolBook) -> Self {
        Self { book, queue: None }
    }

    /// Pool book
    pub fn book(&self) -> &PoolBook {
        &self.book
    }

    /// Pool book, mutable
    pub fn book_mut(&mut self) -> &mut PoolBook {
        &mut self.book
    }

    /// Underlying holdings per asset; queued deposits are not counted yet
    pub fn holdings(&self) -> Result<Vec<u128>> {
        self.book.holdings()
    }

    /// Whether a request waits for the protocol
    pub fn has_unprocessed_request(&self) -> bool {
        matches!(
            self.queue,
            Some(QueuedRequest::Deposit { processed: false, .. })
                | Some(QueuedRequest::Withdrawal { ready: None, .. })
        )
    }

    /// Work off the queue
    pub fn process_queue(&mut self) -> Result<()> {
        match &mut self.queue {
            Some(QueuedRequest::Deposit {
                amounts, processed, ..
            }) if !*processed => {
                self.book.deposit(amounts)?;
                *processed = true;
                tracing::debug!("Queued deposit processed");
            }
            Some(QueuedRequest::Withdrawal { detached, ready, .. }) if ready.is_none() => {
                *ready = Some(self.book.payout(detached)?);
                tracing::debug!("Queued withdrawal processed");
            }
            _ => {}
        }
        Ok(())
    }

    /// Queue a deposit
    pub fn initiate_deposit(&mut self, amounts: &[u128]) -> Result<ActionOutcome> {
        self.ensure_idle()?;
        let ticket = ContinuationPayload::issue();
        self.queue = Some(QueuedRequest::Deposit {
            ticket,
            amounts: amounts.to_vec(),
            processed: false,
        });
        Ok(ActionOutcome::pending(ticket))
    }

    /// Queue a withdrawal; the covered principal stops earning immediately
    pub fn initiate_withdrawal(&mut self, request: &RedeemRequest) -> Result<ActionOutcome> {
        self.ensure_idle()?;
        let detached = self.book.detach(request)?;
        let ticket = ContinuationPayload::issue();
        self.queue = Some(QueuedRequest::Withdrawal {
            ticket,
            detached,
            ready: None,
        });
        Ok(ActionOutcome::pending(ticket))
    }

    /// Poll the queued deposit
    pub fn continue_deposit(&mut self, payload: &ContinuationPayload) -> Result<ActionOutcome> {
        match &self.queue {
            Some(QueuedRequest::Deposit {
                ticket, processed, ..
            }) if ticket == payload => {
                if !*processed {
                    return Ok(ActionOutcome::pending(*payload));
                }
                self.queue = None;
                Ok(ActionOutcome::finished(Vec::new()))
            }
            _ => Err(Error::Adapter(format!(
                "no queued deposit for ticket {}",
                payload.ticket
            ))),
        }
    }

    /// Poll the queued withdrawal
    pub fn continue_withdrawal(&mut self, payload: &ContinuationPayload) -> Result<ActionOutcome> {
        match &self.queue {
            Some(QueuedRequest::Withdrawal { ticket, ready, .. }) if ticket == payload => {
                let Some(assets) = ready.clone() else {
                    return Ok(ActionOutcome::pending(*payload));
                };
                self.queue = None;
                Ok(ActionOutcome::finished(assets))
            }
            _ => Err(Error::Adapter(format!(
                "no queued withdrawal for ticket {}",
                payload.ticket
            ))),
        }
    }

    /// Drain all holdings unless a request is still with the protocol
    ///
    /// A processed withdrawal that was never collected is paid out as well.
    pub fn emergency_withdraw(&mut self, ranges: &[PackedRange]) -> Result<ActionOutcome> {
        if self.has_unprocessed_request() {
            return Ok(ActionOutcome::incomplete());
        }
        let uncollected = match &self.queue {
            Some(QueuedRequest::Withdrawal {
                ready: Some(assets),
                ..
            }) => assets.clone(),
            _ => vec![0; self.book.tokens().len()],
        };

        let mut assets = self.book.drain(ranges)?;
        for (asset, extra) in assets.iter_mut().zip(uncollected) {
            *asset = asset.saturating_add(extra);
        }
        self.queue = None;
        Ok(ActionOutcome::finished(assets))
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.queue.is_some() {
            return Err(Error::Adapter("request queue is busy".to_string()));
        }
        Ok(())
    }
}
