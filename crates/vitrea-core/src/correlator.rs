//! Matches outbound commands with the controller's acknowledgements.
//!
//! The VBox wire carries no correlation id, so ids are assigned here and
//! replies are matched to the oldest pending command whose
//! [`ReplyClass`] accepts them. Callers must register a command with
//! [`CommandCorrelator::submit`] before writing it, in wire order.
//!
//! A reply that lands before anyone awaits it is buffered in the entry
//! until [`CommandCorrelator::await_result`] picks it up or
//! [`CommandCorrelator::sweep`] ages it out.
//!
//! A command that times out (or is swept, or whose waiter goes away) was
//! still written, so its reply may yet arrive. Its entry is retired, not
//! removed: the retired entry keeps its place in the reply order and
//! swallows that late reply, so it cannot resolve a newer command.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;
use tokio::time::Instant;
use vitrea_api::{ReplyClass, Request, Response};

use crate::error::CommandError;

/// Retired entries live this many sweep ages before being dropped.
const RETIRED_AGE_FACTOR: u32 = 4;

type Outcome = Result<Response, CommandError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(u32);

impl CorrelationId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Pending {
    /// Submission order; unlike ids this never wraps.
    seq: u64,
    class: ReplyClass,
    request: String,
    submitted_at: Instant,
    /// Taken by whoever resolves the entry.
    tx: Option<oneshot::Sender<Outcome>>,
    /// Taken by the waiter.
    rx: Option<oneshot::Receiver<Outcome>>,
    /// Set once nobody will collect the outcome but a reply is still owed.
    retired_at: Option<Instant>,
}

impl Pending {
    fn is_resolved(&self) -> bool {
        self.tx.is_none()
    }

    fn is_retired(&self) -> bool {
        self.retired_at.is_some()
    }

    /// First in line for the next reply of its class.
    fn takes_replies(&self) -> bool {
        self.is_retired() || !self.is_resolved()
    }
}

pub struct CommandCorrelator {
    pending: DashMap<CorrelationId, Pending>,
    next_id: AtomicU32,
    next_seq: AtomicU64,
    sweep_age: Duration,
}

impl CommandCorrelator {
    /// `sweep_age` is how long an entry may sit without a waiter before
    /// [`sweep`](Self::sweep) drops it.
    pub fn new(sweep_age: Duration) -> Self {
        Self::starting_at(1, sweep_age)
    }

    fn starting_at(first_id: u32, sweep_age: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            next_id: AtomicU32::new(first_id),
            next_seq: AtomicU64::new(0),
            sweep_age,
        }
    }

    /// Commands still awaiting an outcome, retired entries excluded.
    pub fn len(&self) -> usize {
        self.pending.iter().filter(|e| !e.is_retired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retired entries still waiting to swallow a late reply.
    pub fn retired(&self) -> usize {
        self.pending.iter().filter(|e| e.is_retired()).count()
    }

    /// Registers a pending entry for `request` and returns its id.
    ///
    /// Requests that expect no reply (status queries) are refused with
    /// [`CommandError::Invalid`]; write those without correlation.
    pub fn submit(&self, request: &Request) -> Result<CorrelationId, CommandError> {
        let class = request.reply_class();
        if class == ReplyClass::None {
            return Err(CommandError::Invalid(format!(
                "{request} expects no reply and cannot be correlated"
            )));
        }

        let (tx, rx) = oneshot::channel();
        let mut pending = Some(Pending {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            class,
            request: request.to_string(),
            submitted_at: Instant::now(),
            tx: Some(tx),
            rx: Some(rx),
            retired_at: None,
        });

        loop {
            // fetch_add wraps at u32::MAX; 0 is reserved.
            let id = CorrelationId(self.next_id.fetch_add(1, Ordering::Relaxed));
            if id.0 == 0 {
                continue;
            }
            if let Entry::Vacant(slot) = self.pending.entry(id) {
                if let Some(entry) = pending.take() {
                    tracing::trace!(%id, request = %entry.request, "Command submitted");
                    slot.insert(entry);
                }
                return Ok(id);
            }
        }
    }

    /// Waits for the entry's outcome.
    ///
    /// The entry is removed when an outcome arrives. On timeout, or when
    /// the future is dropped, it is retired instead.
    pub async fn await_result(
        &self,
        id: CorrelationId,
        timeout: Duration,
    ) -> Result<Response, CommandError> {
        let rx = {
            let Some(mut entry) = self.pending.get_mut(&id) else {
                tracing::debug!(%id, "Awaited unknown command");
                return Err(CommandError::Cancelled);
            };
            let Some(rx) = entry.rx.take() else {
                tracing::debug!(%id, "Command already has a waiter");
                return Err(CommandError::Cancelled);
            };
            rx
        };
        self.pending.remove_if(&id, |_, entry| entry.is_resolved());

        let guard = RetireOnDrop {
            correlator: self,
            id: Some(id),
        };
        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(CommandError::Cancelled),
            Err(_) => {
                tracing::debug!(%id, "Command timed out");
                // The guard retires the entry.
                return Err(CommandError::Timeout(timeout));
            }
        };
        guard.finish();
        outcome
    }

    /// Resolves `id` with `response`. A reply for an unknown or already
    /// resolved id is logged and dropped.
    pub fn complete(&self, id: CorrelationId, response: Response) {
        let outcome = match response {
            Response::Error { code, message } => Err(CommandError::Rejected { code, message }),
            other => Ok(other),
        };
        self.resolve(id, outcome);
    }

    /// Hands `response` to the oldest entry of a matching class that is
    /// unresolved or retired. Returns `false` if no live command took it;
    /// a retired entry swallows the reply and is dropped.
    pub fn route(&self, response: Response) -> bool {
        loop {
            let candidate = self
                .pending
                .iter()
                .filter(|e| e.takes_replies() && e.class.accepts(&response))
                .min_by_key(|e| e.seq)
                .map(|e| (*e.key(), e.is_retired()));

            let Some((id, retired)) = candidate else {
                tracing::debug!(?response, "Reply matches no pending command");
                return false;
            };
            if retired {
                if let Some((_, entry)) = self.pending.remove_if(&id, |_, e| e.is_retired()) {
                    tracing::debug!(
                        %id,
                        request = %entry.request,
                        ?response,
                        "Late reply for retired command"
                    );
                    return false;
                }
                continue;
            }
            let still_open = self
                .pending
                .get(&id)
                .is_some_and(|entry| !entry.is_resolved());
            if still_open {
                self.complete(id, response);
                return true;
            }
        }
    }

    /// Removes `id`, failing its waiter with [`CommandError::Cancelled`].
    pub fn cancel(&self, id: CorrelationId) {
        self.remove_entry(id);
    }

    /// Drops every entry, failing live commands with
    /// [`CommandError::Cancelled`]. Returns how many live commands there were.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<CorrelationId> = self.pending.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter(|id| self.remove_entry(*id)).count()
    }

    /// Ages out entries nobody is waiting on.
    ///
    /// Unanswered entries older than the sweep age are retired; answered
    /// ones that were never collected are dropped, as are retired entries
    /// past their own, longer age. Entries with an active waiter are left
    /// to its timeout. Returns how many entries were retired or dropped.
    pub fn sweep(&self) -> usize {
        let max_age = self.sweep_age;
        let retired_age = self.sweep_age.saturating_mul(RETIRED_AGE_FACTOR);
        let now = Instant::now();
        let mut swept = 0;

        self.pending.retain(|_, entry| {
            if let Some(retired_at) = entry.retired_at {
                let keep = now.duration_since(retired_at) < retired_age;
                swept += usize::from(!keep);
                return keep;
            }
            if entry.rx.is_none() || now.duration_since(entry.submitted_at) < max_age {
                return true;
            }
            swept += 1;
            if entry.is_resolved() {
                return false;
            }
            entry.tx = None;
            entry.rx = None;
            entry.retired_at = Some(now);
            true
        });
        if swept > 0 {
            tracing::debug!(swept, "Swept stale pending commands");
        }
        swept
    }

    /// Removes `id`; returns whether it was a live command.
    fn remove_entry(&self, id: CorrelationId) -> bool {
        let Some((_, mut entry)) = self.pending.remove(&id) else {
            return false;
        };
        if let Some(tx) = entry.tx.take() {
            let _ = tx.send(Err(CommandError::Cancelled));
        }
        tracing::debug!(%id, request = %entry.request, "Command cancelled");
        !entry.is_retired()
    }

    /// Keeps `id` in line for its reply without anyone to collect it.
    /// An entry that already has its reply is simply dropped.
    fn retire(&self, id: CorrelationId) {
        let answered = {
            let Some(mut entry) = self.pending.get_mut(&id) else {
                return;
            };
            if entry.is_resolved() {
                true
            } else {
                entry.tx = None;
                entry.rx = None;
                entry.retired_at = Some(Instant::now());
                tracing::debug!(%id, request = %entry.request, "Command retired");
                false
            }
        };
        if answered {
            self.pending.remove(&id);
        }
    }

    fn resolve(&self, id: CorrelationId, outcome: Outcome) {
        let waiter_active = {
            let Some(mut entry) = self.pending.get_mut(&id) else {
                tracing::debug!(%id, "Reply for unknown command ignored");
                return;
            };
            let Some(tx) = entry.tx.take() else {
                tracing::debug!(%id, "Duplicate reply ignored");
                return;
            };
            tracing::trace!(%id, request = %entry.request, ok = outcome.is_ok(), "Command resolved");
            let _ = tx.send(outcome);
            entry.rx.is_none()
        };
        if waiter_active {
            self.pending.remove(&id);
        }
    }
}

/// Retires the entry if the awaiting future ends without an outcome.
struct RetireOnDrop<'a> {
    correlator: &'a CommandCorrelator,
    id: Option<CorrelationId>,
}

impl RetireOnDrop<'_> {
    fn finish(mut self) {
        if let Some(id) = self.id.take() {
            self.correlator.pending.remove(&id);
        }
    }
}

impl Drop for RetireOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.correlator.retire(id);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use vitrea_api::ErrorCode;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn key_off(node: u16) -> Request {
        Request::KeyOff { node, key: 1 }
    }

    #[tokio::test]
    async fn reply_resolves_the_waiter() {
        let correlator = Arc::new(CommandCorrelator::new(TIMEOUT));
        let id = correlator.submit(&key_off(1)).unwrap();

        let waiter = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move { correlator.await_result(id, TIMEOUT).await })
        };
        tokio::task::yield_now().await;
        assert!(correlator.route(Response::Ok));

        assert_eq!(waiter.await.unwrap().unwrap(), Response::Ok);
        assert!(correlator.is_empty());
    }

    #[tokio::test]
    async fn reply_before_await_is_buffered() {
        let correlator = CommandCorrelator::new(TIMEOUT);
        let id = correlator.submit(&key_off(1)).unwrap();

        correlator.complete(id, Response::Ok);
        assert_eq!(correlator.len(), 1);

        assert_eq!(correlator.await_result(id, TIMEOUT).await.unwrap(), Response::Ok);
        assert!(correlator.is_empty());
    }

    #[tokio::test]
    async fn second_reply_is_a_no_op() {
        let correlator = CommandCorrelator::new(TIMEOUT);
        let id = correlator.submit(&key_off(1)).unwrap();

        correlator.complete(id, Response::Ok);
        correlator.complete(
            id,
            Response::Error {
                code: None,
                message: "late".into(),
            },
        );

        assert_eq!(correlator.await_result(id, TIMEOUT).await.unwrap(), Response::Ok);
    }

    #[tokio::test]
    async fn error_reply_is_rejected() {
        let correlator = CommandCorrelator::new(TIMEOUT);
        let id = correlator.submit(&key_off(1)).unwrap();

        correlator.route(Response::Error {
            code: Some(ErrorCode::WrongNode),
            message: "Wrong Node".into(),
        });

        let err = correlator.await_result(id, TIMEOUT).await.unwrap_err();
        assert!(matches!(
            err,
            CommandError::Rejected {
                code: Some(ErrorCode::WrongNode),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn replies_match_in_submission_order_per_class() {
        let correlator = CommandCorrelator::new(TIMEOUT);
        let version = correlator.submit(&Request::GetVersion).unwrap();
        let first = correlator.submit(&key_off(1)).unwrap();
        let second = correlator.submit(&key_off(2)).unwrap();

        assert!(correlator.route(Response::Ok));
        assert!(correlator.route(Response::Version { major: 8, minor: 66 }));

        assert_eq!(correlator.await_result(first, TIMEOUT).await.unwrap(), Response::Ok);
        assert_eq!(
            correlator.await_result(version, TIMEOUT).await.unwrap(),
            Response::Version { major: 8, minor: 66 }
        );
        assert_eq!(correlator.len(), 1);
        correlator.cancel(second);
        assert!(correlator.is_empty());
    }

    #[tokio::test]
    async fn scenario_results_match_by_id() {
        let correlator = CommandCorrelator::new(TIMEOUT);
        let four = correlator.submit(&Request::Scenario { id: 4 }).unwrap();
        let five = correlator.submit(&Request::Scenario { id: 5 }).unwrap();

        assert!(correlator.route(Response::ScenarioResult { id: 5, ok: false }));
        assert!(!correlator.route(Response::ScenarioResult { id: 9, ok: true }));

        assert_eq!(
            correlator.await_result(five, TIMEOUT).await.unwrap(),
            Response::ScenarioResult { id: 5, ok: false }
        );
        correlator.cancel(four);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_retires_the_entry() {
        let correlator = CommandCorrelator::new(TIMEOUT);
        for node in 0..10 {
            let id = correlator.submit(&key_off(node)).unwrap();
            let err = correlator
                .await_result(id, Duration::from_millis(100))
                .await
                .unwrap_err();
            assert!(matches!(err, CommandError::Timeout(_)));
        }
        assert!(correlator.is_empty());
        assert_eq!(correlator.retired(), 10);

        tokio::time::advance(TIMEOUT * RETIRED_AGE_FACTOR).await;
        assert_eq!(correlator.sweep(), 10);
        assert_eq!(correlator.retired(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn late_ack_of_timed_out_command_is_not_misattributed() {
        let correlator = Arc::new(CommandCorrelator::new(TIMEOUT));
        let first = correlator.submit(&key_off(1)).unwrap();
        let err = correlator
            .await_result(first, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Timeout(_)));

        let second = correlator.submit(&key_off(2)).unwrap();
        let waiter = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move { correlator.await_result(second, TIMEOUT).await })
        };
        tokio::task::yield_now().await;

        // The first command's ack shows up late, then the second is refused.
        assert!(!correlator.route(Response::Ok));
        assert!(correlator.route(Response::Error {
            code: Some(ErrorCode::WrongNode),
            message: "Wrong Node".into(),
        }));

        assert!(matches!(
            waiter.await.unwrap(),
            Err(CommandError::Rejected { .. })
        ));
        assert_eq!(correlator.retired(), 0);
    }

    #[tokio::test]
    async fn cancel_all_fails_every_waiter() {
        let correlator = Arc::new(CommandCorrelator::new(TIMEOUT));
        let mut waiters = Vec::new();
        for node in 0..3 {
            let id = correlator.submit(&key_off(node)).unwrap();
            let correlator = Arc::clone(&correlator);
            waiters.push(tokio::spawn(async move {
                correlator.await_result(id, TIMEOUT).await
            }));
        }
        tokio::task::yield_now().await;

        assert_eq!(correlator.cancel_all(), 3);
        for waiter in waiters {
            assert!(matches!(
                waiter.await.unwrap(),
                Err(CommandError::Cancelled)
            ));
        }
        assert!(correlator.is_empty());
    }

    #[tokio::test]
    async fn dropping_the_waiter_retires() {
        let correlator = CommandCorrelator::new(TIMEOUT);
        let id = correlator.submit(&key_off(1)).unwrap();
        {
            let fut = correlator.await_result(id, TIMEOUT);
            let _ = tokio::time::timeout(Duration::from_millis(10), fut).await;
        }
        assert!(correlator.is_empty());
        assert_eq!(correlator.retired(), 1);
        assert!(!correlator.route(Response::Ok));
        assert_eq!(correlator.retired(), 0);
    }

    #[tokio::test]
    async fn cancel_all_drops_retired_entries() {
        let correlator = CommandCorrelator::new(TIMEOUT);
        let retired = correlator.submit(&key_off(1)).unwrap();
        correlator.retire(retired);
        let _live = correlator.submit(&key_off(2)).unwrap();

        assert_eq!(correlator.cancel_all(), 1);
        assert_eq!(correlator.retired(), 0);
        assert!(correlator.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_retires_unawaited_entries_only() {
        let correlator = Arc::new(CommandCorrelator::new(Duration::from_secs(1)));
        let _orphan = correlator.submit(&key_off(1)).unwrap();
        let awaited = correlator.submit(&key_off(2)).unwrap();
        let waiter = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move {
                correlator.await_result(awaited, Duration::from_secs(10)).await
            })
        };
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(correlator.sweep(), 1);
        assert_eq!(correlator.len(), 1);
        assert_eq!(correlator.retired(), 1);

        correlator.complete(awaited, Response::Ok);
        assert_eq!(waiter.await.unwrap().unwrap(), Response::Ok);
    }

    #[test]
    fn ids_wrap_and_skip_zero_and_pending() {
        let correlator = CommandCorrelator::starting_at(u32::MAX, TIMEOUT);
        let last = correlator.submit(&key_off(1)).unwrap();
        assert_eq!(last.get(), u32::MAX);
        let wrapped = correlator.submit(&key_off(2)).unwrap();
        assert_eq!(wrapped.get(), 1);

        // Rewind so the allocator runs into the still-pending id 1.
        correlator.next_id.store(1, Ordering::Relaxed);
        let next = correlator.submit(&key_off(3)).unwrap();
        assert_eq!(next.get(), 2);
    }

    #[test]
    fn status_queries_are_not_correlated() {
        let correlator = CommandCorrelator::new(TIMEOUT);
        assert!(matches!(
            correlator.submit(&Request::GetFullStatus),
            Err(CommandError::Invalid(_))
        ));
        assert!(correlator.is_empty());
    }
}
