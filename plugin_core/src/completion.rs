//! One-shot delivery of an invocation's result.
//!
//! Up to three parties race to finish an invocation: the user submitting,
//! the user cancelling and the host deactivating the mechanism. Whoever
//! claims the completion first reports to the host; everyone after that
//! gets `None` from [`Completion::claim`] and must do nothing.
//!
//! A loser that goes on talking to the host (`DidDeactivate`, teardown)
//! first waits for the winner's `SetResult`, so the host always sees the
//! result before the acknowledgement and nothing after destroy.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::error::CallbackError;
use crate::host_adapter::{HostAdapter, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pending,
    /// Claimed; the owner is doing its context writes.
    Claimed,
    Signaled(Outcome),
    /// Dropped by `MechanismDestroy` before anyone claimed it.
    Closed,
}

pub struct Completion {
    host: HostAdapter,
    state: Mutex<State>,
    settled: Condvar,
}

impl Completion {
    pub fn new(host: HostAdapter) -> Arc<Self> {
        Arc::new(Completion {
            host,
            state: Mutex::new(State::Pending),
            settled: Condvar::new(),
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Block while a claim is outstanding.
    fn settled_state(&self) -> MutexGuard<'_, State> {
        let mut state = self.state();
        while *state == State::Claimed {
            state = self
                .settled
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        state
    }

    fn settle(&self, outcome: Outcome) {
        *self.state() = State::Signaled(outcome);
        self.settled.notify_all();
    }

    /// Take the exclusive right to report. Context writes belonging to the
    /// result must happen while holding the claim, so that a loser never
    /// touches the context.
    pub fn claim(self: &Arc<Self>) -> Option<CompletionClaim> {
        let mut state = self.state();
        if *state != State::Pending {
            return None;
        }
        *state = State::Claimed;
        Some(CompletionClaim {
            completion: Arc::clone(self),
            signaled: false,
        })
    }

    /// Claim and report `outcome` at once. `Ok(false)` when someone else got
    /// there first; in that case this returns only after their result went
    /// out. Must not be called by the holder of a claim.
    pub fn fulfill(self: &Arc<Self>, outcome: Outcome) -> Result<bool, CallbackError> {
        match self.claim() {
            Some(claim) => claim.signal(outcome).map(|_| true),
            None => {
                drop(self.settled_state());
                Ok(false)
            }
        }
    }

    /// Give up without reporting. A claim in progress is waited for; its
    /// result still goes out.
    pub fn close(&self) -> bool {
        let mut state = self.settled_state();
        if *state == State::Pending {
            *state = State::Closed;
            true
        } else {
            false
        }
    }

    pub fn is_pending(&self) -> bool {
        *self.state() == State::Pending
    }

    /// Pending or claimed but not yet reported.
    pub fn is_open(&self) -> bool {
        matches!(*self.state(), State::Pending | State::Claimed)
    }

    pub fn outcome(&self) -> Option<Outcome> {
        match *self.state() {
            State::Signaled(outcome) => Some(outcome),
            _ => None,
        }
    }

    pub fn host(&self) -> &HostAdapter {
        &self.host
    }
}

/// The right to report an invocation's result. Dropping an unused claim
/// reports `Deny`, so an early return can never leave the host waiting.
pub struct CompletionClaim {
    completion: Arc<Completion>,
    signaled: bool,
}

impl CompletionClaim {
    pub fn host(&self) -> &HostAdapter {
        &self.completion.host
    }

    pub fn signal(mut self, outcome: Outcome) -> Result<(), CallbackError> {
        self.signaled = true;
        let reported = self.completion.host.signal_result(outcome);
        self.completion.settle(outcome);
        reported
    }
}

impl Drop for CompletionClaim {
    fn drop(&mut self) {
        if self.signaled {
            return;
        }
        liblogger::log_warn!(&format!(
            "engine {}: invocation abandoned without a result, denying",
            self.completion.host.engine()
        ));
        if let Err(e) = self.completion.host.signal_result(Outcome::Deny) {
            liblogger::log_error!(&format!("SetResult failed: {}", e));
        }
        self.completion.settle(Outcome::Deny);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_callbacks::EngineRef;
    use crate::testing::RecordingHost;
    use plugin_api::AuthorizationResult;

    fn completion() -> (Arc<RecordingHost>, EngineRef, Arc<Completion>) {
        let host = Arc::new(RecordingHost::new());
        let engine = EngineRef::from_raw(0x20usize as *mut _);
        let completion = Completion::new(HostAdapter::new(host.clone(), engine));
        (host, engine, completion)
    }

    #[test]
    fn first_fulfill_wins() {
        let (host, engine, completion) = completion();
        assert!(completion.fulfill(Outcome::UserCanceled).unwrap());
        assert!(!completion.fulfill(Outcome::Allow).unwrap());
        assert!(completion.claim().is_none());
        assert_eq!(completion.outcome(), Some(Outcome::UserCanceled));
        assert_eq!(host.results(engine), vec![AuthorizationResult::UserCanceled]);
    }

    #[test]
    fn abandoned_claim_denies() {
        let (host, engine, completion) = completion();
        drop(completion.claim().unwrap());
        assert_eq!(completion.outcome(), Some(Outcome::Deny));
        assert_eq!(host.results(engine), vec![AuthorizationResult::Deny]);
    }

    #[test]
    fn losers_wait_for_the_claimed_result() {
        let (host, engine, completion) = completion();
        let claim = completion.claim().unwrap();
        assert!(completion.is_open());
        assert!(!completion.is_pending());

        let canceller = {
            let completion = Arc::clone(&completion);
            let host = host.clone();
            std::thread::spawn(move || {
                let won = completion.fulfill(Outcome::UserCanceled).unwrap();
                host.note("fulfill returned");
                won
            })
        };
        let closer = {
            let completion = Arc::clone(&completion);
            let host = host.clone();
            std::thread::spawn(move || {
                let closed = completion.close();
                host.note("close returned");
                closed
            })
        };

        std::thread::sleep(std::time::Duration::from_millis(100));
        assert!(!canceller.is_finished());
        assert!(!closer.is_finished());

        claim.signal(Outcome::Allow).unwrap();
        assert!(!canceller.join().unwrap());
        assert!(!closer.join().unwrap());

        assert_eq!(host.results(engine), vec![AuthorizationResult::Allow]);
        assert_eq!(host.journal()[0], "SetResult(Allow)");
        assert_eq!(host.journal().len(), 3);
    }

    #[test]
    fn closed_completion_never_reports() {
        let (host, engine, completion) = completion();
        assert!(completion.close());
        assert!(!completion.fulfill(Outcome::Allow).unwrap());
        assert!(!completion.is_open());
        assert!(host.results(engine).is_empty());
    }

    #[test]
    fn racing_threads_report_once() {
        let (host, engine, completion) = completion();
        let handles: Vec<_> = [Outcome::Allow, Outcome::UserCanceled, Outcome::Deny]
            .into_iter()
            .map(|outcome| {
                let completion = Arc::clone(&completion);
                std::thread::spawn(move || completion.fulfill(outcome).unwrap())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(host.results(engine).len(), 1);
    }
}
