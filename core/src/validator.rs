//! Transparent access-token refresh.
//!
//! # Design
//! The validator hooks into every operation its caller runs:
//!
//! - a pre-flight guard aborts the call (as `ClientFail`) when the token is
//!   already known to be expired, so no request is wasted;
//! - a post-flight check on failure asks the policy whether the server
//!   rejected the token.
//!
//! Both stay inert while the session holds no access token, and while
//! another validator has replaced this one on the caller.
//!
//! Either one flags the operation for a rerun. The rerun dispatches one
//! refresh operation and then the original again: spliced into the parent
//! flow when the operation is the flow's current series entry, otherwise
//! as a detached two-step series.
//!
//! The refresh operation the validator creates is never tracked by it.
//! The slot holding it is claimed atomically; while a refresh is pending,
//! other expired calls wait for it to settle and then rerun without
//! dispatching another refresh.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

use crate::caller::ApiCaller;
use crate::error::CallError;
use crate::flow::{Flow, StopBehavior};
use crate::form::FailureHandling;
use crate::operation::{Operation, OperationId};
use crate::result::ServerResult;
use crate::session::{SessionState, TimeFormat};

pub const EXPIRED_TOKEN_MESSAGE: &str = "Client's access token is expired. Refreshing...";
pub const EXPIRED_TOKEN_CODE: i64 = -1;

/// Backend-specific knowledge the validator needs.
pub trait AccessTokenPolicy: Send + Sync {
    fn is_expired_before_call(&self, session: &SessionState, now: NaiveDateTime) -> bool {
        session.is_access_token_expired(now)
    }

    /// Whether a failed result means the server rejected the token.
    fn is_expired_after_call(&self, result: &ServerResult) -> bool;

    /// Build the operation that refreshes the token. Returning `None`
    /// means no rerun happens.
    fn create_refresh_access_token_call(&self, caller: &ApiCaller) -> Option<Operation>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatorSettings {
    pub check_before_call: bool,
    pub check_after_call: bool,
    pub time_format: TimeFormat,
    /// Automatic reruns allowed per operation before giving up.
    pub rerun_limit: u32,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            check_before_call: true,
            check_after_call: true,
            time_format: TimeFormat::Utc,
            rerun_limit: 1,
        }
    }
}

/// What happened to a rerun request.
#[derive(Debug)]
pub(crate) enum Rerun {
    /// Spliced into the running parent flow.
    Scheduled,
    /// Ran detached; carries the original operation's final outcome.
    Completed(Result<Arc<ServerResult>, CallError>),
    Skipped,
}

/// A dispatched refresh. `settled` flips to true once the refresh's own
/// hooks have run; the sender is dropped with the refresh operation.
struct PendingRefresh {
    id: OperationId,
    settled: watch::Receiver<bool>,
}

impl PendingRefresh {
    fn is_pending(&self) -> bool {
        !*self.settled.borrow() && self.settled.has_changed().is_ok()
    }
}

pub struct AccessTokenValidator {
    id: Uuid,
    settings: ValidatorSettings,
    policy: Arc<dyn AccessTokenPolicy>,
    refreshing: Mutex<Option<PendingRefresh>>,
}

impl std::fmt::Debug for AccessTokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenValidator")
            .field("settings", &self.settings)
            .field("refreshing", &self.refreshing.lock().as_ref().map(|pending| pending.id))
            .finish()
    }
}

impl AccessTokenValidator {
    pub fn new(policy: impl AccessTokenPolicy + 'static) -> Self {
        Self::with_settings(policy, ValidatorSettings::default())
    }

    pub fn with_settings(policy: impl AccessTokenPolicy + 'static, settings: ValidatorSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            settings,
            policy: Arc::new(policy),
            refreshing: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> ValidatorSettings {
        self.settings
    }

    fn is_refresh_operation(&self, operation: &Operation) -> bool {
        self.refreshing
            .lock()
            .as_ref()
            .is_some_and(|pending| pending.id == operation.id())
    }

    /// Id of the refresh operation that has been dispatched and not yet
    /// settled, if any.
    pub fn pending_refresh(&self) -> Option<OperationId> {
        self.refreshing
            .lock()
            .as_ref()
            .filter(|pending| pending.is_pending())
            .map(|pending| pending.id)
    }

    /// True while this validator is the one installed on `caller`.
    fn is_current(&self, caller: &ApiCaller) -> impl Fn() -> bool + Send + Sync + 'static {
        let owner = caller.downgrade();
        let id = self.id;
        move || {
            ApiCaller::from_weak(&owner)
                .and_then(|caller| caller.validator())
                .is_some_and(|current| current.id == id)
        }
    }

    /// Install the guard and the post-flight check on `operation`. Safe to
    /// call on every attempt; hooks are installed once per validator.
    pub fn track(&self, operation: &Operation, caller: &ApiCaller) {
        if self.is_refresh_operation(operation) || !operation.mark_tracked(self.id) {
            return;
        }

        if self.settings.check_before_call {
            let policy = self.policy.clone();
            let session = caller.session().clone();
            let clock = caller.clock();
            let format = self.settings.time_format;
            let rerun = operation.rerun_flag();
            let current = self.is_current(caller);
            operation.abort_on(
                move |_| {
                    let expired = current()
                        && session.has_access_token()
                        && policy.is_expired_before_call(&session, clock.now(format));
                    if expired {
                        rerun.store(true, Ordering::SeqCst);
                    }
                    expired
                },
                EXPIRED_TOKEN_MESSAGE,
                FailureHandling::None,
                EXPIRED_TOKEN_CODE,
            );
        }

        if self.settings.check_after_call {
            let policy = self.policy.clone();
            let session = caller.session().clone();
            let rerun = operation.rerun_flag();
            let current = self.is_current(caller);
            operation.on_fail(move |result| {
                if current() && session.has_access_token() && policy.is_expired_after_call(result) {
                    tracing::info!(code = result.code(), "server rejected the access token");
                    rerun.store(true, Ordering::SeqCst);
                }
            });
        }
    }

    /// Settle signal of the pending refresh, if one is still running.
    fn pending_signal(&self) -> Option<(OperationId, watch::Receiver<bool>)> {
        self.refreshing
            .lock()
            .as_ref()
            .filter(|pending| pending.is_pending())
            .map(|pending| (pending.id, pending.settled.clone()))
    }

    /// Take the refresh slot for `refresh`, or hand back the signal of the
    /// refresh already holding it.
    fn claim(
        &self,
        refresh: &Operation,
        settled: watch::Receiver<bool>,
    ) -> Result<(), (OperationId, watch::Receiver<bool>)> {
        let mut slot = self.refreshing.lock();
        if let Some(pending) = slot.as_ref().filter(|pending| pending.is_pending()) {
            return Err((pending.id, pending.settled.clone()));
        }
        *slot = Some(PendingRefresh {
            id: refresh.id(),
            settled,
        });
        Ok(())
    }

    /// Signal that flips once `refresh` has finished and its own hooks ran.
    fn settle_signal(refresh: &Operation) -> watch::Receiver<bool> {
        let (sender, settled) = watch::channel(false);
        let sender = Arc::new(sender);
        let on_fail = sender.clone();
        refresh
            .on_success(move |_| {
                sender.send_replace(true);
            })
            .on_fail(move |_| {
                on_fail.send_replace(true);
            });
        settled
    }

    /// Wait for another call's refresh, then run `operation` again.
    async fn rerun_after(
        &self,
        refresh: OperationId,
        mut settled: watch::Receiver<bool>,
        operation: &Operation,
        caller: &ApiCaller,
    ) -> Rerun {
        tracing::info!(id = %operation.id(), %refresh, "waiting for pending access token refresh");
        let finished = settled.wait_for(|done| *done).await.is_ok();
        if !finished {
            tracing::warn!(id = %operation.id(), %refresh, "pending refresh was dropped before finishing");
        }
        Rerun::Completed(operation.execute(caller.clone()).await)
    }

    pub(crate) async fn rerun(&self, operation: &Operation, caller: &ApiCaller) -> Rerun {
        if self.is_refresh_operation(operation) {
            return Rerun::Skipped;
        }
        if !operation.consume_rerun(self.settings.rerun_limit) {
            tracing::warn!(
                id = %operation.id(),
                limit = self.settings.rerun_limit,
                "rerun limit reached; giving up"
            );
            return Rerun::Skipped;
        }
        if let Some((pending, settled)) = self.pending_signal() {
            return self.rerun_after(pending, settled, operation, caller).await;
        }
        let Some(refresh) = self.policy.create_refresh_access_token_call(caller) else {
            tracing::warn!(id = %operation.id(), "no refresh call available; not rerunning");
            return Rerun::Skipped;
        };
        if refresh.caller().is_none() {
            refresh.bind(caller);
        }
        if let Err((pending, settled)) = self.claim(&refresh, Self::settle_signal(&refresh)) {
            return self.rerun_after(pending, settled, operation, caller).await;
        }

        if let Some(parent) = operation.parent() {
            if parent.splice_retry(operation.id(), &refresh) {
                tracing::info!(id = %operation.id(), refresh = %refresh.id(), "refresh scheduled in parent flow");
                return Rerun::Scheduled;
            }
        }

        tracing::info!(id = %operation.id(), refresh = %refresh.id(), "refreshing access token before rerun");
        let detached = Flow::new();
        detached.add_detached(&refresh).add_detached(operation);
        let outcome = match detached.run_as_series(StopBehavior::Continue, 0).await {
            Ok(report) => report
                .outcomes
                .into_iter()
                .rev()
                .find(|o| o.id == operation.id())
                .map(|o| o.outcome)
                .unwrap_or(Err(CallError::Cancelled)),
            Err(err) => Err(err),
        };
        Rerun::Completed(outcome)
    }
}

/// A policy built from closures, for backends where subclassing is
/// overkill.
pub struct FnPolicy<A, R> {
    after_call: A,
    refresh: R,
}

impl<A, R> FnPolicy<A, R>
where
    A: Fn(&ServerResult) -> bool + Send + Sync,
    R: Fn(&ApiCaller) -> Option<Operation> + Send + Sync,
{
    pub fn new(after_call: A, refresh: R) -> Self {
        Self { after_call, refresh }
    }
}

impl<A, R> AccessTokenPolicy for FnPolicy<A, R>
where
    A: Fn(&ServerResult) -> bool + Send + Sync,
    R: Fn(&ApiCaller) -> Option<Operation> + Send + Sync,
{
    fn is_expired_after_call(&self, result: &ServerResult) -> bool {
        (self.after_call)(result)
    }

    fn create_refresh_access_token_call(&self, caller: &ApiCaller) -> Option<Operation> {
        (self.refresh)(caller)
    }
}
