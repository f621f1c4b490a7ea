//! One logical API call and its result.
//!
//! # Design
//! `Operation` is a cloneable handle around shared state, so a flow, a
//! validator and user code can all refer to the same call. Its lifecycle:
//!
//! ```text
//! Created -> Building -> InFlight -> Finished(status)
//!               |                        ^
//!               +------ guard abort -----+
//! ```
//!
//! Each attempt produces exactly one immutable `ServerResult`. A rerun
//! (requested by the access-token validator) starts a new attempt; hooks
//! fire once per attempt, in this order: on_start at send time, then
//! on_finish, then on_success or on_fail, then hub events.
//!
//! Locks are never held across an `.await` or while hooks run. Hooks are
//! snapshotted before being called, so a hook may register further hooks
//! on the same operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::builder::{ConnectionSettings, TransportRequestBuilder};
use crate::caller::{ApiCaller, CallerInner};
use crate::error::CallError;
use crate::events::NetworkEvent;
use crate::flow::{Flow, FlowInner};
use crate::form::{FailureHandling, MockMode};
use crate::http::{HttpResponse, TransportError};
use crate::logger::RequestLogger;
use crate::normalize::ResultNormalizer;
use crate::request::ClientRequest;
use crate::result::{ClientError, ResultStatus, ServerResult};
use crate::session::TimeFormat;
use crate::validator::Rerun;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(Uuid);

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Building,
    InFlight,
    Finished(ResultStatus),
    Cancelled,
}

type StartHook = Arc<dyn Fn(&ClientRequest) + Send + Sync>;
type ResultHook = Arc<dyn Fn(&ServerResult) + Send + Sync>;
type Condition = Arc<dyn Fn(&ClientRequest) -> bool + Send + Sync>;

#[derive(Clone)]
struct Guard {
    condition: Condition,
    message: String,
    failure_handling: FailureHandling,
    code: i64,
}

#[derive(Default)]
struct Hooks {
    on_start: Vec<StartHook>,
    on_finish: Vec<ResultHook>,
    on_success: Vec<ResultHook>,
    on_fail: Vec<ResultHook>,
    guards: Vec<Guard>,
}

struct State {
    request: ClientRequest,
    phase: Phase,
    result: Option<Arc<ServerResult>>,
    progress: f32,
    attempts: u32,
    reruns: u32,
    tracked_by: Vec<Uuid>,
    cancel: CancellationToken,
}

pub(crate) struct OperationInner {
    id: OperationId,
    state: Mutex<State>,
    hooks: Mutex<Hooks>,
    rerun_requested: Arc<AtomicBool>,
    owner: Mutex<Weak<CallerInner>>,
    parent: Mutex<Weak<FlowInner>>,
}

#[derive(Clone)]
pub struct Operation {
    inner: Arc<OperationInner>,
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Operation")
            .field("id", &self.inner.id)
            .field("path", &state.request.path())
            .field("phase", &state.phase)
            .field("attempts", &state.attempts)
            .finish()
    }
}

impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Operation {}

impl Operation {
    /// An unbound operation; give it a caller with `bind` or `run_on`.
    pub fn new(request: ClientRequest) -> Self {
        Self {
            inner: Arc::new(OperationInner {
                id: OperationId(Uuid::new_v4()),
                state: Mutex::new(State {
                    request,
                    phase: Phase::Created,
                    result: None,
                    progress: 0.0,
                    attempts: 0,
                    reruns: 0,
                    tracked_by: Vec::new(),
                    cancel: CancellationToken::new(),
                }),
                hooks: Mutex::new(Hooks::default()),
                rerun_requested: Arc::new(AtomicBool::new(false)),
                owner: Mutex::new(Weak::new()),
                parent: Mutex::new(Weak::new()),
            }),
        }
    }

    pub fn id(&self) -> OperationId {
        self.inner.id
    }

    pub fn bind(&self, caller: &ApiCaller) {
        *self.inner.owner.lock() = caller.downgrade();
    }

    pub fn caller(&self) -> Option<ApiCaller> {
        ApiCaller::from_weak(&self.inner.owner.lock())
    }

    pub(crate) fn set_parent(&self, flow: Weak<FlowInner>) {
        *self.inner.parent.lock() = flow;
    }

    pub fn parent(&self) -> Option<Flow> {
        Flow::from_weak(&self.inner.parent.lock())
    }

    /// Snapshot of the request as the next attempt would send it.
    pub fn request(&self) -> ClientRequest {
        self.inner.state.lock().request.clone()
    }

    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase(), Phase::Building | Phase::InFlight)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase(), Phase::Finished(_) | Phase::Cancelled)
    }

    /// Result of the latest finished attempt.
    pub fn result(&self) -> Option<Arc<ServerResult>> {
        self.inner.state.lock().result.clone()
    }

    /// 0.0 until the attempt finishes; mocked attempts complete at once.
    pub fn progress(&self) -> f32 {
        self.inner.state.lock().progress
    }

    pub fn attempts(&self) -> u32 {
        self.inner.state.lock().attempts
    }

    pub fn set_mock_mode(&self, mode: MockMode) -> &Self {
        self.inner.state.lock().request.set_mock_mode(mode);
        self
    }

    pub fn set_mocked_response(&self, body: impl Into<String>) -> &Self {
        self.inner.state.lock().request.set_mocked_response(body);
        self
    }

    pub fn set_header(&self, key: impl Into<String>, value: impl Into<String>) -> &Self {
        self.inner.state.lock().request.set_header(key, value);
        self
    }

    pub fn override_content(&self, content: Option<Value>) -> &Self {
        self.inner.state.lock().request.override_content(content);
        self
    }

    pub fn on_start<F>(&self, hook: F) -> &Self
    where
        F: Fn(&ClientRequest) + Send + Sync + 'static,
    {
        self.inner.hooks.lock().on_start.push(Arc::new(hook));
        self
    }

    pub fn on_finish<F>(&self, hook: F) -> &Self
    where
        F: Fn(&ServerResult) + Send + Sync + 'static,
    {
        self.inner.hooks.lock().on_finish.push(Arc::new(hook));
        self
    }

    pub fn on_success<F>(&self, hook: F) -> &Self
    where
        F: Fn(&ServerResult) + Send + Sync + 'static,
    {
        self.inner.hooks.lock().on_success.push(Arc::new(hook));
        self
    }

    pub fn on_fail<F>(&self, hook: F) -> &Self
    where
        F: Fn(&ServerResult) + Send + Sync + 'static,
    {
        self.inner.hooks.lock().on_fail.push(Arc::new(hook));
        self
    }

    /// Register a pre-flight guard. When `condition` holds, the attempt
    /// finishes with a `ClientFail` result carrying `message`, `code` and
    /// `failure_handling`, and nothing is sent.
    pub fn abort_on<F>(&self, condition: F, message: impl Into<String>, failure_handling: FailureHandling, code: i64) -> &Self
    where
        F: Fn(&ClientRequest) -> bool + Send + Sync + 'static,
    {
        self.inner.hooks.lock().guards.push(Guard {
            condition: Arc::new(condition),
            message: message.into(),
            failure_handling,
            code,
        });
        self
    }

    /// Abort the transport call if one is in flight and suppress every
    /// completion callback. A cancelled operation cannot be run again.
    pub fn cancel(&self) {
        let mut state = self.inner.state.lock();
        state.cancel.cancel();
        if !matches!(state.phase, Phase::Finished(_)) {
            state.phase = Phase::Cancelled;
        }
        tracing::debug!(id = %self.inner.id, path = state.request.path(), "operation cancelled");
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.state.lock().cancel.is_cancelled()
    }

    pub(crate) fn rerun_flag(&self) -> Arc<AtomicBool> {
        self.inner.rerun_requested.clone()
    }

    /// Ask for a rerun once the current attempt finishes.
    pub fn request_rerun(&self) {
        self.inner.rerun_requested.store(true, Ordering::SeqCst);
    }

    /// Marks the operation as tracked by `validator`; `false` if it
    /// already was.
    pub(crate) fn mark_tracked(&self, validator: Uuid) -> bool {
        let mut state = self.inner.state.lock();
        if state.tracked_by.contains(&validator) {
            return false;
        }
        state.tracked_by.push(validator);
        true
    }

    /// Count a rerun against the budget; `false` once `limit` is reached.
    pub(crate) fn consume_rerun(&self, limit: u32) -> bool {
        let mut state = self.inner.state.lock();
        if state.reruns >= limit {
            return false;
        }
        state.reruns += 1;
        true
    }

    fn reset_reruns(&self) {
        self.inner.state.lock().reruns = 0;
    }

    /// Run with the bound caller.
    pub async fn run(&self) -> Result<Arc<ServerResult>, CallError> {
        let caller = self
            .caller()
            .ok_or_else(|| CallError::MissingDependency("operation is not bound to an ApiCaller".to_string()))?;
        self.execute(caller).await
    }

    /// Bind to `caller`, then run.
    pub async fn run_on(&self, caller: &ApiCaller) -> Result<Arc<ServerResult>, CallError> {
        self.bind(caller);
        self.execute(caller.clone()).await
    }

    pub(crate) fn execute(&self, caller: ApiCaller) -> BoxFuture<'static, Result<Arc<ServerResult>, CallError>> {
        let operation = self.clone();
        async move {
            let result = match operation.attempt(&caller).await {
                Ok(result) => result,
                Err(err) => {
                    if matches!(err, CallError::MissingDependency(_)) {
                        tracing::error!(id = %operation.id(), error = %err, "operation aborted");
                    }
                    return Err(err);
                }
            };
            if !operation.inner.rerun_requested.swap(false, Ordering::SeqCst) {
                operation.reset_reruns();
                return Ok(result);
            }
            let Some(validator) = caller.validator() else {
                operation.reset_reruns();
                return Ok(result);
            };
            match validator.rerun(&operation, &caller).await {
                Rerun::Completed(outcome) => outcome,
                Rerun::Scheduled => Ok(result),
                Rerun::Skipped => {
                    operation.reset_reruns();
                    Ok(result)
                }
            }
        }
        .boxed()
    }

    /// Move to `Building` and snapshot the request for this attempt.
    fn begin_attempt(&self, forced_mock: Option<MockMode>) -> Result<(ClientRequest, CancellationToken), CallError> {
        let mut state = self.inner.state.lock();
        match state.phase {
            Phase::Building | Phase::InFlight => return Err(CallError::AlreadyRunning),
            Phase::Cancelled => return Err(CallError::Cancelled),
            Phase::Created | Phase::Finished(_) => {}
        }
        if state.cancel.is_cancelled() {
            return Err(CallError::Cancelled);
        }
        state.phase = Phase::Building;
        state.progress = 0.0;
        state.attempts += 1;
        let mut request = state.request.clone();
        if let Some(mode) = forced_mock {
            request.set_mock_mode(mode);
        }
        Ok((request, state.cancel.clone()))
    }

    fn set_phase(&self, phase: Phase) {
        self.inner.state.lock().phase = phase;
    }

    fn first_failed_guard(&self, request: &ClientRequest) -> Option<ServerResult> {
        let guards = self.inner.hooks.lock().guards.clone();
        guards.into_iter().find_map(|guard| {
            (guard.condition)(request)
                .then(|| ServerResult::client_fail(guard.message, guard.code, guard.failure_handling))
        })
    }

    async fn attempt(&self, caller: &ApiCaller) -> Result<Arc<ServerResult>, CallError> {
        let config = caller
            .config()
            .ok_or_else(|| CallError::MissingDependency("ApiCaller has no configuration".to_string()))?;
        if let Some(validator) = caller.validator() {
            validator.track(self, caller);
        }
        let (request, cancel) = self.begin_attempt(config.force_mock_mode)?;
        let started = Instant::now();
        let events = caller.events();
        let logger = RequestLogger::new(config.log_option);

        if let Some(aborted) = self.first_failed_guard(&request) {
            return self.complete(caller, &request, aborted, false, &logger);
        }

        let http = if request.is_mocked() {
            None
        } else {
            let settings = ConnectionSettings::from_config(&config, caller.session(), &caller.header_modifications());
            match TransportRequestBuilder::new(&settings).build(&request) {
                Ok(http) => Some(http),
                Err(CallError::MissingDependency(reason)) => {
                    self.set_phase(Phase::Created);
                    return Err(CallError::MissingDependency(reason));
                }
                Err(err) => {
                    let failed = ServerResult::client_fail(err.to_string(), -1, request.failure_handling());
                    return self.complete(caller, &request, failed, false, &logger);
                }
            }
        };

        logger.log_start(&request, http.as_ref().map_or("", |http| http.url.as_str()));
        let on_start = self.inner.hooks.lock().on_start.clone();
        for hook in on_start {
            hook(&request);
        }
        events.publish(NetworkEvent::RequestSent(&request));
        let show_loading = request.show_loading();
        if show_loading {
            events.publish(NetworkEvent::ShowLoading(&request));
        }
        self.set_phase(Phase::InFlight);

        let response = match http {
            None => HttpResponse::default(),
            Some(http) => {
                let timeout = http.timeout;
                let transport = caller.transport();
                tokio::select! {
                    _ = cancel.cancelled() => {
                        if show_loading {
                            events.publish(NetworkEvent::HideLoading(&request));
                        }
                        self.set_phase(Phase::Cancelled);
                        return Err(CallError::Cancelled);
                    }
                    response = tokio::time::timeout(timeout, transport.issue(http)) => {
                        response.unwrap_or_else(|_| HttpResponse::failed(TransportError::Timeout))
                    }
                }
            }
        };

        let result = ResultNormalizer::new(&config.server_result_rule)
            .normalize(&request, &response)
            .with_elapsed(started.elapsed());
        self.complete(caller, &request, result, show_loading, &logger)
    }

    fn complete(
        &self,
        caller: &ApiCaller,
        request: &ClientRequest,
        result: ServerResult,
        loading_shown: bool,
        logger: &RequestLogger,
    ) -> Result<Arc<ServerResult>, CallError> {
        let result = Arc::new(result);
        {
            let mut state = self.inner.state.lock();
            if state.cancel.is_cancelled() {
                state.phase = Phase::Cancelled;
                return Err(CallError::Cancelled);
            }
            state.phase = Phase::Finished(result.status());
            state.progress = 1.0;
            state.result = Some(result.clone());
        }

        let (on_finish, outcome_hooks) = {
            let hooks = self.inner.hooks.lock();
            let outcome = if result.is_success() {
                hooks.on_success.clone()
            } else {
                hooks.on_fail.clone()
            };
            (hooks.on_finish.clone(), outcome)
        };
        for hook in on_finish.iter().chain(outcome_hooks.iter()) {
            hook(&result);
        }

        let events = caller.events();
        if loading_shown {
            events.publish(NetworkEvent::HideLoading(request));
        }
        self.sync_server_time(caller, &result);
        events.publish(NetworkEvent::ResultReceived(&result));

        let settings = &request.form().settings;
        match result.status() {
            ResultStatus::Success => events.publish(NetworkEvent::ServerSuccess(&result)),
            ResultStatus::ServerFail => {
                events.publish(NetworkEvent::ServerFail(&result));
                if settings.show_error_on_server_fail {
                    events.publish(NetworkEvent::ShowServerFailError(&result));
                }
            }
            ResultStatus::ConnectionFail => {
                events.publish(NetworkEvent::ConnectionFail(&result));
                if settings.show_error_on_connection_fail {
                    events.publish(NetworkEvent::ShowConnectionFailError(&result));
                }
            }
            ResultStatus::ClientFail => {
                events.publish(NetworkEvent::ClientFail(&result));
                if settings.show_error_on_client_fail {
                    events.publish(NetworkEvent::ShowClientFailError(&ClientError::from(result.as_ref())));
                }
            }
        }

        logger.log_result(request, &result);
        Ok(result)
    }

    fn sync_server_time(&self, caller: &ApiCaller, result: &ServerResult) {
        let time = if result.is_mocked() {
            let now = caller.clock().now(TimeFormat::Utc);
            caller.events().set_server_time(now);
            Some(now)
        } else {
            match result.timestamp() {
                Some(raw) => caller.events().update_server_time(raw),
                None => None,
            }
        };
        if let Some(time) = time {
            caller.session().set_latest_server_time(time);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CallerConfig;
    use crate::form::{FormSettings, RequestForm};
    use crate::http::{HttpRequest, Transport};
    use crate::result::{ResultRule, StatusCodeRange};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Replies from a queue and records every request it sees.
    #[derive(Default)]
    struct Scripted {
        replies: Mutex<VecDeque<HttpResponse>>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl Scripted {
        fn replying(replies: impl IntoIterator<Item = HttpResponse>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().collect()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn count(&self) -> usize {
            self.seen.lock().len()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn issue(&self, request: HttpRequest) -> HttpResponse {
            self.seen.lock().push(request);
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| HttpResponse::new(200, r#"{"statusCode":200}"#))
        }
    }

    struct Stalled;

    #[async_trait]
    impl Transport for Stalled {
        async fn issue(&self, _request: HttpRequest) -> HttpResponse {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            HttpResponse::new(200, "")
        }
    }

    fn config() -> CallerConfig {
        let mut config = CallerConfig::for_base_url("http://localhost:3000");
        config.server_result_rule = ResultRule::with_ranges([StatusCodeRange::new(200, 299)]);
        config
    }

    fn caller(transport: Arc<Scripted>) -> ApiCaller {
        ApiCaller::builder_shared(transport).config(config()).build()
    }

    #[tokio::test]
    async fn unbound_operation_is_missing_dependency() {
        let op = Operation::new(ClientRequest::new(RequestForm::get("/items"), None));
        assert!(matches!(op.run().await, Err(CallError::MissingDependency(_))));
        assert_eq!(op.phase(), Phase::Created);
    }

    #[tokio::test]
    async fn caller_without_config_is_missing_dependency() {
        let transport = Scripted::replying([]);
        let caller = ApiCaller::builder_shared(transport.clone()).build();
        let op = caller.create(RequestForm::get("/items"), None);
        assert!(matches!(op.run().await, Err(CallError::MissingDependency(_))));
        assert_eq!(transport.count(), 0);
    }

    #[tokio::test]
    async fn dropped_caller_is_missing_dependency() {
        let op = caller(Scripted::replying([])).create(RequestForm::get("/items"), None);
        assert!(matches!(op.run().await, Err(CallError::MissingDependency(_))));
    }

    #[tokio::test]
    async fn hooks_fire_in_order_and_result_is_stable() {
        let transport = Scripted::replying([HttpResponse::new(200, r#"{"statusCode":200,"data":{"id":7}}"#)]);
        let caller = caller(transport.clone());
        let log = Arc::new(Mutex::new(Vec::new()));
        let op = caller.create(RequestForm::get("/items"), None);
        let (a, b, c, d) = (log.clone(), log.clone(), log.clone(), log.clone());
        op.on_start(move |_| a.lock().push("start"))
            .on_finish(move |_| b.lock().push("finish"))
            .on_success(move |_| c.lock().push("success"))
            .on_fail(move |_| d.lock().push("fail"));
        let sink = log.clone();
        caller.events().subscribe(move |event| {
            if let NetworkEvent::ServerSuccess(_) = event {
                sink.lock().push("event");
            }
        });

        let result = op.run().await.unwrap();
        assert_eq!(*log.lock(), vec!["start", "finish", "success", "event"]);
        assert_eq!(op.phase(), Phase::Finished(ResultStatus::Success));
        assert_eq!(op.progress(), 1.0);
        assert!(Arc::ptr_eq(&result, &op.result().unwrap()));
        assert_eq!(op.result().unwrap().field("id"), Some(&json!(7)));
        assert_eq!(transport.count(), 1);
    }

    #[tokio::test]
    async fn mocked_operation_never_touches_transport() {
        let transport = Scripted::replying([]);
        let caller = caller(transport.clone());
        for (mode, status) in [
            (MockMode::MockSuccess, ResultStatus::Success),
            (MockMode::MockServerFail, ResultStatus::ServerFail),
            (MockMode::MockConnectionFail, ResultStatus::ConnectionFail),
        ] {
            let op = caller.create(RequestForm::post("/login"), Some(json!({"user": "a"})));
            op.set_mock_mode(mode).set_mocked_response(r#"{"token":"xyz"}"#);
            let result = op.run().await.unwrap();
            assert_eq!(result.status(), status);
            assert!(result.is_mocked());
        }
        assert_eq!(transport.count(), 0);
        assert!(caller.session().latest_server_time().is_some());
    }

    #[tokio::test]
    async fn forced_mock_mode_applies_to_every_call() {
        let transport = Scripted::replying([]);
        let mut config = config();
        config.force_mock_mode = Some(MockMode::MockServerFail);
        let caller = ApiCaller::builder_shared(transport.clone()).config(config).build();
        let result = caller.create(RequestForm::get("/items"), None).run().await.unwrap();
        assert_eq!(result.status(), ResultStatus::ServerFail);
        assert_eq!(transport.count(), 0);
    }

    #[tokio::test]
    async fn guard_aborts_without_network() {
        let transport = Scripted::replying([]);
        let caller = caller(transport.clone());
        let op = caller.create(RequestForm::get("/items"), None);
        op.abort_on(|_| false, "never", FailureHandling::None, 1)
            .abort_on(|_| true, "inventory is locked", FailureHandling::SuggestReload, 42);
        let shown = Arc::new(Mutex::new(None));
        let sink = shown.clone();
        caller.events().subscribe(move |event| {
            if let NetworkEvent::ShowClientFailError(error) = event {
                *sink.lock() = Some((*error).clone());
            }
        });

        let result = op.run().await.unwrap();
        assert_eq!(result.status(), ResultStatus::ClientFail);
        assert_eq!(result.message(), Some("inventory is locked"));
        assert_eq!(result.code(), 42);
        assert_eq!(result.failure_handling(), FailureHandling::SuggestReload);
        assert_eq!(transport.count(), 0);
        assert_eq!(shown.lock().as_ref().map(|e| e.code), Some(42));
    }

    #[tokio::test]
    async fn silent_forms_do_not_ask_for_error_dialogs() {
        let transport = Scripted::replying([HttpResponse::new(500, r#"{"statusCode":500,"message":"boom"}"#)]);
        let caller = caller(transport);
        let dialogs = Arc::new(Mutex::new(0));
        let failures = Arc::new(Mutex::new(0));
        let (d, f) = (dialogs.clone(), failures.clone());
        caller.events().subscribe(move |event| match event {
            NetworkEvent::ShowServerFailError(_) | NetworkEvent::ShowLoading(_) => *d.lock() += 1,
            NetworkEvent::ServerFail(_) => *f.lock() += 1,
            _ => {}
        });
        let form = RequestForm::get("/items").with_settings(FormSettings::silent());
        let result = caller.create(form, None).run().await.unwrap();
        assert_eq!(result.status(), ResultStatus::ServerFail);
        assert_eq!(*dialogs.lock(), 0);
        assert_eq!(*failures.lock(), 1);
    }

    #[tokio::test]
    async fn failure_handling_follows_the_form() {
        let transport = Scripted::replying([HttpResponse::failed(TransportError::Unreachable("dns".into()))]);
        let caller = caller(transport);
        let mut settings = FormSettings::default();
        settings.failure_handling = FailureHandling::SuggestRetry;
        let result = caller
            .create(RequestForm::get("/items").with_settings(settings), None)
            .run()
            .await
            .unwrap();
        assert_eq!(result.status(), ResultStatus::ConnectionFail);
        assert_eq!(result.failure_handling(), FailureHandling::SuggestRetry);
    }

    #[tokio::test]
    async fn invalid_request_becomes_client_fail() {
        let transport = Scripted::replying([]);
        let caller = caller(transport.clone());
        let form = RequestForm::new("/items", crate::http::HttpMethod::Get, crate::form::ParameterType::Query);
        let result = caller.create(form, Some(json!("not an object"))).run().await.unwrap();
        assert_eq!(result.status(), ResultStatus::ClientFail);
        assert_eq!(transport.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_connection_fail() {
        let mut config = config();
        config.timeout_seconds = 2;
        let caller = ApiCaller::builder(Stalled).config(config).build();
        let result = caller.create(RequestForm::get("/slow"), None).run().await.unwrap();
        assert_eq!(result.status(), ResultStatus::ConnectionFail);
        assert_eq!(result.transport_error(), Some("request timed out"));
    }

    #[tokio::test]
    async fn cancel_in_flight_suppresses_callbacks() {
        let caller = ApiCaller::builder(Stalled).config(config()).build();
        let op = caller.create(RequestForm::get("/slow"), None);
        let fired = Arc::new(AtomicBool::new(false));
        let (s, f) = (fired.clone(), fired.clone());
        op.on_success(move |_| s.store(true, Ordering::SeqCst))
            .on_fail(move |_| f.store(true, Ordering::SeqCst));

        let running = op.clone();
        let handle = tokio::spawn(async move { running.run().await });
        while op.phase() != Phase::InFlight {
            tokio::task::yield_now().await;
        }
        op.cancel();
        assert_eq!(handle.await.unwrap(), Err(CallError::Cancelled));
        assert_eq!(op.phase(), Phase::Cancelled);
        assert!(op.result().is_none());
        assert!(!fired.load(Ordering::SeqCst));
        assert_eq!(op.run().await, Err(CallError::Cancelled));
    }

    #[tokio::test]
    async fn second_run_while_in_flight_is_rejected() {
        let caller = ApiCaller::builder(Stalled).config(config()).build();
        let op = caller.create(RequestForm::get("/slow"), None);
        let running = op.clone();
        let handle = tokio::spawn(async move { running.run().await });
        while op.phase() != Phase::InFlight {
            tokio::task::yield_now().await;
        }
        assert_eq!(op.run().await, Err(CallError::AlreadyRunning));
        op.cancel();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn server_time_from_result_reaches_session_and_hub() {
        let body = r#"{"statusCode":200,"currentDateTime":"2024-05-01T10:00:00Z"}"#;
        let caller = caller(Scripted::replying([HttpResponse::new(200, body)]));
        caller.create(RequestForm::get("/items"), None).run().await.unwrap();
        let time = caller.session().latest_server_time().unwrap();
        assert_eq!(time.to_string(), "2024-05-01 10:00:00");
        assert_eq!(caller.events().latest_server_time(), Some(time));
    }

    #[tokio::test]
    async fn request_overrides_reach_the_transport() {
        let transport = Scripted::replying([]);
        let caller = caller(transport.clone());
        caller.set_header("X-Build", "42");
        let op = caller.create(RequestForm::post("/items"), Some(json!({"a": 1})));
        op.set_header("X-Trace", "t").override_content(Some(json!({"a": 2})));
        op.run().await.unwrap();
        let seen = transport.seen.lock();
        assert_eq!(seen[0].headers.get("x-build"), Some("42"));
        assert_eq!(seen[0].headers.get("x-trace"), Some("t"));
        assert_eq!(seen[0].body.as_deref(), Some(r#"{"a":2}"#));
    }
}
