//! Ordered groups of operations.
//!
//! # Design
//! A `Flow` is a shared, mutable list. Running it never holds the list
//! lock across an operation, so hooks of a running operation may insert,
//! remove or append entries of the very flow that is running them. After
//! each operation finishes, the series loop looks the operation up again
//! by id; entries inserted before it shift the cursor instead of being
//! skipped or run twice.
//!
//! One-shot entries (used for token-refresh injection) are removed from
//! the list once they have run.

use std::sync::{Arc, Weak};

use futures::future::join_all;
use parking_lot::Mutex;

use crate::error::CallError;
use crate::operation::{Operation, OperationId};
use crate::result::ServerResult;

/// What a series run does after an operation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBehavior {
    #[default]
    Continue,
    /// Cancel every operation that has not started yet.
    CancelAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowMode {
    Series,
    Parallel,
}

#[derive(Debug, Clone)]
pub struct FlowOutcome {
    pub id: OperationId,
    pub outcome: Result<Arc<ServerResult>, CallError>,
}

impl FlowOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(&self.outcome, Ok(result) if result.is_success())
    }
}

/// Per-run record, in execution order.
#[derive(Debug, Clone, Default)]
pub struct FlowReport {
    pub outcomes: Vec<FlowOutcome>,
    pub cancelled: Vec<OperationId>,
}

impl FlowReport {
    pub fn executed(&self) -> Vec<OperationId> {
        self.outcomes.iter().map(|o| o.id).collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.cancelled.is_empty() && self.outcomes.iter().all(FlowOutcome::succeeded)
    }
}

#[derive(Clone)]
struct Entry {
    operation: Operation,
    one_shot: bool,
}

#[derive(Default)]
struct FlowState {
    entries: Vec<Entry>,
    mode: Option<FlowMode>,
    cursor: Option<OperationId>,
    resume_from: Option<usize>,
}

impl FlowState {
    fn position(&self, id: OperationId) -> Option<usize> {
        self.entries.iter().position(|e| e.operation.id() == id)
    }
}

#[derive(Default)]
pub(crate) struct FlowInner {
    state: Mutex<FlowState>,
}

#[derive(Clone, Default)]
pub struct Flow {
    inner: Arc<FlowInner>,
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Flow")
            .field("len", &state.entries.len())
            .field("mode", &state.mode)
            .finish()
    }
}

/// Clears the running state even if the run future is dropped midway.
struct RunGuard<'a>(&'a FlowInner);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.0.state.lock();
        state.mode = None;
        state.cursor = None;
        state.resume_from = None;
    }
}

impl Flow {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_weak(weak: &Weak<FlowInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Append `operation` and make this flow its parent.
    pub fn add(&self, operation: &Operation) -> &Self {
        operation.set_parent(Arc::downgrade(&self.inner));
        self.push(operation, false);
        self
    }

    /// Append without claiming parenthood (for detached helper flows).
    pub(crate) fn add_detached(&self, operation: &Operation) -> &Self {
        self.push(operation, false);
        self
    }

    fn push(&self, operation: &Operation, one_shot: bool) {
        self.inner.state.lock().entries.push(Entry {
            operation: operation.clone(),
            one_shot,
        });
    }

    /// Splice `operation` in before `index` (clamped to the end).
    pub fn insert(&self, index: usize, operation: &Operation) -> &Self {
        self.insert_entry(index, operation, false);
        self
    }

    /// Like `insert`, but the entry is dropped from the flow after it runs.
    pub fn insert_one_shot(&self, index: usize, operation: &Operation) -> &Self {
        self.insert_entry(index, operation, true);
        self
    }

    fn insert_entry(&self, index: usize, operation: &Operation, one_shot: bool) {
        operation.set_parent(Arc::downgrade(&self.inner));
        let mut state = self.inner.state.lock();
        let index = index.min(state.entries.len());
        state.entries.insert(
            index,
            Entry {
                operation: operation.clone(),
                one_shot,
            },
        );
    }

    pub fn remove(&self, operation: &Operation) -> bool {
        let removed = {
            let mut state = self.inner.state.lock();
            let before = state.entries.len();
            state.entries.retain(|e| e.operation.id() != operation.id());
            state.entries.len() != before
        };
        if removed && operation.parent().is_some_and(|p| Arc::ptr_eq(&p.inner, &self.inner)) {
            operation.set_parent(Weak::new());
        }
        removed
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.inner
            .state
            .lock()
            .entries
            .iter()
            .map(|e| e.operation.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn position(&self, operation: &Operation) -> Option<usize> {
        self.inner.state.lock().position(operation.id())
    }

    pub fn mode(&self) -> Option<FlowMode> {
        self.inner.state.lock().mode
    }

    pub fn is_running(&self) -> bool {
        self.mode().is_some()
    }

    /// The operation currently building or in flight, if any.
    pub fn running_operation(&self) -> Option<Operation> {
        let entries: Vec<Operation> = self.operations();
        entries.into_iter().find(Operation::is_running)
    }

    /// Put `refresh` right before `failed` and make the running series
    /// continue from it. `false` unless `failed` is this flow's current
    /// series operation.
    pub(crate) fn splice_retry(&self, failed: OperationId, refresh: &Operation) -> bool {
        let mut state = self.inner.state.lock();
        if state.mode != Some(FlowMode::Series) || state.cursor != Some(failed) {
            return false;
        }
        let Some(index) = state.position(failed) else {
            return false;
        };
        refresh.set_parent(Arc::downgrade(&self.inner));
        state.entries.insert(
            index,
            Entry {
                operation: refresh.clone(),
                one_shot: true,
            },
        );
        state.resume_from = Some(index);
        true
    }

    fn begin(&self, mode: FlowMode) -> Result<RunGuard<'_>, CallError> {
        let mut state = self.inner.state.lock();
        if state.mode.is_some() {
            return Err(CallError::AlreadyRunning);
        }
        state.mode = Some(mode);
        state.resume_from = None;
        Ok(RunGuard(&self.inner))
    }

    /// Run entries one after another starting at `start`. Operation `i + 1`
    /// is not started before operation `i` has finished.
    pub async fn run_as_series(&self, stop: StopBehavior, start: usize) -> Result<FlowReport, CallError> {
        let _guard = self.begin(FlowMode::Series)?;
        let mut stop = stop;
        let mut index = start;
        let mut report = FlowReport::default();

        loop {
            let next = {
                let mut state = self.inner.state.lock();
                let next = state.entries.get(index).map(|e| e.operation.clone());
                state.cursor = next.as_ref().map(Operation::id);
                next
            };
            let Some(operation) = next else {
                break;
            };

            let outcome = operation.run().await;
            let failed = !matches!(&outcome, Ok(result) if result.is_success());
            report.outcomes.push(FlowOutcome {
                id: operation.id(),
                outcome,
            });

            let mut state = self.inner.state.lock();
            state.cursor = None;
            let position = state.position(operation.id());
            if let Some(resume) = state.resume_from.take() {
                // A retry was spliced in before this operation; a failing
                // retry must not let the rest of the queue through.
                tracing::debug!(resume, "series resumes at injected refresh");
                index = resume;
                stop = StopBehavior::CancelAll;
                continue;
            }
            index = match position {
                Some(p) if state.entries[p].one_shot => {
                    state.entries.remove(p);
                    p
                }
                Some(p) => p + 1,
                None => index,
            };
            if failed && stop == StopBehavior::CancelAll {
                let pending: Vec<Operation> = state.entries[index.min(state.entries.len())..]
                    .iter()
                    .map(|e| e.operation.clone())
                    .collect();
                drop(state);
                for operation in pending {
                    operation.cancel();
                    report.cancelled.push(operation.id());
                }
                tracing::debug!(cancelled = report.cancelled.len(), "series stopped after failure");
                break;
            }
        }

        self.inner.state.lock().entries.retain(|e| {
            !(e.one_shot && report.outcomes.iter().any(|o| o.id == e.operation.id()))
        });
        Ok(report)
    }

    /// Start every entry at once and wait for all of them.
    pub async fn run_in_parallel(&self) -> Result<FlowReport, CallError> {
        let _guard = self.begin(FlowMode::Parallel)?;
        let operations = self.operations();
        let outcomes = join_all(operations.iter().map(|operation| operation.run())).await;
        let report = FlowReport {
            outcomes: operations
                .iter()
                .zip(outcomes)
                .map(|(operation, outcome)| FlowOutcome {
                    id: operation.id(),
                    outcome,
                })
                .collect(),
            cancelled: Vec::new(),
        };
        self.inner
            .state
            .lock()
            .entries
            .retain(|e| !(e.one_shot && report.outcomes.iter().any(|o| o.id == e.operation.id())));
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caller::ApiCaller;
    use crate::config::CallerConfig;
    use crate::form::RequestForm;
    use crate::http::{HttpRequest, HttpResponse, Transport};
    use crate::operation::Phase;
    use crate::result::{ResultRule, StatusCodeRange};
    use async_trait::async_trait;

    /// Answers 200 except for paths containing `fail`, and logs paths.
    #[derive(Default)]
    struct PathLog {
        paths: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for PathLog {
        async fn issue(&self, request: HttpRequest) -> HttpResponse {
            let path = request.url.trim_start_matches("http://test").to_string();
            let status = if path.contains("fail") { 500 } else { 200 };
            self.paths.lock().push(path);
            tokio::task::yield_now().await;
            HttpResponse::new(status, format!(r#"{{"statusCode":{status}}}"#))
        }
    }

    fn setup() -> (ApiCaller, Arc<PathLog>) {
        let transport = Arc::new(PathLog::default());
        let mut config = CallerConfig::for_base_url("http://test");
        config.server_result_rule = ResultRule::with_ranges([StatusCodeRange::new(200, 299)]);
        let caller = ApiCaller::builder_shared(transport.clone()).config(config).build();
        (caller, transport)
    }

    fn op(caller: &ApiCaller, path: &str) -> Operation {
        caller.create(RequestForm::get(path), None)
    }

    #[tokio::test]
    async fn series_runs_in_order_and_continues_after_failure() {
        let (caller, transport) = setup();
        let flow = Flow::new();
        flow.add(&op(&caller, "/a")).add(&op(&caller, "/fail")).add(&op(&caller, "/c"));
        let report = flow.run_as_series(StopBehavior::Continue, 0).await.unwrap();
        assert_eq!(*transport.paths.lock(), vec!["/a", "/fail", "/c"]);
        assert_eq!(report.outcomes.len(), 3);
        assert!(!report.all_succeeded());
        assert!(!flow.is_running());
    }

    #[tokio::test]
    async fn cancel_all_stops_the_queue() {
        let (caller, transport) = setup();
        let flow = Flow::new();
        let last = op(&caller, "/c");
        flow.add(&op(&caller, "/a")).add(&op(&caller, "/fail")).add(&last);
        let report = flow.run_as_series(StopBehavior::CancelAll, 0).await.unwrap();
        assert_eq!(*transport.paths.lock(), vec!["/a", "/fail"]);
        assert_eq!(report.cancelled, vec![last.id()]);
        assert_eq!(last.phase(), Phase::Cancelled);
    }

    #[tokio::test]
    async fn start_index_skips_earlier_entries() {
        let (caller, transport) = setup();
        let flow = Flow::new();
        flow.add(&op(&caller, "/a")).add(&op(&caller, "/b"));
        flow.run_as_series(StopBehavior::Continue, 1).await.unwrap();
        assert_eq!(*transport.paths.lock(), vec!["/b"]);
    }

    #[tokio::test]
    async fn hooks_may_mutate_the_running_flow() {
        let (caller, transport) = setup();
        let flow = Flow::new();
        let first = op(&caller, "/a");
        let injected = op(&caller, "/injected");
        let early = op(&caller, "/early");
        let (handle, inj, ear) = (flow.clone(), injected.clone(), early.clone());
        first.on_finish(move |_| {
            // after the current entry, and before it: neither is skipped
            handle.insert(1, &inj);
            handle.insert_one_shot(0, &ear);
        });
        flow.add(&first).add(&op(&caller, "/b"));
        flow.run_as_series(StopBehavior::Continue, 0).await.unwrap();
        assert_eq!(*transport.paths.lock(), vec!["/a", "/injected", "/b"]);
        assert_eq!(flow.position(&early), Some(0));
        assert_eq!(flow.len(), 4);
    }

    #[tokio::test]
    async fn one_shot_entries_are_dropped_after_running() {
        let (caller, transport) = setup();
        let flow = Flow::new();
        let keep = op(&caller, "/keep");
        flow.add(&keep).insert_one_shot(0, &op(&caller, "/once"));
        flow.run_as_series(StopBehavior::Continue, 0).await.unwrap();
        assert_eq!(*transport.paths.lock(), vec!["/once", "/keep"]);
        assert_eq!(flow.operations(), vec![keep]);
    }

    #[tokio::test]
    async fn running_operation_is_visible_while_in_flight() {
        let (caller, _transport) = setup();
        let flow = Flow::new();
        let first = op(&caller, "/a");
        let seen = Arc::new(Mutex::new(None));
        let (handle, sink) = (flow.clone(), seen.clone());
        first.on_start(move |_| {
            *sink.lock() = handle.running_operation().map(|o| o.id());
        });
        flow.add(&first);
        assert!(flow.running_operation().is_none());
        flow.run_as_series(StopBehavior::Continue, 0).await.unwrap();
        assert_eq!(*seen.lock(), Some(first.id()));
        assert!(flow.running_operation().is_none());
    }

    #[tokio::test]
    async fn parallel_runs_everything() {
        let (caller, transport) = setup();
        let flow = Flow::new();
        flow.add(&op(&caller, "/a")).add(&op(&caller, "/b")).add(&op(&caller, "/fail"));
        let report = flow.run_in_parallel().await.unwrap();
        let mut paths = transport.paths.lock().clone();
        paths.sort();
        assert_eq!(paths, vec!["/a", "/b", "/fail"]);
        assert_eq!(report.outcomes.iter().filter(|o| o.succeeded()).count(), 2);
    }

    #[tokio::test]
    async fn removing_clears_parent() {
        let (caller, _transport) = setup();
        let flow = Flow::new();
        let a = op(&caller, "/a");
        flow.add(&a);
        assert!(a.parent().is_some());
        assert!(flow.remove(&a));
        assert!(a.parent().is_none());
        assert!(!flow.remove(&a));
        assert!(flow.is_empty());
    }
}
