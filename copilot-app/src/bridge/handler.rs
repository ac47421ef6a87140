//! Call bridge - correlates outbound calls with replies from the host
//!
//! Each call gets a fresh [`CallId`] and a pending entry holding its
//! response handler. The entry leaves the pending set exactly once: when
//! a matching reply arrives, when delivery fails up front, when it
//! expires, or when the bridge is torn down (the only path that does not
//! invoke the handler).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use copilot_rpc::{
    CallId, CallRequest, CallResult, FunctionCallMessage, InboundMessage, TargetOrigin,
};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use super::host::HostChannel;
use crate::error::BridgeError;

/// Callback for a call result
pub trait CallCallback: Send + FnOnce(CallResult) {}
impl<F: Send + FnOnce(CallResult)> CallCallback for F {}

enum ResponseHandler {
    Callback(Box<dyn CallCallback>),
    Chan(Sender<CallResult>),
    Oneshot(oneshot::Sender<CallResult>),
}

impl ResponseHandler {
    fn invoke(self, result: CallResult) {
        match self {
            ResponseHandler::Callback(f) => f(result),
            ResponseHandler::Chan(tx) => {
                let _ = tx.send(result);
            }
            ResponseHandler::Oneshot(tx) => {
                let _ = tx.send(result);
            }
        }
    }
}

/// A call waiting for its reply
struct PendingCall {
    handler: ResponseHandler,
    /// Remote function name (for logging)
    name: String,
    created_at: Instant,
    deadline: Option<Instant>,
}

/// Counters over the bridge lifetime
#[derive(Debug, Default)]
pub struct BridgeStats {
    /// Calls entered into the pending set
    pub registered: AtomicU64,
    /// Calls resolved by a correlated reply
    pub resolved: AtomicU64,
    /// Calls failed before or during delivery
    pub failed: AtomicU64,
    /// Calls failed by the expiry sweep
    pub expired: AtomicU64,
    /// Calls discarded by teardown
    pub abandoned: AtomicU64,
}

/// How `handle_reply` disposed of an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Correlated and delivered to the caller
    Resolved(CallId),
    /// Came from an origin other than the expected host
    OriginMismatch,
    /// Not a function response
    NotAReply,
    /// Function response without a usable `callId`
    Malformed,
    /// No pending call with this id (stale, duplicate or never issued)
    Unmatched(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeOptions {
    /// Expected hosting origin; replies from elsewhere are ignored
    pub host_origin: Option<String>,
    /// Refuse to post with a wildcard target origin
    pub strict_origin: bool,
    /// Optional deadline for each call
    pub call_timeout: Option<Duration>,
}

/// Bridge between local call intents and the hosting context.
///
/// Cloning yields another handle to the same pending set.
#[derive(Clone)]
pub struct CallBridge {
    host: Arc<dyn HostChannel>,
    options: Arc<BridgeOptions>,
    pending: Arc<Mutex<HashMap<CallId, PendingCall>>>,
    closed: Arc<AtomicBool>,
    stats: Arc<BridgeStats>,
}

impl CallBridge {
    pub fn new(host: Arc<dyn HostChannel>, options: BridgeOptions) -> Self {
        Self {
            host,
            options: Arc::new(options),
            pending: Arc::new(Mutex::new(HashMap::new())),
            closed: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(BridgeStats::default()),
        }
    }

    pub fn host_origin(&self) -> Option<&str> {
        self.options.host_origin.as_deref()
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.options.call_timeout
    }

    /// Whether a message from `origin` may be processed at all
    pub fn accepts_origin(&self, origin: &str) -> bool {
        match self.host_origin() {
            Some(expected) => expected == origin,
            None => true,
        }
    }

    /// Forward a call to the hosting context.
    ///
    /// `callback` runs exactly once: synchronously when the call cannot be
    /// delivered, otherwise when the correlated reply arrives. It does not
    /// run if the bridge is torn down first.
    pub fn initiate_call(
        &self,
        name: impl Into<String>,
        args: Value,
        callback: impl CallCallback + 'static,
    ) {
        self.dispatch(name.into(), args, ResponseHandler::Callback(Box::new(callback)));
    }

    /// Forward a call and await its result.
    ///
    /// Delivery failures resolve to a `CallResult::Error`; the only `Err`
    /// is [`BridgeError::Abandoned`], when teardown discards the call.
    pub async fn call(&self, name: impl Into<String>, args: Value) -> Result<CallResult, BridgeError> {
        let (tx, rx) = oneshot::channel();
        self.dispatch(name.into(), args, ResponseHandler::Oneshot(tx));
        rx.await.map_err(|_| BridgeError::Abandoned)
    }

    /// Forward a call and block until its result arrives.
    ///
    /// Must not be called from the thread that delivers host replies.
    pub fn call_blocking(&self, name: impl Into<String>, args: Value) -> Result<CallResult, BridgeError> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.dispatch(name.into(), args, ResponseHandler::Chan(tx));
        rx.recv().map_err(|_| BridgeError::Abandoned)
    }

    fn dispatch(&self, name: String, args: Value, handler: ResponseHandler) {
        if name.is_empty() {
            self.fail_unregistered(handler, BridgeError::EmptyName);
            return;
        }

        let id = CallId::new();
        let created_at = Instant::now();
        let deadline = self.options.call_timeout.map(|timeout| created_at + timeout);
        let call = PendingCall {
            handler,
            name: name.clone(),
            created_at,
            deadline,
        };

        // `closed` only flips under this lock, so no entry can slip in
        // behind a teardown.
        let refused = {
            let mut pending = self.pending.lock();
            if self.closed.load(Ordering::Acquire) {
                Some(call)
            } else {
                pending.insert(id, call);
                None
            }
        };
        if let Some(call) = refused {
            tracing::warn!(name = %call.name, "Call initiated after bridge teardown");
            self.fail_unregistered(call.handler, BridgeError::Closed);
            return;
        }
        self.stats.registered.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(call_id = %id, name = %name, "Registered pending call");

        if let Err(e) = self.deliver(id, name, args) {
            self.fail_pending(id, e);
        }
    }

    fn deliver(&self, id: CallId, name: String, args: Value) -> Result<(), BridgeError> {
        if !self.host.is_attached() {
            tracing::warn!(call_id = %id, "No hosting context found, call will not be sent");
            return Err(BridgeError::HostUnreachable);
        }

        let target = TargetOrigin::from_expected(self.host_origin());
        if target.is_wildcard() {
            if self.options.strict_origin {
                return Err(BridgeError::OriginUnknown);
            }
            tracing::warn!(
                call_id = %id,
                "Hosting origin unknown, posting call with wildcard target origin"
            );
        }

        let message = FunctionCallMessage::new(CallRequest { id, name, args });
        tracing::debug!(call_id = %id, target = %target, "Posting call to hosting context");
        self.host.post(&message, &target)
    }

    fn fail_unregistered(&self, handler: ResponseHandler, error: BridgeError) {
        self.stats.failed.fetch_add(1, Ordering::Relaxed);
        handler.invoke(CallResult::Error(error.to_payload()));
    }

    fn fail_pending(&self, id: CallId, error: BridgeError) {
        let pending = self.pending.lock().remove(&id);
        if let Some(call) = pending {
            tracing::warn!(call_id = %id, name = %call.name, "Call failed: {}", error);
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            call.handler.invoke(CallResult::Error(error.to_payload()));
        }
    }

    /// Route an inbound message from `origin` to the call it answers.
    ///
    /// Never replays anything; the only side effect is invoking the
    /// correlated handler.
    pub fn handle_reply(&self, message: Value, origin: &str) -> ReplyOutcome {
        if !self.accepts_origin(origin) {
            tracing::trace!(origin, "Ignoring message from unexpected origin");
            return ReplyOutcome::OriginMismatch;
        }

        let reply = match InboundMessage::classify(message) {
            InboundMessage::Response(reply) => reply,
            InboundMessage::Other(_) => return ReplyOutcome::NotAReply,
            InboundMessage::MalformedResponse { reason } => {
                tracing::warn!("Ignoring malformed function response: {}", reason);
                return ReplyOutcome::Malformed;
            }
        };

        let Some(id) = CallId::parse(&reply.call_id) else {
            tracing::warn!(call_id = %reply.call_id, "No pending call for function response");
            return ReplyOutcome::Unmatched(reply.call_id);
        };

        // Released before the handler runs so it can start another call.
        let pending = self.pending.lock().remove(&id);
        match pending {
            Some(call) => {
                tracing::debug!(
                    call_id = %id,
                    name = %call.name,
                    elapsed_ms = call.created_at.elapsed().as_millis(),
                    "Resolved pending call"
                );
                self.stats.resolved.fetch_add(1, Ordering::Relaxed);
                call.handler.invoke(reply.into_call_result());
                ReplyOutcome::Resolved(id)
            }
            None => {
                tracing::warn!(call_id = %id, "No pending call for function response");
                ReplyOutcome::Unmatched(reply.call_id)
            }
        }
    }

    /// Fail every call whose deadline has passed.
    ///
    /// Returns the number of calls expired. A no-op without a timeout.
    pub fn remove_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(CallId, PendingCall)> = {
            let mut pending = self.pending.lock();
            let ids: Vec<CallId> = pending
                .iter()
                .filter(|(_, call)| call.deadline.is_some_and(|deadline| now >= deadline))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|call| (id, call)))
                .collect()
        };

        let count = expired.len();
        for (id, call) in expired {
            let error = BridgeError::TimedOut {
                millis: now.duration_since(call.created_at).as_millis(),
                name: call.name,
            };
            tracing::warn!(call_id = %id, "{}", error);
            self.stats.expired.fetch_add(1, Ordering::Relaxed);
            call.handler.invoke(CallResult::Error(error.to_payload()));
        }
        count
    }

    /// Discard all pending calls without invoking their handlers.
    ///
    /// The bridge refuses new calls afterwards. Returns the number of
    /// calls discarded.
    pub fn teardown(&self) -> usize {
        let abandoned: Vec<PendingCall> = {
            let mut pending = self.pending.lock();
            self.closed.store(true, Ordering::Release);
            pending.drain().map(|(_, call)| call).collect()
        };
        let count = abandoned.len();
        if count > 0 {
            tracing::info!(count, "Discarding pending calls on teardown");
        }
        self.stats.abandoned.fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_pending(&self, id: &CallId) -> bool {
        self.pending.lock().contains_key(id)
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::bridge::host::TopLevel;
    use copilot_rpc::{FUNCTION_RESPONSE, FunctionResponseMessage};

    const HOST: &str = "https://host.example";

    /// Host channel that records what it was asked to post
    #[derive(Default)]
    struct RecordingHost {
        detached: AtomicBool,
        reject: AtomicBool,
        posted: Mutex<Vec<(FunctionCallMessage, TargetOrigin)>>,
    }

    impl RecordingHost {
        fn last_id(&self) -> CallId {
            self.posted.lock().last().expect("nothing posted").0.call.id
        }
    }

    impl HostChannel for RecordingHost {
        fn is_attached(&self) -> bool {
            !self.detached.load(Ordering::Relaxed)
        }

        fn post(&self, message: &FunctionCallMessage, target: &TargetOrigin) -> Result<(), BridgeError> {
            if self.reject.load(Ordering::Relaxed) {
                return Err(BridgeError::NoMatchingHost(target.to_string()));
            }
            self.posted.lock().push((message.clone(), target.clone()));
            Ok(())
        }
    }

    fn embedded(host_origin: Option<&str>) -> (Arc<RecordingHost>, CallBridge) {
        let host = Arc::new(RecordingHost::default());
        let bridge = CallBridge::new(
            host.clone(),
            BridgeOptions {
                host_origin: host_origin.map(str::to_string),
                ..Default::default()
            },
        );
        (host, bridge)
    }

    fn recorder() -> (Arc<Mutex<Vec<CallResult>>>, impl CallCallback + 'static) {
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = results.clone();
        (results, move |result: CallResult| sink.lock().push(result))
    }

    fn reply(id: impl ToString, result: Value) -> Value {
        serde_json::to_value(FunctionResponseMessage::success(id.to_string(), result)).unwrap()
    }

    #[test]
    fn test_top_level_fails_synchronously() {
        let bridge = CallBridge::new(Arc::new(TopLevel), BridgeOptions::default());
        let (results, callback) = recorder();

        bridge.initiate_call("getUser", json!({"id": 42}), callback);

        let results = results.lock();
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0],
            CallResult::Error(json!("Cannot communicate with the hosting context."))
        );
        assert_eq!(bridge.pending_count(), 0);
        assert_eq!(bridge.stats().failed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_call_message_posted_to_expected_origin() {
        let (host, bridge) = embedded(Some(HOST));
        let (_results, callback) = recorder();

        bridge.initiate_call("getUser", json!({"id": 42}), callback);

        let posted = host.posted.lock();
        assert_eq!(posted.len(), 1);
        let (message, target) = &posted[0];
        assert_eq!(message.msg_type, "copilot_function_call");
        assert_eq!(message.call.name, "getUser");
        assert_eq!(message.call.args, json!({"id": 42}));
        assert_eq!(target, &TargetOrigin::Exact(HOST.to_string()));
        assert!(bridge.is_pending(&message.call.id));
    }

    #[test]
    fn test_unknown_origin_posts_to_wildcard() {
        let (host, bridge) = embedded(None);
        let (results, callback) = recorder();

        bridge.initiate_call("getUser", Value::Null, callback);

        assert_eq!(host.posted.lock()[0].1, TargetOrigin::Any);
        assert!(results.lock().is_empty());
        assert_eq!(bridge.pending_count(), 1);
    }

    #[test]
    fn test_strict_origin_refuses_wildcard() {
        let host = Arc::new(RecordingHost::default());
        let bridge = CallBridge::new(
            host.clone(),
            BridgeOptions {
                strict_origin: true,
                ..Default::default()
            },
        );
        let (results, callback) = recorder();

        bridge.initiate_call("getUser", Value::Null, callback);

        assert!(host.posted.lock().is_empty());
        assert_eq!(results.lock().len(), 1);
        assert!(results.lock()[0].is_error());
        assert_eq!(bridge.pending_count(), 0);
    }

    #[test]
    fn test_scenario_get_user_resolves_once() {
        let (host, bridge) = embedded(Some(HOST));
        let (results, callback) = recorder();

        bridge.initiate_call("getUser", json!({"id": 42}), callback);
        let id = host.last_id();

        let outcome = bridge.handle_reply(reply(id, json!({"name": "Ana"})), HOST);
        assert_eq!(outcome, ReplyOutcome::Resolved(id));
        assert_eq!(*results.lock(), vec![CallResult::Result(json!({"name": "Ana"}))]);
        assert!(!bridge.is_pending(&id));

        // A duplicate reply is stale and changes nothing.
        let outcome = bridge.handle_reply(reply(id, json!({"name": "Bob"})), HOST);
        assert_eq!(outcome, ReplyOutcome::Unmatched(id.to_string()));
        assert_eq!(results.lock().len(), 1);
    }

    #[test]
    fn test_scenario_origin_mismatch_never_calls_back() {
        let (host, bridge) = embedded(Some(HOST));
        let (results, callback) = recorder();

        bridge.initiate_call("getUser", json!({"id": 42}), callback);
        let id = host.last_id();

        let outcome = bridge.handle_reply(reply(id, json!({"name": "Ana"})), "https://evil.example");
        assert_eq!(outcome, ReplyOutcome::OriginMismatch);
        assert!(results.lock().is_empty());
        assert!(bridge.is_pending(&id));
    }

    #[test]
    fn test_any_origin_accepted_when_unconfigured() {
        let (host, bridge) = embedded(None);
        let (results, callback) = recorder();

        bridge.initiate_call("ping", Value::Null, callback);
        let id = host.last_id();

        let outcome = bridge.handle_reply(reply(id, json!("pong")), "https://whoever.example");
        assert_eq!(outcome, ReplyOutcome::Resolved(id));
        assert_eq!(*results.lock(), vec![CallResult::Result(json!("pong"))]);
    }

    #[test]
    fn test_error_and_empty_replies() {
        let (host, bridge) = embedded(Some(HOST));

        let (errors, callback) = recorder();
        bridge.initiate_call("deleteRecord", json!({"id": 1}), callback);
        let error_id = host.last_id();

        let (empties, callback) = recorder();
        bridge.initiate_call("refresh", Value::Null, callback);
        let empty_id = host.last_id();

        let error_reply = json!({
            "type": FUNCTION_RESPONSE,
            "callId": error_id.to_string(),
            "error": "permission denied"
        });
        let empty_reply = json!({"type": FUNCTION_RESPONSE, "callId": empty_id.to_string()});

        bridge.handle_reply(error_reply, HOST);
        bridge.handle_reply(empty_reply, HOST);

        assert_eq!(*errors.lock(), vec![CallResult::Error(json!("permission denied"))]);
        assert_eq!(*empties.lock(), vec![CallResult::Result(Value::Null)]);
        assert_eq!(bridge.pending_count(), 0);
    }

    #[test]
    fn test_replies_in_reverse_order() {
        let (host, bridge) = embedded(Some(HOST));

        let (first, callback) = recorder();
        bridge.initiate_call("first", Value::Null, callback);
        let first_id = host.last_id();

        let (second, callback) = recorder();
        bridge.initiate_call("second", Value::Null, callback);
        let second_id = host.last_id();

        assert_ne!(first_id, second_id);

        bridge.handle_reply(reply(second_id, json!(2)), HOST);
        bridge.handle_reply(reply(first_id, json!(1)), HOST);

        assert_eq!(*first.lock(), vec![CallResult::Result(json!(1))]);
        assert_eq!(*second.lock(), vec![CallResult::Result(json!(2))]);
    }

    #[test]
    fn test_unknown_and_non_reply_messages_ignored() {
        let (host, bridge) = embedded(Some(HOST));
        let (results, callback) = recorder();
        bridge.initiate_call("getUser", Value::Null, callback);

        let never_issued = CallId::new();
        assert_eq!(
            bridge.handle_reply(reply(never_issued, json!(1)), HOST),
            ReplyOutcome::Unmatched(never_issued.to_string())
        );
        assert_eq!(
            bridge.handle_reply(reply("not-a-uuid", json!(1)), HOST),
            ReplyOutcome::Unmatched("not-a-uuid".to_string())
        );
        assert_eq!(
            bridge.handle_reply(json!({"type": "lwc_ready_ping"}), HOST),
            ReplyOutcome::NotAReply
        );
        assert_eq!(
            bridge.handle_reply(json!({"type": FUNCTION_RESPONSE}), HOST),
            ReplyOutcome::Malformed
        );

        assert!(results.lock().is_empty());
        assert!(bridge.is_pending(&host.last_id()));
    }

    #[test]
    fn test_reply_id_must_match_issued_spelling() {
        let (host, bridge) = embedded(Some(HOST));
        let (results, callback) = recorder();
        bridge.initiate_call("getUser", Value::Null, callback);
        let id = host.last_id();

        let uppercased = id.to_string().to_uppercase();
        assert_eq!(
            bridge.handle_reply(reply(&uppercased, json!("spoofed")), HOST),
            ReplyOutcome::Unmatched(uppercased)
        );
        let simple = id.to_string().replace('-', "");
        assert_eq!(
            bridge.handle_reply(reply(&simple, json!("spoofed")), HOST),
            ReplyOutcome::Unmatched(simple)
        );
        assert!(results.lock().is_empty());
        assert!(bridge.is_pending(&id));

        assert_eq!(
            bridge.handle_reply(reply(id, json!("ok")), HOST),
            ReplyOutcome::Resolved(id)
        );
        assert_eq!(*results.lock(), vec![CallResult::Result(json!("ok"))]);
    }

    #[test]
    fn test_delivery_failure_fails_call() {
        let (host, bridge) = embedded(Some(HOST));
        host.reject.store(true, Ordering::Relaxed);
        let (results, callback) = recorder();

        bridge.initiate_call("getUser", Value::Null, callback);

        assert_eq!(
            *results.lock(),
            vec![CallResult::Error(json!(
                "No attached host matches target origin https://host.example"
            ))]
        );
        assert_eq!(bridge.pending_count(), 0);
    }

    #[test]
    fn test_detached_host_fails_call() {
        let (host, bridge) = embedded(Some(HOST));
        host.detached.store(true, Ordering::Relaxed);
        let (results, callback) = recorder();

        bridge.initiate_call("getUser", Value::Null, callback);

        assert!(host.posted.lock().is_empty());
        assert_eq!(results.lock().len(), 1);
        assert_eq!(bridge.pending_count(), 0);
    }

    #[test]
    fn test_empty_name_rejected() {
        let (host, bridge) = embedded(Some(HOST));
        let (results, callback) = recorder();

        bridge.initiate_call("", Value::Null, callback);

        assert!(host.posted.lock().is_empty());
        assert_eq!(
            *results.lock(),
            vec![CallResult::Error(json!("Remote function name must not be empty"))]
        );
        assert_eq!(bridge.stats().registered.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_callback_may_start_another_call() {
        let (host, bridge) = embedded(Some(HOST));
        let (results, callback) = recorder();
        let chained = bridge.clone();

        bridge.initiate_call("first", Value::Null, move |_: CallResult| {
            chained.initiate_call("second", Value::Null, callback);
        });
        bridge.handle_reply(reply(host.last_id(), json!(1)), HOST);

        let second_id = host.last_id();
        assert!(bridge.is_pending(&second_id));
        bridge.handle_reply(reply(second_id, json!(2)), HOST);
        assert_eq!(*results.lock(), vec![CallResult::Result(json!(2))]);
    }

    #[test]
    fn test_teardown_discards_without_callbacks() {
        let (_host, bridge) = embedded(Some(HOST));
        let (results, callback) = recorder();
        bridge.initiate_call("a", Value::Null, callback);
        let (more, callback) = recorder();
        bridge.initiate_call("b", Value::Null, callback);

        assert_eq!(bridge.teardown(), 2);
        assert_eq!(bridge.pending_count(), 0);
        assert!(results.lock().is_empty());
        assert!(more.lock().is_empty());
        assert_eq!(bridge.stats().abandoned.load(Ordering::Relaxed), 2);

        let (late, callback) = recorder();
        bridge.initiate_call("c", Value::Null, callback);
        assert_eq!(*late.lock(), vec![CallResult::Error(json!("Bridge has been torn down"))]);
    }

    #[test]
    fn test_concurrent_teardown_leaves_nothing_pending() {
        for _ in 0..50 {
            let (_host, bridge) = embedded(Some(HOST));
            let barrier = Arc::new(std::sync::Barrier::new(3));

            let callers: Vec<_> = (0..2)
                .map(|_| {
                    let bridge = bridge.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        for _ in 0..100 {
                            bridge.initiate_call("getUser", Value::Null, |_: CallResult| {});
                        }
                    })
                })
                .collect();

            barrier.wait();
            bridge.teardown();
            for caller in callers {
                caller.join().unwrap();
            }

            assert_eq!(bridge.pending_count(), 0);
            let stats = bridge.stats();
            assert_eq!(
                stats.registered.load(Ordering::Relaxed),
                stats.abandoned.load(Ordering::Relaxed)
            );
        }
    }

    #[test]
    fn test_expired_calls_fail_once() {
        let host = Arc::new(RecordingHost::default());
        let bridge = CallBridge::new(
            host.clone(),
            BridgeOptions {
                host_origin: Some(HOST.to_string()),
                call_timeout: Some(Duration::from_millis(10)),
                ..Default::default()
            },
        );
        let (results, callback) = recorder();
        bridge.initiate_call("slow", Value::Null, callback);
        let id = host.last_id();

        assert_eq!(bridge.remove_expired(), 0);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(bridge.remove_expired(), 1);
        assert_eq!(bridge.remove_expired(), 0);

        let results = results.lock();
        assert_eq!(results.len(), 1);
        let CallResult::Error(Value::String(message)) = &results[0] else {
            panic!("expected a timeout error");
        };
        assert!(message.starts_with("Call 'slow' timed out after"));

        // The late reply finds nothing to resolve.
        assert_eq!(
            bridge.handle_reply(reply(id, json!(1)), HOST),
            ReplyOutcome::Unmatched(id.to_string())
        );
    }

    #[test]
    fn test_no_timeout_never_expires() {
        let (_host, bridge) = embedded(Some(HOST));
        let (_results, callback) = recorder();
        bridge.initiate_call("slow", Value::Null, callback);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(bridge.remove_expired(), 0);
        assert_eq!(bridge.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_call_future_resolves() {
        let (host, bridge) = embedded(Some(HOST));
        let waiter = bridge.clone();
        let task = tokio::spawn(async move { waiter.call("getUser", json!({"id": 42})).await });

        while host.posted.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        bridge.handle_reply(reply(host.last_id(), json!({"name": "Ana"})), HOST);

        let result = task.await.unwrap().unwrap();
        assert_eq!(result, CallResult::Result(json!({"name": "Ana"})));
    }

    #[tokio::test]
    async fn test_call_future_abandoned_on_teardown() {
        let (host, bridge) = embedded(Some(HOST));
        let waiter = bridge.clone();
        let task = tokio::spawn(async move { waiter.call("getUser", Value::Null).await });

        while host.posted.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        bridge.teardown();

        assert!(matches!(task.await.unwrap(), Err(BridgeError::Abandoned)));
    }

    #[test]
    fn test_call_blocking_resolves() {
        let (host, bridge) = embedded(Some(HOST));
        let waiter = bridge.clone();
        let handle = std::thread::spawn(move || waiter.call_blocking("getUser", Value::Null));

        while host.posted.lock().is_empty() {
            std::thread::yield_now();
        }
        bridge.handle_reply(reply(host.last_id(), json!(true)), HOST);

        assert_eq!(handle.join().unwrap().unwrap(), CallResult::Result(json!(true)));
    }

    #[test]
    fn test_call_blocking_on_top_level() {
        let bridge = CallBridge::new(Arc::new(TopLevel), BridgeOptions::default());
        let result = bridge.call_blocking("getUser", Value::Null).unwrap();
        assert!(result.is_error());
    }
}
