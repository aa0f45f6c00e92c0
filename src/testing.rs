//! In-memory fakes for the store, credential source and relays

use crate::actuator::Actuator;
use crate::auth::{AuthError, AuthStage, AuthToken, AuthTokenManager, TokenSource};
use crate::command::{CommandProcessor, LocalState};
use crate::config::UnknownChannelPolicy;
use crate::store::{EventStream, RemoteStore, TimestampMode, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use gharswitch_shared::{Channel, StorePaths};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// A request seen by [`FakeStore`]
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Get(String),
    Put(String, Value),
    Patch(String, Value),
    Delete(String),
    Subscribe(String),
}

/// Scripted outcome of one `subscribe` call
pub enum Subscription {
    /// Answer 401
    Unauthorized,
    /// Fail before opening
    Fail(TransportError),
    /// Deliver the chunks, then end the body
    Lines(Vec<&'static str>),
    /// Deliver the chunks, then stay silent forever
    Hold(Vec<&'static str>),
    /// Deliver owned chunks, then stay silent forever
    HoldBytes(Vec<Bytes>),
}

#[derive(Default)]
pub struct FakeStore {
    calls: Mutex<Vec<StoreCall>>,
    nodes: Mutex<HashMap<String, Value>>,
    gets: Mutex<VecDeque<Result<Value, TransportError>>>,
    subscriptions: Mutex<VecDeque<Subscription>>,
    subscribe_times: Mutex<Vec<Instant>>,
    patch_error: Mutex<Option<TransportError>>,
    put_error: Mutex<Option<TransportError>>,
    delete_error: Mutex<Option<TransportError>>,
    hanging_puts: AtomicUsize,
    local_timestamps: AtomicBool,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::Delete(path) => Some(path),
                _ => None,
            })
            .collect()
    }

    pub fn puts(&self) -> Vec<(String, Value)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::Put(path, body) => Some((path, body)),
                _ => None,
            })
            .collect()
    }

    /// Value returned by `get` once the scripted results are used up
    pub fn set_node(&self, path: &str, value: Value) {
        self.nodes.lock().unwrap().insert(path.to_string(), value);
    }

    /// Queue the result of the next `get`
    pub fn script_get(&self, result: Result<Value, TransportError>) {
        self.gets.lock().unwrap().push_back(result);
    }

    /// Queue the outcome of the next `subscribe`; unscripted calls hold silently
    pub fn script_subscribe(&self, subscription: Subscription) {
        self.subscriptions.lock().unwrap().push_back(subscription);
    }

    pub fn subscribe_times(&self) -> Vec<Instant> {
        self.subscribe_times.lock().unwrap().clone()
    }

    pub fn fail_patches(&self, error: TransportError) {
        *self.patch_error.lock().unwrap() = Some(error);
    }

    pub fn fail_puts(&self, error: TransportError) {
        *self.put_error.lock().unwrap() = Some(error);
    }

    pub fn fail_deletes(&self, error: TransportError) {
        *self.delete_error.lock().unwrap() = Some(error);
    }

    /// The next `count` puts are recorded and then never complete
    pub fn hang_puts(&self, count: usize) {
        self.hanging_puts.store(count, Ordering::SeqCst);
    }

    pub fn use_local_timestamps(&self) {
        self.local_timestamps.store(true, Ordering::SeqCst);
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().unwrap().push(call);
    }
}

fn body_stream(
    chunks: Vec<&'static str>,
) -> impl futures::Stream<Item = Result<Bytes, TransportError>> {
    stream::iter(
        chunks
            .into_iter()
            .map(|chunk| Ok(Bytes::from_static(chunk.as_bytes()))),
    )
}

#[async_trait]
impl RemoteStore for FakeStore {
    async fn get(&self, path: &str, _token: &str) -> Result<Value, TransportError> {
        self.record(StoreCall::Get(path.to_string()));
        if let Some(result) = self.gets.lock().unwrap().pop_front() {
            return result;
        }
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn put(&self, path: &str, body: &Value, _token: &str) -> Result<(), TransportError> {
        self.record(StoreCall::Put(path.to_string(), body.clone()));
        let hang = self
            .hanging_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hang {
            std::future::pending::<()>().await;
        }
        match self.put_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn patch(&self, path: &str, body: &Value, _token: &str) -> Result<(), TransportError> {
        self.record(StoreCall::Patch(path.to_string(), body.clone()));
        match self.patch_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn delete(&self, path: &str, _token: &str) -> Result<(), TransportError> {
        self.record(StoreCall::Delete(path.to_string()));
        match self.delete_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn subscribe(&self, path: &str, _token: &str) -> Result<EventStream, TransportError> {
        self.record(StoreCall::Subscribe(path.to_string()));
        self.subscribe_times.lock().unwrap().push(Instant::now());

        let next = self.subscriptions.lock().unwrap().pop_front();
        match next.unwrap_or(Subscription::Hold(Vec::new())) {
            Subscription::Unauthorized => Err(TransportError::Unauthorized),
            Subscription::Fail(error) => Err(error),
            Subscription::Lines(chunks) => Ok(Box::pin(body_stream(chunks))),
            Subscription::Hold(chunks) => {
                Ok(Box::pin(body_stream(chunks).chain(stream::pending())))
            }
            Subscription::HoldBytes(chunks) => Ok(Box::pin(
                stream::iter(chunks.into_iter().map(Ok::<Bytes, TransportError>))
                    .chain(stream::pending()),
            )),
        }
    }

    fn timestamp_mode(&self) -> TimestampMode {
        if self.local_timestamps.load(Ordering::SeqCst) {
            TimestampMode::Local
        } else {
            TimestampMode::Server
        }
    }
}

/// Mints `token-1`, `token-2`, ...
#[derive(Default)]
pub struct FakeTokenSource {
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl FakeTokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mint attempts, failed ones included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl TokenSource for FakeTokenSource {
    async fn obtain_token(&self) -> Result<AuthToken, AuthError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuthError::Rejected {
                stage: AuthStage::CustomToken,
                status: 403,
                body: "device disabled".into(),
            });
        }
        Ok(AuthToken {
            value: format!("token-{}", n),
            obtained_at: n as u64,
        })
    }
}

/// Remembers every relay drive
#[derive(Debug, Clone, Default)]
pub struct RecordingActuator {
    calls: Arc<Mutex<Vec<(Channel, bool)>>>,
}

impl RecordingActuator {
    pub fn calls(&self) -> Vec<(Channel, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Actuator for RecordingActuator {
    fn set_output(&mut self, channel: &Channel, on: bool) {
        self.calls.lock().unwrap().push((channel.clone(), on));
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Everything a command source test needs, wired to tenant `t`, device `d`
pub struct Fixture {
    pub paths: StorePaths,
    pub store: Arc<FakeStore>,
    pub tokens: Arc<FakeTokenSource>,
    pub auth: Arc<AuthTokenManager>,
    pub relays: RecordingActuator,
    pub processor: CommandProcessor,
}

pub fn fixture(policy: UnknownChannelPolicy) -> Fixture {
    let paths = StorePaths::new("t", "d");
    let store = FakeStore::new();
    let tokens = Arc::new(FakeTokenSource::new());
    let auth = Arc::new(AuthTokenManager::new(tokens.clone()));
    let relays = RecordingActuator::default();
    let state = LocalState::new(["s1", "s2", "s3", "s4"].map(Channel::from));

    let processor = CommandProcessor::new(
        paths.clone(),
        store.clone(),
        auth.clone(),
        Box::new(relays.clone()),
        state,
        policy,
    );

    Fixture {
        paths,
        store,
        tokens,
        auth,
        relays,
        processor,
    }
}

pub fn processor_with(
    policy: UnknownChannelPolicy,
) -> (CommandProcessor, Arc<FakeStore>, RecordingActuator) {
    let fixture = fixture(policy);
    (fixture.processor, fixture.store, fixture.relays)
}
