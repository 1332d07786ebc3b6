//! Scripted collaborators for unit tests

use crate::client::{ApiRequest, ApiResponse, ExchangeClient, HttpTransport};
use crate::config::{Credentials, ExchangeApi};
use crate::error::{ApiError, Error, Result};
use crate::services::PubSubTransport;
use crate::session::SessionManager;
use crate::types::{ChannelEvent, ConnectionConfig};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Reply {
    Status(u16, Value),
    Network(String),
}

/// Route key: path without leading slash, plus `?k=v&...` when queried
pub(crate) fn route_key(request: &ApiRequest) -> String {
    let path = request.url.path().trim_start_matches('/').to_string();
    if request.query.is_empty() {
        return path;
    }
    let query: Vec<String> = request.query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}?{}", path, query.join("&"))
}

/// `HttpTransport` answering from per-route scripts.
///
/// A route's last reply is sticky; unknown routes answer 404.
#[derive(Default)]
pub(crate) struct MockHttp {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockHttp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the route's script with a single sticky reply
    pub fn reply(&self, route: &str, status: u16, body: Value) {
        self.set(route, Reply::Status(status, body));
    }

    /// Replace the route's script with a sticky network failure
    pub fn fail(&self, route: &str, reason: &str) {
        self.set(route, Reply::Network(reason.to_string()));
    }

    /// Append a reply after whatever the route already answers
    pub fn enqueue(&self, route: &str, status: u16, body: Value) {
        self.routes
            .lock()
            .entry(route.to_string())
            .or_default()
            .push_back(Reply::Status(status, body));
    }

    fn set(&self, route: &str, reply: Reply) {
        self.routes.lock().insert(route.to_string(), VecDeque::from([reply]));
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_to(&self, route: &str) -> Vec<ApiRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| route_key(r) == route)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl HttpTransport for MockHttp {
    async fn execute(&self, request: ApiRequest) -> std::result::Result<ApiResponse, ApiError> {
        let key = route_key(&request);
        self.requests.lock().push(request);

        let reply = {
            let mut routes = self.routes.lock();
            match routes.get_mut(&key) {
                Some(script) if script.len() > 1 => script.pop_front(),
                Some(script) => script.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(Reply::Status(status, body)) => Ok(ApiResponse {
                status,
                body: body.to_string(),
            }),
            Some(Reply::Network(reason)) => Err(ApiError::Network(reason)),
            None => Ok(ApiResponse {
                status: 404,
                body: json!({"message": format!("no route for {}", key)}).to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Event(ChannelEvent),
    Close,
    Fail(String),
}

#[derive(Debug, Default)]
pub(crate) struct PubSubLog {
    pub connects: usize,
    pub disconnects: usize,
    pub subscriptions: Vec<(String, Option<String>)>,
    scripts: VecDeque<Vec<Step>>,
    connect_failures: VecDeque<String>,
    pending: VecDeque<Step>,
}

/// `PubSubTransport` that plays one script per connection, then idles
#[derive(Clone, Default)]
pub(crate) struct ScriptedPubSub {
    log: Arc<Mutex<PubSubLog>>,
}

impl ScriptedPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps delivered on the next connection not yet scripted
    pub fn script(&self, steps: Vec<Step>) {
        self.log.lock().scripts.push_back(steps);
    }

    pub fn fail_next_connect(&self, reason: &str) {
        self.log.lock().connect_failures.push_back(reason.to_string());
    }

    pub fn connects(&self) -> usize {
        self.log.lock().connects
    }

    pub fn disconnects(&self) -> usize {
        self.log.lock().disconnects
    }

    pub fn subscriptions(&self) -> Vec<(String, Option<String>)> {
        self.log.lock().subscriptions.clone()
    }
}

pub(crate) fn event(channel: &str, name: &str, payload: Value) -> Step {
    Step::Event(ChannelEvent {
        channel: channel.to_string(),
        event: name.to_string(),
        data: json!({ "payload": payload }).to_string(),
    })
}

#[async_trait]
impl PubSubTransport for ScriptedPubSub {
    async fn connect(&mut self, _config: &ConnectionConfig) -> Result<String> {
        let mut log = self.log.lock();
        if let Some(reason) = log.connect_failures.pop_front() {
            return Err(Error::Transport(reason));
        }
        log.connects += 1;
        let script = log.scripts.pop_front().unwrap_or_default();
        log.pending = script.into();
        Ok(format!("{}.4242", log.connects))
    }

    async fn subscribe(&mut self, channel: &str, auth: Option<String>) -> Result<()> {
        self.log.lock().subscriptions.push((channel.to_string(), auth));
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<ChannelEvent>> {
        let step = self.log.lock().pending.pop_front();
        match step {
            Some(Step::Event(event)) => Ok(Some(event)),
            Some(Step::Close) => Ok(None),
            Some(Step::Fail(reason)) => Err(Error::Transport(reason)),
            None => std::future::pending().await,
        }
    }

    async fn disconnect(&mut self) {
        self.log.lock().disconnects += 1;
    }
}

/// A session manager already logged in against `http` with token `at`
pub(crate) async fn logged_in(http: &Arc<MockHttp>) -> Arc<SessionManager> {
    http.reply(
        ExchangeApi::LOGIN,
        200,
        json!({"data": {"access_token": "at", "refresh_token": "rt"}}),
    );
    let client = ExchangeClient::new(http.clone(), "https://api.example").expect("base url");
    let credentials = Credentials {
        access_key: "ak".to_string(),
        secret_key: "sk".to_string(),
    };
    let sessions = Arc::new(SessionManager::new(client, credentials));
    sessions.login().await.expect("login");
    sessions
}
