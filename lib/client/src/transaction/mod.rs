//! The transaction state machine and its keep-alive ping.
//!
//! A transaction lives on the server as a resource created under `<repository>/transactions`.
//! The server aborts it after a timeout, so while it is open the client pings it periodically.
//! Every real operation on the transaction pushes the next ping back.

mod scheduler;

use crate::http::{HttpRequest, Method, RequestBody, StatusCode, Url};
use crate::session::executor::{NotFoundPolicy, RequestExecutor};
use parking_lot::Mutex;
use rdf_fusion_protocol::protocol::{
    transactions_location, Action, ACTION_PARAM_NAME, FORM_MIME_TYPE, TRANSACTION_SETTINGS_PREFIX,
};
use rdf_fusion_protocol::ProtocolError;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use scheduler::{PingScheduler, SchedulerHandle};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// The local view of the remote transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransactionStatus {
    /// No transaction is open. Commit and rollback return here.
    #[default]
    None,
    Active,
    Prepared,
}

/// A setting passed to the server when a transaction begins.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionSetting {
    pub name: String,
    pub value: String,
}

impl TransactionSetting {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Isolation levels understood by RDF4J compatible servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    None,
    ReadUncommitted,
    ReadCommitted,
    SnapshotRead,
    Snapshot,
    Serializable,
}

impl IsolationLevel {
    pub const SETTING_NAME: &'static str = "org.eclipse.rdf4j.common.transaction.IsolationLevel";

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::ReadUncommitted => "READ_UNCOMMITTED",
            Self::ReadCommitted => "READ_COMMITTED",
            Self::SnapshotRead => "SNAPSHOT_READ",
            Self::Snapshot => "SNAPSHOT",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

impl From<IsolationLevel> for TransactionSetting {
    fn from(level: IsolationLevel) -> Self {
        Self::new(IsolationLevel::SETTING_NAME, level.as_str())
    }
}

#[derive(Debug)]
struct TransactionState {
    status: TransactionStatus,
    /// Some iff the status is not `None`.
    token: Option<Url>,
    ping_delay: Duration,
}

struct TransactionCore {
    executor: Arc<RequestExecutor>,
    state: Mutex<TransactionState>,
    /// Serializes state transitions without blocking readers of `state`.
    operation: Mutex<()>,
    scheduler: SchedulerHandle,
    initial_ping_delay: Duration,
}

impl TransactionCore {
    /// Runs on the scheduler thread. Failures are logged and the ping is retried after the
    /// current delay.
    fn ping(&self) {
        let Some(token) = self.state.lock().token.clone() else {
            return;
        };
        let outcome = self
            .executor
            .execute_ok(
                HttpRequest::new(Method::POST, with_action(&token, Action::Ping))
                    .with_header("Accept", "text/plain"),
            )
            .and_then(|response| response.text())
            .and_then(|text| {
                text.trim().parse::<u64>().map_err(|e| {
                    ProtocolError::ProtocolViolation(format!(
                        "The ping response {text:?} is not a timeout in milliseconds: {e}"
                    ))
                })
            });

        let mut state = self.state.lock();
        if state.token.as_ref() != Some(&token) {
            // Committed or rolled back in the meantime
            return;
        }
        match outcome {
            Ok(timeout) => {
                state.ping_delay = Duration::from_millis(timeout) / 2;
                debug!(
                    "Transaction {token} times out in {timeout}ms, next ping in {:?}",
                    state.ping_delay
                );
            }
            Err(error) => warn!("Failed to ping transaction {token}: {error}"),
        }
        self.scheduler.schedule(state.ping_delay);
    }

    fn reschedule_ping(&self) {
        let state = self.state.lock();
        if state.token.is_some() {
            self.scheduler.schedule(state.ping_delay);
        }
    }

    fn require_status(
        &self,
        operation: &str,
        allowed: &[TransactionStatus],
    ) -> Result<Url, ProtocolError> {
        let state = self.state.lock();
        match &state.token {
            Some(token) if allowed.contains(&state.status) => Ok(token.clone()),
            _ => Err(ProtocolError::InvalidState(format!(
                "Cannot {operation} a transaction in state {:?}",
                state.status
            ))),
        }
    }

    fn finish(&self) {
        let mut state = self.state.lock();
        state.status = TransactionStatus::None;
        state.token = None;
        state.ping_delay = self.initial_ping_delay;
        self.scheduler.cancel();
    }
}

/// Owns the transaction of a session and its keep-alive ping.
///
/// At most one transaction is open at a time. Violations of the state machine are reported as
/// [`ProtocolError::InvalidState`] before anything is sent.
pub struct TransactionController {
    core: Arc<TransactionCore>,
    scheduler: PingScheduler,
}

impl TransactionController {
    pub(crate) fn new(executor: Arc<RequestExecutor>, initial_ping_delay: Duration) -> Self {
        let handle = SchedulerHandle::default();
        let core = Arc::new(TransactionCore {
            executor,
            state: Mutex::new(TransactionState {
                status: TransactionStatus::None,
                token: None,
                ping_delay: initial_ping_delay,
            }),
            operation: Mutex::new(()),
            scheduler: handle.clone(),
            initial_ping_delay,
        });
        let weak: Weak<TransactionCore> = Arc::downgrade(&core);
        let scheduler = PingScheduler::new(
            handle,
            Box::new(move || {
                let Some(core) = weak.upgrade() else {
                    return false;
                };
                core.ping();
                true
            }),
        );
        Self { core, scheduler }
    }

    /// Opens a transaction on the repository and schedules the first ping.
    pub fn begin(
        &self,
        repository_url: &str,
        settings: &[TransactionSetting],
    ) -> Result<(), ProtocolError> {
        let _operation = self.core.operation.lock();
        let status = self.status();
        if status != TransactionStatus::None {
            return Err(ProtocolError::InvalidState(format!(
                "Cannot begin a transaction while another one is {status:?}"
            )));
        }
        self.scheduler.ensure_started()?;

        let url = parse_url(&transactions_location(repository_url))?;
        let mut form = url::form_urlencoded::Serializer::new(String::new());
        for setting in settings {
            form.append_pair(
                &format!("{TRANSACTION_SETTINGS_PREFIX}{}", setting.name),
                &setting.value,
            );
        }
        let request = HttpRequest::new(Method::POST, url.clone())
            .with_header(CONTENT_TYPE.as_str(), FORM_MIME_TYPE)
            .with_body(RequestBody::Bytes(form.finish().into_bytes()));
        let response = self.core.executor.execute(request, NotFoundPolicy::Fail)?;

        if response.status() != StatusCode::CREATED {
            return Err(ProtocolError::ProtocolViolation(format!(
                "Expected status 201 when creating a transaction but the server answered with {}",
                response.status()
            )));
        }
        let location = response.header(LOCATION.as_str()).ok_or_else(|| {
            ProtocolError::ProtocolViolation(
                "The server did not send the location of the new transaction".to_owned(),
            )
        })?;
        let token = url.join(location).map_err(|e| {
            ProtocolError::ProtocolViolation(format!("Invalid transaction location {location}: {e}"))
        })?;
        drop(response);

        let mut state = self.core.state.lock();
        if self.core.scheduler.is_shut_down() {
            warn!("The session was closed while beginning a transaction, abandoning {token}");
            return Err(ProtocolError::Closed);
        }
        debug!("Began transaction {token}");
        state.status = TransactionStatus::Active;
        state.token = Some(token);
        state.ping_delay = self.core.initial_ping_delay;
        self.core.scheduler.schedule(state.ping_delay);
        Ok(())
    }

    /// Asks the server to prepare the commit.
    pub fn prepare(&self) -> Result<(), ProtocolError> {
        let _operation = self.core.operation.lock();
        let token = self
            .core
            .require_status("prepare", &[TransactionStatus::Active])?;
        self.execute_action(&token, Action::Prepare)?;
        self.core.state.lock().status = TransactionStatus::Prepared;
        Ok(())
    }

    /// Commits the transaction.
    ///
    /// A failed commit leaves the local state untouched. The caller decides whether to retry or
    /// to roll back.
    pub fn commit(&self) -> Result<(), ProtocolError> {
        let _operation = self.core.operation.lock();
        let token = self.core.require_status(
            "commit",
            &[TransactionStatus::Active, TransactionStatus::Prepared],
        )?;
        self.execute_action(&token, Action::Commit)?;
        self.core.finish();
        debug!("Committed transaction {token}");
        Ok(())
    }

    /// Rolls the transaction back.
    pub fn rollback(&self) -> Result<(), ProtocolError> {
        let _operation = self.core.operation.lock();
        let token = self.core.require_status(
            "roll back",
            &[TransactionStatus::Active, TransactionStatus::Prepared],
        )?;
        let response = self
            .core
            .executor
            .execute(HttpRequest::new(Method::DELETE, token.clone()), NotFoundPolicy::Fail)?;
        if response.status() != StatusCode::NO_CONTENT {
            return Err(ProtocolError::ProtocolViolation(format!(
                "Expected status 204 when rolling back but the server answered with {}",
                response.status()
            )));
        }
        self.core.finish();
        debug!("Rolled back transaction {token}");
        Ok(())
    }

    fn execute_action(&self, token: &Url, action: Action) -> Result<(), ProtocolError> {
        let response = self.core.executor.execute(
            HttpRequest::new(Method::PUT, with_action(token, action)),
            NotFoundPolicy::Fail,
        )?;
        if response.status() != StatusCode::OK {
            return Err(ProtocolError::ProtocolViolation(format!(
                "Expected status 200 for {action} but the server answered with {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Pushes the next ping back by the current ping delay.
    pub fn reschedule_ping(&self) {
        self.core.reschedule_ping();
    }

    /// The URL of the open transaction.
    pub fn active_token(&self) -> Option<Url> {
        self.core.state.lock().token.clone()
    }

    pub fn status(&self) -> TransactionStatus {
        self.core.state.lock().status
    }

    pub fn is_active(&self) -> bool {
        self.status() != TransactionStatus::None
    }

    /// The delay between pings, as last reported by the server.
    pub fn ping_delay(&self) -> Duration {
        self.core.state.lock().ping_delay
    }

    /// When the next ping is due, if one is scheduled.
    pub fn next_ping_deadline(&self) -> Option<Instant> {
        self.scheduler.handle().next_deadline()
    }

    /// Forgets the open transaction and stops the ping thread.
    ///
    /// Does not contact the server and does not wait for an in-flight ping.
    pub fn close(&self) {
        self.scheduler.shutdown();
        let mut state = self.core.state.lock();
        if let Some(token) = state.token.take() {
            warn!("Abandoning open transaction {token}");
        }
        state.status = TransactionStatus::None;
    }
}

impl fmt::Debug for TransactionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.core.state.lock();
        f.debug_struct("TransactionController")
            .field("status", &state.status)
            .field("token", &state.token.as_ref().map(Url::as_str))
            .field("ping_delay", &state.ping_delay)
            .finish()
    }
}

impl Drop for TransactionController {
    fn drop(&mut self) {
        self.scheduler.shutdown();
    }
}

/// Appends the `action` parameter to a transaction URL.
pub(crate) fn with_action(token: &Url, action: Action) -> Url {
    let mut url = token.clone();
    url.query_pairs_mut()
        .append_pair(ACTION_PARAM_NAME, action.as_str());
    url
}

pub(crate) fn parse_url(url: &str) -> Result<Url, ProtocolError> {
    Url::parse(url).map_err(|e| ProtocolError::InvalidRequest(format!("Invalid URL {url}: {e}")))
}
