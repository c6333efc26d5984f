//! Client core for the revision workbench: a typed accessor over the
//! backend's REST surface, a realtime channel that keeps local state in
//! sync, and the workflow glue between them.
//!
//! The realtime channel is an invalidation signal for notifications and
//! the wallet (any message ⇒ re-run the corresponding fetch); only chat
//! payloads are applied directly. Refetches and writes for the same
//! company request are serialized through a per-entity lock so a stale
//! push-triggered refetch can never clobber a just-applied transition.

use std::{collections::HashMap, sync::Arc};

use reqwest::{multipart, Response, StatusCode};
use serde_json::Value;
use shared::{
    domain::{ChatBoxId, CompanyRequestId, NotificationId, NotificationKind, RequestId, Role},
    error::ApiError,
    protocol::{
        chat_topic, notification_topic, wallet_topic, ChatMessage, LoginRequest, LoginResponse,
        NewRevisionRequest, Notification, RevisionRequest, WalletBalance,
    },
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};
use workflow::{GuardContext, RevisionAction};

pub mod channel;
pub mod error;
pub mod store;

pub use channel::{ChannelSignal, RealtimeChannel, TopicSubscription};
pub use error::ClientError;
pub use store::{InMemorySessionStore, PersistedSession, SessionStore, Store};

const EVENT_BUFFER: usize = 1024;
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Everything the client emits to its consumers. UI layers subscribe and
/// re-render; they never poll internal state.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    RevisionsRefreshed {
        company_request_id: CompanyRequestId,
        revisions: Vec<RevisionRequest>,
    },
    ChatMessageReceived {
        message: ChatMessage,
    },
    NotificationsRefreshed {
        notifications: Vec<Notification>,
    },
    WalletRefreshed {
        balance: i64,
    },
    ChannelLost,
    SessionExpired,
    Error(String),
}

/// One attachment accompanying a new revision request.
#[derive(Debug, Clone)]
pub struct RevisionUpload {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
struct ActiveSession {
    token: String,
    user_id: shared::domain::UserId,
    email: String,
    role: Role,
}

impl ActiveSession {
    fn from_persisted(persisted: &PersistedSession) -> Self {
        Self {
            token: persisted.token.clone(),
            user_id: persisted.user_id.clone(),
            email: persisted.email.clone(),
            role: persisted.role,
        }
    }
}

struct WorkbenchState {
    base_url: Option<String>,
    session: Option<ActiveSession>,
    chat_messages: HashMap<ChatBoxId, Vec<ChatMessage>>,
    /// Contents of our own messages posted but not yet echoed back by the
    /// broker, keyed by chat box. Used to swallow the echo instead of
    /// appending the message twice.
    pending_chat_echoes: HashMap<ChatBoxId, Vec<String>>,
    watch_tasks: Vec<JoinHandle<()>>,
}

pub struct WorkbenchClient {
    http: reqwest::Client,
    session_store: Arc<dyn SessionStore>,
    store: Store,
    inner: Mutex<WorkbenchState>,
    /// One lock per company request: refetch and write never interleave
    /// for the same entity.
    entity_locks: Mutex<HashMap<CompanyRequestId, Arc<Mutex<()>>>>,
    channel: Mutex<Option<Arc<RealtimeChannel>>>,
    events: broadcast::Sender<ClientEvent>,
}

impl WorkbenchClient {
    pub fn new(session_store: Arc<dyn SessionStore>) -> Result<Arc<Self>, ClientError> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Arc::new(Self {
            http,
            session_store,
            store: Store::new(),
            inner: Mutex::new(WorkbenchState {
                base_url: None,
                session: None,
                chat_messages: HashMap::new(),
                pending_chat_echoes: HashMap::new(),
                watch_tasks: Vec::new(),
            }),
            entity_locks: Mutex::new(HashMap::new()),
            channel: Mutex::new(None),
            events,
        }))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Shared wallet/notification store; read-only for consumers.
    pub fn store(&self) -> &Store {
        &self.store
    }

    // ---- session -------------------------------------------------------

    pub async fn sign_in(
        &self,
        base_url: &str,
        email: &str,
        password: &str,
    ) -> Result<(), ClientError> {
        let response = self
            .http
            .post(format!("{base_url}/v1/auth/login"))
            .json(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        let response = self.check_response(response).await?;
        let body: LoginResponse = response.json().await?;

        let persisted = PersistedSession {
            token: body.token,
            user_id: body.user_id,
            email: body.email,
            role: body.role,
        };
        self.session_store.save(&persisted);

        let mut inner = self.inner.lock().await;
        inner.base_url = Some(base_url.trim_end_matches('/').to_string());
        inner.session = Some(ActiveSession::from_persisted(&persisted));
        inner.chat_messages.clear();
        inner.pending_chat_echoes.clear();
        Ok(())
    }

    /// Resumes from a previously persisted session without a login round
    /// trip. The first 401 will invalidate it the usual way.
    pub async fn restore_session(&self, base_url: &str) -> Result<(), ClientError> {
        let persisted = self.session_store.load().ok_or(ClientError::NotSignedIn)?;
        let mut inner = self.inner.lock().await;
        inner.base_url = Some(base_url.trim_end_matches('/').to_string());
        inner.session = Some(ActiveSession::from_persisted(&persisted));
        Ok(())
    }

    pub async fn sign_out(&self) {
        self.session_store.clear();
        let mut inner = self.inner.lock().await;
        inner.session = None;
        inner.chat_messages.clear();
        inner.pending_chat_echoes.clear();
        for task in inner.watch_tasks.drain(..) {
            task.abort();
        }
        drop(inner);

        let channel = self.channel.lock().await.take();
        if let Some(channel) = channel {
            channel.close().await;
        }
    }

    pub async fn current_role(&self) -> Result<Role, ClientError> {
        Ok(self.session().await?.1.role)
    }

    async fn session(&self) -> Result<(String, ActiveSession), ClientError> {
        let inner = self.inner.lock().await;
        let base_url = inner.base_url.clone().ok_or(ClientError::NotSignedIn)?;
        let session = inner.session.clone().ok_or(ClientError::NotSignedIn)?;
        Ok((base_url, session))
    }

    /// Maps non-2xx responses to the error taxonomy. A 401 additionally
    /// drops the session, the client-side analogue of the original's
    /// redirect to the login page.
    async fn check_response(&self, response: Response) -> Result<Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            self.expire_session().await;
            return Err(ClientError::Unauthorized);
        }
        // Surface the backend's message verbatim when it sends one.
        let message = match response.json::<ApiError>().await {
            Ok(api_error) => api_error.message,
            Err(_) => status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string(),
        };
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn expire_session(&self) {
        self.session_store.clear();
        self.inner.lock().await.session = None;
        let _ = self.events.send(ClientEvent::SessionExpired);
    }

    fn bearer(
        &self,
        request: reqwest::RequestBuilder,
        session: &ActiveSession,
    ) -> reqwest::RequestBuilder {
        request.bearer_auth(&session.token)
    }

    async fn entity_lock(&self, company_request_id: &CompanyRequestId) -> Arc<Mutex<()>> {
        let mut locks = self.entity_locks.lock().await;
        locks
            .entry(company_request_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ---- revision requests ---------------------------------------------

    /// Fetches the revision list for a company request and broadcasts it.
    /// Runs under the entity lock so it cannot interleave with a write.
    pub async fn refresh_revisions(
        &self,
        company_request_id: &CompanyRequestId,
    ) -> Result<Vec<RevisionRequest>, ClientError> {
        let lock = self.entity_lock(company_request_id).await;
        let _guard = lock.lock().await;
        self.fetch_revisions(company_request_id).await
    }

    async fn fetch_revisions(
        &self,
        company_request_id: &CompanyRequestId,
    ) -> Result<Vec<RevisionRequest>, ClientError> {
        let (base_url, session) = self.session().await?;
        let response = self
            .bearer(
                self.http.get(format!(
                    "{base_url}/v1/request-revisions/company-request/{company_request_id}"
                )),
                &session,
            )
            .send()
            .await?;
        let response = self.check_response(response).await?;
        let revisions: Vec<RevisionRequest> = response.json().await?;

        for revision in &revisions {
            if !revision.is_consistent() {
                warn!(
                    request_id = %revision.id,
                    status = ?revision.status,
                    "revision record violates its status invariants"
                );
            }
        }

        let _ = self.events.send(ClientEvent::RevisionsRefreshed {
            company_request_id: company_request_id.clone(),
            revisions: revisions.clone(),
        });
        Ok(revisions)
    }

    /// Creates a new revision request; attachments travel as multipart
    /// parts alongside the JSON metadata.
    pub async fn create_revision(
        &self,
        new_request: NewRevisionRequest,
        files: Vec<RevisionUpload>,
    ) -> Result<RevisionRequest, ClientError> {
        let (base_url, session) = self.session().await?;

        let mut form =
            multipart::Form::new().text("request", serde_json::to_string(&new_request)?);
        for upload in files {
            let mut part =
                multipart::Part::bytes(upload.bytes).file_name(upload.file_name.clone());
            if let Some(mime) = &upload.mime_type {
                part = part
                    .mime_str(mime)
                    .map_err(|_| ClientError::InvalidUpload(format!("bad mime type: {mime}")))?;
            }
            form = form.part("files", part);
        }

        let response = self
            .bearer(
                self.http.post(format!("{base_url}/v1/request-revisions")),
                &session,
            )
            .multipart(form)
            .send()
            .await?;
        let response = self.check_response(response).await?;
        let created: RevisionRequest = response.json().await?;

        self.refresh_revisions(&new_request.company_request_id)
            .await?;
        Ok(created)
    }

    /// Validates `action` against the workflow table and guards, and only
    /// then issues the one-shot transition call. Guard failures return a
    /// typed error with zero network traffic; the backend remains the
    /// authority and re-validates everything.
    pub async fn apply_action(
        &self,
        request: &RevisionRequest,
        action: RevisionAction,
    ) -> Result<Vec<RevisionRequest>, ClientError> {
        let (base_url, session) = self.session().await?;

        let ctx = GuardContext {
            wallet_balance: self.store.balance(),
        };
        let update = workflow::plan_transition(request, session.role, action, ctx)?;

        let lock = self.entity_lock(&request.company_request_id).await;
        let _guard = lock.lock().await;

        let response = self
            .bearer(
                self.http.put(format!(
                    "{base_url}/v1/request-revisions/{}",
                    update.id
                )),
                &session,
            )
            .json(&update)
            .send()
            .await?;
        self.check_response(response).await?;

        info!(request_id = %update.id, status = ?update.status, "revision transition applied");
        self.fetch_revisions(&request.company_request_id).await
    }

    /// Administrative cleanup; never part of the normal workflow.
    pub async fn delete_revision(
        &self,
        request_id: &RequestId,
        company_request_id: &CompanyRequestId,
    ) -> Result<(), ClientError> {
        let (base_url, session) = self.session().await?;
        if session.role != Role::Admin {
            return Err(ClientError::AdminOnly);
        }

        let lock = self.entity_lock(company_request_id).await;
        let _guard = lock.lock().await;

        let response = self
            .bearer(
                self.http
                    .delete(format!("{base_url}/v1/request-revisions/{request_id}")),
                &session,
            )
            .send()
            .await?;
        self.check_response(response).await?;
        self.fetch_revisions(company_request_id).await?;
        Ok(())
    }

    // ---- chat ----------------------------------------------------------

    /// Loads chat history for a request's conversation thread. Messages
    /// keep arrival order; nothing is re-sorted client-side.
    pub async fn open_chat(
        &self,
        chat_box_id: &ChatBoxId,
    ) -> Result<Vec<ChatMessage>, ClientError> {
        let (base_url, session) = self.session().await?;
        let response = self
            .bearer(
                self.http
                    .get(format!("{base_url}/v1/chat-boxes/{chat_box_id}/messages")),
                &session,
            )
            .send()
            .await?;
        let response = self.check_response(response).await?;
        let messages: Vec<ChatMessage> = response.json().await?;

        let mut inner = self.inner.lock().await;
        inner
            .chat_messages
            .insert(chat_box_id.clone(), messages.clone());
        inner.pending_chat_echoes.remove(chat_box_id);
        Ok(messages)
    }

    pub async fn chat_messages(&self, chat_box_id: &ChatBoxId) -> Vec<ChatMessage> {
        self.inner
            .lock()
            .await
            .chat_messages
            .get(chat_box_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Sends a message and appends it locally right away; the broker echo
    /// that follows is matched against the pending entry and swallowed so
    /// the sender never sees the message twice.
    pub async fn send_chat_message(
        &self,
        chat_box_id: &ChatBoxId,
        content: &str,
    ) -> Result<(), ClientError> {
        let (base_url, session) = self.session().await?;
        let message = ChatMessage {
            chat_box_id: chat_box_id.clone(),
            sender_email: session.email.clone(),
            content: content.to_string(),
            timestamp: chrono::Utc::now(),
        };

        // The broker may echo the message back before the POST response
        // arrives; the pending entry and the optimistic append must be in
        // place before the request is in flight.
        {
            let mut inner = self.inner.lock().await;
            inner
                .chat_messages
                .entry(chat_box_id.clone())
                .or_default()
                .push(message.clone());
            inner
                .pending_chat_echoes
                .entry(chat_box_id.clone())
                .or_default()
                .push(content.to_string());
        }

        let sent: Result<(), ClientError> = async {
            let response = self
                .bearer(
                    self.http
                        .post(format!("{base_url}/v1/chat-boxes/{chat_box_id}/messages")),
                    &session,
                )
                .json(&message)
                .send()
                .await?;
            self.check_response(response).await?;
            Ok(())
        }
        .await;

        if let Err(err) = sent {
            let mut inner = self.inner.lock().await;
            if let Some(messages) = inner.chat_messages.get_mut(chat_box_id) {
                if let Some(index) = messages.iter().rposition(|m| m == &message) {
                    messages.remove(index);
                }
            }
            if let Some(pending) = inner.pending_chat_echoes.get_mut(chat_box_id) {
                if let Some(index) = pending.iter().rposition(|c| c == content) {
                    pending.remove(index);
                }
            }
            return Err(err);
        }

        let _ = self.events.send(ClientEvent::ChatMessageReceived { message });
        Ok(())
    }

    /// Applies one inbound chat payload: append, unless it is the echo of
    /// our own just-sent message.
    async fn ingest_chat_payload(&self, payload: Value) -> Result<(), ClientError> {
        let message: ChatMessage = serde_json::from_value(payload)?;

        let mut inner = self.inner.lock().await;
        let own_email = inner.session.as_ref().map(|s| s.email.clone());
        if own_email.as_deref() == Some(message.sender_email.as_str()) {
            if let Some(pending) = inner.pending_chat_echoes.get_mut(&message.chat_box_id) {
                if let Some(index) = pending.iter().position(|c| c == &message.content) {
                    pending.remove(index);
                    return Ok(());
                }
            }
        }

        inner
            .chat_messages
            .entry(message.chat_box_id.clone())
            .or_default()
            .push(message.clone());
        drop(inner);

        let _ = self.events.send(ClientEvent::ChatMessageReceived { message });
        Ok(())
    }

    // ---- notifications -------------------------------------------------

    pub async fn refresh_notifications(&self) -> Result<Vec<Notification>, ClientError> {
        let (base_url, session) = self.session().await?;
        let response = self
            .bearer(
                self.http.get(format!(
                    "{base_url}/v1/web/notifications/user/{}",
                    session.user_id
                )),
                &session,
            )
            .send()
            .await?;
        let response = self.check_response(response).await?;
        let notifications: Vec<Notification> = response.json().await?;

        self.store.set_notifications(notifications.clone());
        let _ = self.events.send(ClientEvent::NotificationsRefreshed {
            notifications: notifications.clone(),
        });
        Ok(notifications)
    }

    /// Idempotent: a notification already known to be read produces no
    /// call and no state change.
    pub async fn mark_notification_read(
        &self,
        notification_id: &NotificationId,
    ) -> Result<(), ClientError> {
        if self.store.notification_is_read(notification_id) == Some(true) {
            return Ok(());
        }

        let (base_url, session) = self.session().await?;
        let response = self
            .bearer(
                self.http.put(format!(
                    "{base_url}/v1/web/notifications/{notification_id}/read"
                )),
                &session,
            )
            .send()
            .await?;
        self.check_response(response).await?;

        self.store.mark_notification_read(notification_id);
        Ok(())
    }

    // ---- wallet --------------------------------------------------------

    /// Re-reads the balance from the server. The client never computes a
    /// balance locally.
    pub async fn refresh_wallet(&self) -> Result<i64, ClientError> {
        let (base_url, session) = self.session().await?;
        let response = self
            .bearer(
                self.http
                    .get(format!("{base_url}/v1/wallets/user/{}", session.user_id)),
                &session,
            )
            .send()
            .await?;
        let response = self.check_response(response).await?;
        let wallet: WalletBalance = response.json().await?;

        self.store.set_balance(wallet.balance);
        let _ = self.events.send(ClientEvent::WalletRefreshed {
            balance: wallet.balance,
        });
        Ok(wallet.balance)
    }

    // ---- realtime wiring -----------------------------------------------

    /// Opens the realtime channel and wires the standing subscriptions:
    /// notification and wallet topics as invalidation signals, nothing
    /// applied from their payloads.
    pub async fn connect_realtime(self: &Arc<Self>, ws_url: &str) -> Result<(), ClientError> {
        let (_, session) = self.session().await?;
        let channel = RealtimeChannel::connect(ws_url).await?;

        let notifications = channel
            .subscribe(&notification_topic(&session.user_id))
            .await?;
        let wallet = channel.subscribe(&wallet_topic(&session.user_id)).await?;
        let mut signals = channel.subscribe_signals();

        let mut tasks = Vec::new();

        let client = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            client.run_notification_watch(notifications).await;
        }));

        let client = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            client.run_wallet_watch(wallet).await;
        }));

        let client = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            while let Ok(signal) = signals.recv().await {
                if signal == ChannelSignal::Lost {
                    let _ = client.events.send(ClientEvent::ChannelLost);
                    break;
                }
            }
        }));

        let mut inner = self.inner.lock().await;
        for task in inner.watch_tasks.drain(..) {
            task.abort();
        }
        inner.watch_tasks = tasks;
        drop(inner);

        // A replaced channel is shut down, not left running its own
        // reconnect loop against a socket nobody reads from.
        let previous = self.channel.lock().await.replace(channel);
        if let Some(previous) = previous {
            previous.close().await;
        }
        Ok(())
    }

    /// Subscribes the chat topic for one request and streams messages in.
    /// Chat is the one topic whose payload is the data itself.
    pub async fn watch_chat(self: &Arc<Self>, chat_box_id: &ChatBoxId) -> Result<(), ClientError> {
        let channel = self
            .channel
            .lock()
            .await
            .clone()
            .ok_or_else(|| ClientError::Channel("realtime channel not connected".into()))?;
        let mut subscription = channel.subscribe(&chat_topic(chat_box_id)).await?;

        let client = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(payload) = subscription.recv().await {
                if let Err(err) = client.ingest_chat_payload(payload).await {
                    let _ = client
                        .events
                        .send(ClientEvent::Error(format!("bad chat payload: {err}")));
                }
            }
        });
        self.inner.lock().await.watch_tasks.push(task);
        Ok(())
    }

    pub async fn stop_watching_chat(&self, chat_box_id: &ChatBoxId) -> Result<(), ClientError> {
        let channel = self.channel.lock().await.clone();
        if let Some(channel) = channel {
            channel.unsubscribe(&chat_topic(chat_box_id)).await?;
        }
        Ok(())
    }

    async fn run_notification_watch(self: Arc<Self>, mut subscription: TopicSubscription) {
        while let Some(payload) = subscription.recv().await {
            if let Err(err) = self.refresh_notifications().await {
                let _ = self
                    .events
                    .send(ClientEvent::Error(format!("notification refresh failed: {err}")));
                continue;
            }
            // A Request notification also means some revision list went
            // stale; its key names the company request to re-fetch.
            if let Ok(notification) = serde_json::from_value::<Notification>(payload) {
                if notification.kind == NotificationKind::Request {
                    let company_request_id = CompanyRequestId::new(notification.key.clone());
                    if let Err(err) = self.refresh_revisions(&company_request_id).await {
                        let _ = self.events.send(ClientEvent::Error(format!(
                            "revision refresh for {company_request_id} failed: {err}"
                        )));
                    }
                }
            }
        }
    }

    async fn run_wallet_watch(self: Arc<Self>, mut subscription: TopicSubscription) {
        while let Some(_payload) = subscription.recv().await {
            if let Err(err) = self.refresh_wallet().await {
                let _ = self
                    .events
                    .send(ClientEvent::Error(format!("wallet refresh failed: {err}")));
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
