use std::{sync::Arc, time::Duration};

use dome_core::{
    ClientId, ConversationEntry, ConversationLog, Credentials, DeviceIdentity, DomeError,
    EventDispatcher, EventStream, SecurityHeaders, SendReceipt, SessionEvent, SessionState,
    SessionStateMachine, SessionTransition, normalize_support_payload,
};
use dome_transport::{
    ControlChannel, EVENT_PRESENCE, EVENT_SUPPORT_RESPONSE, EventRouter, HeaderSource,
    HttpControlChannel, ReqwestHttpClient, StreamSignal, StreamingChannel,
};
use serde_json::Value;
use tokio::{
    sync::{Mutex, mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;

/// Collects credentials, configuration and handlers for one support session.
///
/// Nothing touches the network until [`SessionBuilder::initialize`].
pub struct SessionBuilder {
    api_id: String,
    api_key: String,
    device_id: String,
    push_token: Option<String>,
    config: SessionConfig,
    dispatcher: EventDispatcher,
}

impl SessionBuilder {
    pub fn new(
        api_id: impl Into<String>,
        api_key: impl Into<String>,
        device_id: impl Into<String>,
        push_token: Option<String>,
    ) -> Self {
        let config = SessionConfig::default();
        Self {
            api_id: api_id.into(),
            api_key: api_key.into(),
            device_id: device_id.into(),
            push_token,
            dispatcher: EventDispatcher::new(config.event_buffer),
            config,
        }
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn on_message(self, handler: impl Fn(&ConversationEntry) + Send + Sync + 'static) -> Self {
        self.dispatcher.on_message(handler);
        self
    }

    pub fn on_log_updated(
        self,
        handler: impl Fn(&[ConversationEntry]) + Send + Sync + 'static,
    ) -> Self {
        self.dispatcher.on_log_updated(handler);
        self
    }

    pub fn on_state_changed(self, handler: impl Fn(SessionState) + Send + Sync + 'static) -> Self {
        self.dispatcher.on_state_changed(handler);
        self
    }

    pub fn on_session_failed(self, handler: impl Fn(&DomeError) + Send + Sync + 'static) -> Self {
        self.dispatcher.on_session_failed(handler);
        self
    }

    pub fn on_diagnostic(self, handler: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.dispatcher.on_diagnostic(handler);
        self
    }

    /// Run startup against the given channels and return an active session.
    ///
    /// Startup is control plane first: register, merge history, then connect
    /// the streaming channel with the reply handler already attached. Any
    /// failure is returned here and leaves nothing connected.
    pub async fn initialize<C, S>(self, control: C, stream: S) -> Result<Session, DomeError>
    where
        C: ControlChannel + 'static,
        S: StreamingChannel + 'static,
    {
        let (credentials, device) = self.validate()?;
        self.start(credentials, device, Arc::new(control), Arc::new(stream))
            .await
    }

    /// Like [`SessionBuilder::initialize`] with the built-in HTTP control
    /// channel pointed at `config.control_endpoint`.
    pub async fn initialize_http<S>(self, stream: S) -> Result<Session, DomeError>
    where
        S: StreamingChannel + 'static,
    {
        let (credentials, device) = self.validate()?;
        let http = ReqwestHttpClient::with_timeout(self.config.request_timeout)
            .map_err(|err| DomeError::transport("http_client_build_error", err.to_string()))?;
        let control =
            HttpControlChannel::new(http, &self.config.control_endpoint, credentials.clone())?;
        self.start(credentials, device, Arc::new(control), Arc::new(stream))
            .await
    }

    fn validate(&self) -> Result<(Credentials, DeviceIdentity), DomeError> {
        let credentials = Credentials::new(self.api_id.clone(), self.api_key.clone())?;
        let device = DeviceIdentity::new(self.device_id.clone(), self.push_token.clone())?;
        Ok((credentials, device))
    }

    async fn start(
        self,
        credentials: Credentials,
        device: DeviceIdentity,
        control: Arc<dyn ControlChannel>,
        stream: Arc<dyn StreamingChannel>,
    ) -> Result<Session, DomeError> {
        let config = self.config;
        let dispatcher = self.dispatcher.with_event_buffer(config.event_buffer);
        let (state_tx, state_rx) = watch::channel(SessionState::Uninitialized);
        let mut lifecycle = Lifecycle {
            machine: SessionStateMachine::default(),
            state_tx,
            dispatcher: dispatcher.clone(),
        };

        lifecycle.advance(SessionTransition::BeginIdentity)?;
        let registered = bounded(
            config.identity_timeout,
            "register_client",
            control.register_client(&device),
        )
        .await;
        let client_id = match registered {
            Ok(client_id) => client_id,
            Err(err) => {
                warn!(error = %err, "client registration failed");
                lifecycle.fail();
                return Err(err);
            }
        };
        info!(client_id = %client_id, "client registered");
        lifecycle.advance(SessionTransition::IdentityAcquired)?;

        let mut log = ConversationLog::new();
        let mut bootstrap_warning = None;
        let history = bounded(
            config.history_timeout,
            "fetch_history",
            control.fetch_history(&client_id),
        )
        .await;
        match history {
            Ok(entries) => {
                let outcome = log.merge(entries);
                debug!(
                    inserted = outcome.inserted.len(),
                    duplicates = outcome.duplicates,
                    "history merged"
                );
                if outcome.changed() {
                    dispatcher.dispatch(SessionEvent::LogUpdated {
                        entries: log.snapshot(),
                    });
                }
            }
            Err(err) if config.best_effort_history => {
                warn!(error = %err, "history bootstrap failed, continuing with an empty log");
                dispatcher.diagnostic(format!("history bootstrap failed: {err}"));
                bootstrap_warning = Some(err);
            }
            Err(err) => {
                warn!(error = %err, "history bootstrap failed");
                lifecycle.fail();
                return Err(history_failure(err));
            }
        }
        lifecycle.advance(SessionTransition::HistoryBootstrapped)?;

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let connected = bounded(
            config.connect_timeout,
            "stream_connect",
            stream.connect(header_source(&credentials, &client_id), signal_tx),
        )
        .await;
        if let Err(err) = connected {
            warn!(error = %err, "streaming channel failed to connect");
            stream.disconnect().await;
            lifecycle.fail();
            return Err(err);
        }
        lifecycle.advance(SessionTransition::StreamActivated)?;
        info!(
            client_id = %client_id,
            entries = log.len(),
            "support session active"
        );

        let (log_tx, log_rx) = watch::channel(Arc::new(log.snapshot()));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let task = SessionTask {
            router: support_router(&client_id),
            lifecycle,
            log,
            log_tx,
            dispatcher: dispatcher.clone(),
            stream,
            device,
            announce_presence: config.announce_presence,
            signals: signal_rx,
            signals_open: true,
            commands: command_rx,
            shutdown: shutdown.child_token(),
        };
        let task = tokio::spawn(task.run());

        Ok(Session {
            client_id,
            control,
            dispatcher,
            commands: command_tx,
            state: state_rx,
            log: log_rx,
            bootstrap_warning,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }
}

/// A live support conversation.
///
/// The conversation log is owned by a background task; this handle reads
/// published snapshots and forwards writes to it. Dropping the handle stops
/// the task and disconnects the streaming channel.
pub struct Session {
    client_id: ClientId,
    control: Arc<dyn ControlChannel>,
    dispatcher: EventDispatcher,
    commands: mpsc::UnboundedSender<SessionCommand>,
    state: watch::Receiver<SessionState>,
    log: watch::Receiver<Arc<Vec<ConversationEntry>>>,
    bootstrap_warning: Option<DomeError>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client_id", &self.client_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Error swallowed by best-effort history bootstrap, if any.
    pub fn bootstrap_warning(&self) -> Option<&DomeError> {
        self.bootstrap_warning.as_ref()
    }

    /// Current log in display order. Never observes a partial merge.
    pub fn snapshot_log(&self) -> Vec<ConversationEntry> {
        self.log.borrow().as_ref().clone()
    }

    pub fn subscribe(&self) -> EventStream {
        self.dispatcher.subscribe()
    }

    pub fn on_message(&self, handler: impl Fn(&ConversationEntry) + Send + Sync + 'static) {
        self.dispatcher.on_message(handler);
    }

    pub fn on_log_updated(&self, handler: impl Fn(&[ConversationEntry]) + Send + Sync + 'static) {
        self.dispatcher.on_log_updated(handler);
    }

    pub fn on_state_changed(&self, handler: impl Fn(SessionState) + Send + Sync + 'static) {
        self.dispatcher.on_state_changed(handler);
    }

    pub fn on_session_failed(&self, handler: impl Fn(&DomeError) + Send + Sync + 'static) {
        self.dispatcher.on_session_failed(handler);
    }

    pub fn on_diagnostic(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.dispatcher.on_diagnostic(handler);
    }

    /// Send a user message over the control plane.
    ///
    /// Works while the streaming side is failed. A returned entry is merged
    /// into the log before this resolves; it does not fire `on_message`.
    /// Errors leave the session state unchanged.
    pub async fn send_message(&self, text: &str) -> Result<SendReceipt, DomeError> {
        if text.trim().is_empty() {
            return Err(DomeError::validation(
                "message_text_empty",
                "message text must not be empty",
            ));
        }
        self.state().ensure_can_send()?;

        let receipt = self
            .control
            .send_message(&self.client_id, text)
            .await
            .inspect_err(|err| warn!(error = %err, "send_message failed"))?;

        if let Some(entry) = receipt.entry() {
            let (done_tx, done_rx) = oneshot::channel();
            let command = SessionCommand::MergeLocal {
                entry: entry.clone(),
                done: done_tx,
            };
            if self.commands.send(command).is_err() || done_rx.await.is_err() {
                debug!("session task stopped before the sent entry was merged");
            }
        }
        Ok(receipt)
    }

    /// Stop dispatching, disconnect the stream and wait for the session task.
    /// Idempotent.
    pub async fn close(&self) {
        self.dispatcher.close();
        self.shutdown.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "session task ended abnormally");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispatcher.close();
        self.shutdown.cancel();
    }
}

enum SessionCommand {
    MergeLocal {
        entry: ConversationEntry,
        done: oneshot::Sender<()>,
    },
}

enum Wake {
    Shutdown,
    Command(SessionCommand),
    Signal(Option<StreamSignal>),
}

/// State machine plus the outputs every transition must reach.
struct Lifecycle {
    machine: SessionStateMachine,
    state_tx: watch::Sender<SessionState>,
    dispatcher: EventDispatcher,
}

impl Lifecycle {
    fn state(&self) -> SessionState {
        self.machine.state()
    }

    fn advance(&mut self, transition: SessionTransition) -> Result<(), DomeError> {
        let event = self.machine.apply(transition)?;
        self.state_tx.send_replace(self.machine.state());
        debug!(state = ?self.machine.state(), "session state changed");
        self.dispatcher.dispatch(event);
        Ok(())
    }

    fn fail(&mut self) {
        if let Err(err) = self.advance(SessionTransition::Fail) {
            debug!(error = %err, "session already terminal");
        }
    }
}

/// Single writer for the conversation log and the session state once
/// startup is done.
struct SessionTask {
    lifecycle: Lifecycle,
    log: ConversationLog,
    log_tx: watch::Sender<Arc<Vec<ConversationEntry>>>,
    router: EventRouter<ConversationEntry>,
    dispatcher: EventDispatcher,
    stream: Arc<dyn StreamingChannel>,
    device: DeviceIdentity,
    announce_presence: bool,
    signals: mpsc::UnboundedReceiver<StreamSignal>,
    signals_open: bool,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    shutdown: CancellationToken,
}

impl SessionTask {
    async fn run(mut self) {
        loop {
            let wake = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => Wake::Shutdown,
                Some(command) = self.commands.recv() => Wake::Command(command),
                signal = self.signals.recv(), if self.signals_open => Wake::Signal(signal),
            };

            match wake {
                Wake::Shutdown => break,
                Wake::Command(command) => self.handle_command(command),
                Wake::Signal(Some(signal)) => self.handle_signal(signal).await,
                Wake::Signal(None) => {
                    self.signals_open = false;
                    self.fail_stream(DomeError::transport(
                        "stream_closed",
                        "streaming transport dropped its signal channel",
                    ))
                    .await;
                }
            }
        }

        self.stream.disconnect().await;
        if let Err(err) = self.lifecycle.advance(SessionTransition::Close) {
            debug!(error = %err, "session already closed");
        }
        info!("support session closed");
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::MergeLocal { entry, done } => {
                let outcome = self.log.append_one(entry);
                if outcome.changed() {
                    let entries = self.publish_log();
                    self.dispatcher
                        .dispatch(SessionEvent::LogUpdated { entries });
                }
                // Sender gone means the caller stopped waiting.
                let _ = done.send(());
            }
        }
    }

    async fn handle_signal(&mut self, signal: StreamSignal) {
        match signal {
            StreamSignal::Event { name, args } => self.handle_event(&name, &args),
            StreamSignal::Connected => {
                info!("streaming channel connected");
                if self.announce_presence {
                    self.announce().await;
                }
            }
            StreamSignal::Disconnected { reason } => {
                warn!(%reason, "streaming channel disconnected");
            }
            StreamSignal::Faulted { error } => self.fail_stream(error).await,
        }
    }

    fn handle_event(&mut self, name: &str, args: &[Value]) {
        if !self.lifecycle.machine.is_dispatching() {
            debug!(event = name, state = ?self.lifecycle.state(), "ignoring stream event");
            return;
        }

        match self.router.route(name, args) {
            Some(Ok(entry)) => self.merge_live(entry),
            Some(Err(err)) => {
                warn!(event = name, error = %err, "dropping undecodable stream event");
                self.dispatcher
                    .diagnostic(format!("dropped '{name}' event: {err}"));
            }
            None => debug!(event = name, "no handler for stream event"),
        }
    }

    fn merge_live(&mut self, entry: ConversationEntry) {
        let outcome = self.log.append_one(entry);
        if !outcome.changed() {
            debug!("duplicate live entry ignored");
            return;
        }

        let entries = self.publish_log();
        for entry in outcome.inserted {
            self.dispatcher.dispatch(SessionEvent::Message(entry));
        }
        self.dispatcher
            .dispatch(SessionEvent::LogUpdated { entries });
    }

    async fn announce(&self) {
        let args = vec![
            Value::String(self.device.device_id().to_owned()),
            Value::String(self.device.push_token().to_owned()),
        ];
        if let Err(err) = self.stream.send(EVENT_PRESENCE, args).await {
            warn!(error = %err, "presence announcement failed");
        }
    }

    async fn fail_stream(&mut self, error: DomeError) {
        if self.lifecycle.state() != SessionState::Active {
            debug!(error = %error, "stream fault after session left active state");
            return;
        }

        warn!(error = %error, "streaming channel faulted, session failed");
        self.lifecycle.fail();
        self.dispatcher
            .dispatch(SessionEvent::SessionFailed { error });
        self.signals.close();
        self.signals_open = false;
        self.stream.disconnect().await;
    }

    fn publish_log(&self) -> Vec<ConversationEntry> {
        let entries = self.log.snapshot();
        self.log_tx.send_replace(Arc::new(entries.clone()));
        entries
    }
}

fn header_source(credentials: &Credentials, client_id: &ClientId) -> HeaderSource {
    let credentials = credentials.clone();
    let client_id = client_id.clone();
    Arc::new(move || SecurityHeaders::for_request(&credentials, Some(&client_id)))
}

fn support_router(client_id: &ClientId) -> EventRouter<ConversationEntry> {
    let client_id = client_id.clone();
    let mut router = EventRouter::new();
    router.on(EVENT_SUPPORT_RESPONSE, move |args: &[Value]| {
        let payload = args.first().cloned().ok_or_else(|| {
            DomeError::protocol(
                "support_payload_missing",
                "SupportResponse carried no arguments",
            )
        })?;
        normalize_support_payload(payload, &client_id)
    });
    router
}

async fn bounded<T>(
    limit: Duration,
    operation: &str,
    call: impl Future<Output = Result<T, DomeError>>,
) -> Result<T, DomeError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| DomeError::timeout(operation, limit))?
}

fn history_failure(err: DomeError) -> DomeError {
    DomeError::new(
        err.category,
        "history_bootstrap_failed",
        format!("{}: {}", err.code, err.message),
    )
}
