//! Async session driver.
//!
//! [`SessionDriver::start`] spawns one task that owns the
//! [`SessionMachine`] and multiplexes, via `tokio::select!`:
//!
//! - the realtime WebSocket (frames, detections, welcome),
//! - connection lifecycle events from a connector task that dials and
//!   retries with exponential backoff,
//! - operator intents sent through a [`SessionHandle`],
//! - results of control commands executed by a serial worker task.
//!
//! Every transition publishes a fresh [`SessionSnapshot`] on a watch
//! channel and may emit a [`SessionEvent`] on a broadcast channel.
//! Cancelling the handle closes the machine first, so nothing that
//! arrives afterwards can change it.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use traycam_core::error::CoreError;
use traycam_core::machine::{Effect, Intent, SessionMachine, SessionSnapshot, SubmissionState};
use traycam_core::wire::ControlCommand;

use crate::api::{ControlApiError, ControlChannel};
use crate::client::{RealtimeClient, RealtimeConnection, RealtimeStream};
use crate::decode::{decode_message, InboundEvent};
use crate::events::SessionEvent;
use crate::messages::OutboundMessage;
use crate::reconnect::{reconnect_loop, ReconnectConfig, ReconnectOutcome};

/// Broadcast channel capacity for session events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Queue depth for operator intents.
const INTENT_CHANNEL_CAPACITY: usize = 64;

/// How long [`SessionHandle::shutdown`] waits for the task to exit.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How control commands reach the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlTransport {
    /// `POST {api}/command` through a [`ControlChannel`].
    #[default]
    Http,
    /// Inside a `subscribe` envelope on the realtime channel. A
    /// successful write counts as acceptance.
    Realtime,
}

impl std::str::FromStr for ControlTransport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "realtime" | "ws" => Ok(Self::Realtime),
            other => Err(format!("unknown control transport '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DriverConfig {
    pub reconnect: ReconnectConfig,
    pub transport: ControlTransport,
}

/// Errors returned to intent senders.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The state machine refused the intent. Nothing changed.
    #[error(transparent)]
    Rejected(#[from] CoreError),

    /// The driver task has exited.
    #[error("Session driver has stopped")]
    Stopped,
}

struct IntentRequest {
    intent: Intent,
    reply: oneshot::Sender<Result<(), CoreError>>,
}

/// Messages from the connector task.
enum LinkEvent {
    Attempt { attempt: u32, delay: Duration },
    Up(RealtimeConnection),
    Exhausted { attempts: u32 },
}

/// Work for the serial command worker.
struct CommandJob {
    command: ControlCommand,
    is_submission: bool,
}

/// Outcome of a [`CommandJob`].
enum CommandResult {
    Sent {
        kind: &'static str,
        result: Result<(), String>,
    },
    Submitted(Result<(), String>),
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Owner-side handle to a running session.
pub struct SessionHandle {
    intents: mpsc::Sender<IntentRequest>,
    snapshots: watch::Receiver<SessionSnapshot>,
    event_tx: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl SessionHandle {
    /// Apply an intent and wait for the machine's verdict.
    pub async fn send(&self, intent: Intent) -> Result<(), DriverError> {
        let (reply, verdict) = oneshot::channel();
        self.intents
            .send(IntentRequest { intent, reply })
            .await
            .map_err(|_| DriverError::Stopped)?;
        verdict.await.map_err(|_| DriverError::Stopped)??;
        Ok(())
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// A receiver that is notified on every state change.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Tear the session down: close the machine, cancel any pending
    /// reconnect, close the socket, and wait up to 5 seconds for the
    /// task to exit.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down session driver");
        self.cancel.cancel();
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.task).await.is_err() {
            tracing::warn!("Session driver did not stop in time");
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

pub struct SessionDriver;

impl SessionDriver {
    /// Spawn the driver task and start connecting.
    pub fn start<C: ControlChannel>(
        machine: SessionMachine,
        client: RealtimeClient,
        control: Arc<C>,
        config: DriverConfig,
    ) -> SessionHandle {
        let (intent_tx, intent_rx) = mpsc::channel(INTENT_CHANNEL_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(machine.snapshot());
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(run_command_worker(control, job_rx, result_tx.clone()));

        let driver = DriverLoop {
            machine,
            client,
            config,
            cancel: cancel.clone(),
            intent_rx,
            link_tx,
            link_rx,
            job_tx,
            result_tx,
            result_rx,
            sink: None,
            stream: None,
            snapshot_tx,
            event_tx: event_tx.clone(),
            finished: false,
        };

        let task = tokio::spawn(async move {
            tracing::info!("Starting session driver");
            driver.run().await;
            tracing::info!("Session driver exited");
        });

        SessionHandle {
            intents: intent_tx,
            snapshots: snapshot_rx,
            event_tx,
            cancel,
            task,
        }
    }
}

struct DriverLoop {
    machine: SessionMachine,
    client: RealtimeClient,
    config: DriverConfig,
    cancel: CancellationToken,
    intent_rx: mpsc::Receiver<IntentRequest>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
    link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    job_tx: mpsc::UnboundedSender<CommandJob>,
    result_tx: mpsc::UnboundedSender<CommandResult>,
    result_rx: mpsc::UnboundedReceiver<CommandResult>,
    sink: Option<SplitSink<RealtimeStream, Message>>,
    stream: Option<SplitStream<RealtimeStream>>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    event_tx: broadcast::Sender<SessionEvent>,
    finished: bool,
}

impl DriverLoop {
    async fn run(mut self) {
        self.machine.connecting();
        self.publish();
        self.spawn_connector(true);

        while !self.finished {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(link) = self.link_rx.recv() => self.handle_link(link).await,
                Some(request) = self.intent_rx.recv() => self.handle_intent(request).await,
                Some(result) = self.result_rx.recv() => self.handle_result(result).await,
                message = next_message(&mut self.stream) => self.handle_socket(message).await,
            }
            self.publish();
        }

        self.teardown().await;
    }

    // ---- connection ----

    /// Dial in the background. The first dial of a session is tried once
    /// before entering the backoff loop; redials go straight to backoff.
    fn spawn_connector(&self, first_dial: bool) {
        let client = self.client.clone();
        let config = self.config.reconnect.clone();
        let cancel = self.cancel.child_token();
        let link_tx = self.link_tx.clone();

        tokio::spawn(async move {
            if first_dial {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    result = client.connect() => match result {
                        Ok(conn) => {
                            let _ = link_tx.send(LinkEvent::Up(conn));
                            return;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Connection failed, entering reconnect loop");
                        }
                    }
                }
            }

            let attempt_tx = link_tx.clone();
            let outcome = reconnect_loop(&client, &config, &cancel, move |attempt, delay| {
                let _ = attempt_tx.send(LinkEvent::Attempt { attempt, delay });
            })
            .await;

            match outcome {
                ReconnectOutcome::Connected(conn) => {
                    let _ = link_tx.send(LinkEvent::Up(conn));
                }
                ReconnectOutcome::Exhausted { attempts } => {
                    let _ = link_tx.send(LinkEvent::Exhausted { attempts });
                }
                ReconnectOutcome::Cancelled => {}
            }
        });
    }

    async fn handle_link(&mut self, link: LinkEvent) {
        match link {
            LinkEvent::Attempt { attempt, delay } => {
                let delay_ms = delay.as_millis() as u64;
                self.machine.reconnecting(attempt, delay_ms);
                self.emit(SessionEvent::Reconnecting { attempt, delay_ms });
            }
            LinkEvent::Up(conn) => {
                tracing::info!(connection_id = %conn.connection_id, "Realtime channel up");
                let (sink, stream) = conn.ws_stream.split();
                self.sink = Some(sink);
                self.stream = Some(stream);
                self.emit(SessionEvent::Connected);
                let effects = self.machine.connected();
                self.execute(effects).await;
            }
            LinkEvent::Exhausted { attempts } => {
                let reason = format!("Realtime channel unreachable after {attempts} attempts");
                self.machine.connection_failed(reason.clone());
                self.emit(SessionEvent::ConnectionFailed { reason });
            }
        }
    }

    fn link_lost(&mut self) {
        self.sink = None;
        self.stream = None;
        self.machine.connection_lost();
        self.emit(SessionEvent::Disconnected);
        if !self.cancel.is_cancelled() {
            tracing::info!("Connection lost, entering reconnect loop");
            self.spawn_connector(false);
        }
    }

    // ---- inbound socket traffic ----

    async fn handle_socket(&mut self, message: Option<Result<Message, tungstenite::Error>>) {
        match message {
            Some(Ok(Message::Text(text))) => self.handle_text(&text),
            Some(Ok(Message::Binary(_))) => {
                tracing::trace!("Ignoring binary realtime message");
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                // Handled automatically by tungstenite.
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(?frame, "Realtime channel closed by server");
                self.link_lost();
            }
            Some(Ok(Message::Frame(_))) => {}
            Some(Err(e)) => {
                tracing::error!(error = %e, "Realtime receive error");
                self.link_lost();
            }
            None => {
                tracing::info!("Realtime stream exhausted");
                self.link_lost();
            }
        }
    }

    fn handle_text(&mut self, text: &str) {
        let event = match decode_message(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(error = %e, "Dropping undecodable realtime message");
                return;
            }
        };

        match event {
            InboundEvent::Welcome(data) => {
                tracing::info!(
                    client_id = %data.client_id,
                    server_time = data.server_time.as_deref().unwrap_or("-"),
                    "{}",
                    data.message,
                );
                self.machine.welcome(data.client_id.clone());
                self.emit(SessionEvent::Welcome {
                    client_id: data.client_id,
                });
            }
            InboundEvent::SubscriptionConfirmed(data) => {
                tracing::debug!(topic = %data.topic, status = ?data.status, "Subscription confirmed");
                self.emit(SessionEvent::Subscribed { topic: data.topic });
            }
            InboundEvent::Frame(frame) => {
                tracing::trace!(frame_name = %frame.name, "Frame received");
                let frame_name = frame.name.clone();
                self.machine.frame_received(frame);
                self.emit(SessionEvent::FrameReceived { frame_name });
            }
            InboundEvent::Detections(batch) => {
                let frame_name = batch.frame_name.clone();
                let missing_dishes = batch.missing_dishes;
                if self.machine.detections_received(batch) {
                    self.emit(SessionEvent::DetectionsApplied {
                        frame_name,
                        detections: self.machine.capture().detections().len(),
                        missing_dishes,
                    });
                } else {
                    self.emit(SessionEvent::DetectionsIgnored { frame_name });
                }
            }
        }
    }

    // ---- intents and effects ----

    async fn handle_intent(&mut self, request: IntentRequest) {
        let IntentRequest { intent, reply } = request;
        tracing::debug!(?intent, "Applying intent");
        let verdict = match self.machine.apply(intent) {
            Ok(effects) => {
                self.execute(effects).await;
                Ok(())
            }
            Err(e) => {
                tracing::debug!(error = %e, "Intent rejected");
                Err(e)
            }
        };
        let _ = reply.send(verdict);
    }

    async fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send(command) => self.dispatch(command, false).await,
                Effect::Submit(command) => self.dispatch(command, true).await,
                Effect::EndSession => {
                    self.emit(SessionEvent::SessionCompleted);
                    self.finished = true;
                }
            }
        }
    }

    async fn dispatch(&mut self, command: ControlCommand, is_submission: bool) {
        match self.config.transport {
            ControlTransport::Http => {
                if self
                    .job_tx
                    .send(CommandJob {
                        command,
                        is_submission,
                    })
                    .is_err()
                {
                    tracing::error!("Command worker is gone");
                }
            }
            ControlTransport::Realtime => {
                let kind = command.kind();
                let result = send_over_socket(self.sink.as_mut(), &command)
                    .await
                    .map_err(|e| e.operator_message());
                let outcome = if is_submission {
                    CommandResult::Submitted(result)
                } else {
                    CommandResult::Sent { kind, result }
                };
                // Handled on the next loop turn, like HTTP results.
                let _ = self.result_tx.send(outcome);
            }
        }
    }

    // ---- command results ----

    async fn handle_result(&mut self, result: CommandResult) {
        match result {
            CommandResult::Sent { kind, result: Ok(()) } => {
                tracing::debug!(kind, "Control command delivered");
            }
            CommandResult::Sent {
                kind,
                result: Err(error),
            } => {
                tracing::warn!(kind, error = %error, "Control command failed");
                self.machine.command_failed(kind, error.clone());
                self.emit(SessionEvent::CommandFailed {
                    kind: kind.to_string(),
                    error,
                });
            }
            CommandResult::Submitted(Ok(())) => {
                let food_level = self.machine.session().current_level();
                self.emit(SessionEvent::SubmissionSucceeded { food_level });
                let effects = self.machine.submission_succeeded();
                if self.machine.submission() == SubmissionState::AwaitingFinalAck {
                    self.emit(SessionEvent::AwaitingFinalAck);
                } else {
                    self.emit(SessionEvent::LevelAdvanced {
                        food_level: self.machine.session().current_level(),
                    });
                }
                self.execute(effects).await;
            }
            CommandResult::Submitted(Err(error)) => {
                tracing::warn!(error = %error, "Dish mapping submission failed");
                self.machine.submission_failed(error.clone());
                self.emit(SessionEvent::SubmissionFailed { error });
            }
        }
    }

    // ---- teardown ----

    async fn teardown(&mut self) {
        self.machine.close();
        self.cancel.cancel();
        self.stream = None;
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close().await {
                tracing::debug!(error = %e, "Realtime close handshake failed");
            }
        }
        self.publish();
    }

    // ---- publishing ----

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.machine.snapshot());
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Next socket message, or never when there is no socket.
async fn next_message(
    stream: &mut Option<SplitStream<RealtimeStream>>,
) -> Option<Result<Message, tungstenite::Error>> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

/// Write a command inside a `subscribe` envelope on the realtime channel.
async fn send_over_socket<S>(sink: Option<&mut S>, command: &ControlCommand) -> Result<(), ControlApiError>
where
    S: futures::Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = OutboundMessage::command(command)?.to_text()?;
    let sink = sink.ok_or_else(|| {
        ControlApiError::ChannelClosed("realtime channel is not connected".into())
    })?;
    sink.send(Message::Text(text))
        .await
        .map_err(|e| ControlApiError::ChannelClosed(e.to_string()))
}

/// Execute HTTP control commands one at a time, in order.
async fn run_command_worker<C: ControlChannel>(
    control: Arc<C>,
    mut jobs: mpsc::UnboundedReceiver<CommandJob>,
    results: mpsc::UnboundedSender<CommandResult>,
) {
    while let Some(job) = jobs.recv().await {
        let kind = job.command.kind();
        let result = control
            .send_command(&job.command)
            .await
            .map_err(|e| e.operator_message());
        let outcome = if job.is_submission {
            CommandResult::Submitted(result)
        } else {
            CommandResult::Sent { kind, result }
        };
        if results.send(outcome).is_err() {
            break;
        }
    }
    tracing::debug!("Command worker exited");
}
