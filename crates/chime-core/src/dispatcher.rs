//! Per-connection protocol dispatch.
//!
//! A connection reaches the dispatcher already authenticated. From there the
//! dispatcher owns it end to end: it registers the connection, reads and
//! handles frames one at a time, and purges every subscription when the
//! stream ends.
//!
//! ```text
//! Connecting ─▶ Authenticated ─▶ Open ─▶ Closing ─▶ Closed
//! ```

use chime_protocol::{codec, names, InboundFrame, OutboundFrame};
use chime_transport::{FrameReader, FrameWriter};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, trace, warn};

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::credentials::Credential;
use crate::metrics;
use crate::notify::{LogSink, WebhookEvent, WebhookNotifier};
use crate::registry::ConnectionRegistry;

/// Lifecycle of one connection. States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Connecting,
    Authenticated,
    Open,
    Closing,
    Closed,
}

impl SessionState {
    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_advance_to(self, next: SessionState) -> bool {
        next > self
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Frames that may wait for the writer before the connection is
    /// considered too slow and closed.
    pub outbound_buffer: usize,

    /// How long a client-closed connection may spend flushing queued
    /// frames before its writer is abandoned.
    pub drain_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: 256,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Drives connections through the channels protocol.
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    notifier: Arc<dyn WebhookNotifier>,
    log_sink: Arc<dyn LogSink>,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Create a dispatcher with default configuration.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        notifier: Arc<dyn WebhookNotifier>,
        log_sink: Arc<dyn LogSink>,
    ) -> Self {
        Self::with_config(registry, notifier, log_sink, DispatcherConfig::default())
    }

    /// Create a dispatcher with custom configuration.
    #[must_use]
    pub fn with_config(
        registry: Arc<ConnectionRegistry>,
        notifier: Arc<dyn WebhookNotifier>,
        log_sink: Arc<dyn LogSink>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            notifier,
            log_sink,
            config,
        }
    }

    /// Get the registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Run an upgraded connection until it closes.
    ///
    /// Reads are sequential; a malformed frame is discarded and the loop
    /// continues, while a transport error ends the connection. Writes happen
    /// on a separate task so a slow peer never stalls the read loop. Returns
    /// the id the connection was registered under.
    pub async fn on_upgrade_success<R, W>(
        &self,
        credential: Credential,
        mut reader: R,
        writer: W,
    ) -> ConnectionId
    where
        R: FrameReader,
        W: FrameWriter + 'static,
    {
        let (tx, rx) = mpsc::channel(self.config.outbound_buffer);
        let handle = ConnectionHandle::new(tx);
        let closer = handle.closer();
        let mut session = Session {
            dispatcher: self,
            id: handle.id(),
            credential,
            outbound: handle,
            state: SessionState::Authenticated,
        };
        let id = session.id;

        self.registry.register(session.outbound.clone());
        let mut writer_task = tokio::spawn(write_loop(writer, rx, Arc::clone(&closer), id));

        session.advance(SessionState::Open);
        session.record(names::CONNECTION, "");
        session.reply(&OutboundFrame::connection_established(id.socket_id()));

        let closed_by_server = loop {
            tokio::select! {
                biased;

                _ = closer.notified() => {
                    debug!(connection = %id, "Connection closed by server");
                    break true;
                }

                result = reader.recv() => match result {
                    Ok(Some(payload)) => session.handle_payload(&payload),
                    Ok(None) => {
                        debug!(connection = %id, "Connection closed by client");
                        break false;
                    }
                    Err(e) => {
                        warn!(connection = %id, error = %e, "Transport error");
                        break false;
                    }
                },
            }
        };

        session.advance(SessionState::Closing);
        self.on_stream_terminated(&session.credential, id);
        session.advance(SessionState::Closed);
        drop(session);

        // A server-side close means the peer is not keeping up, so its
        // writer may never finish. Otherwise let it flush, within a bound.
        if closed_by_server {
            writer_task.abort();
        } else {
            match tokio::time::timeout(self.config.drain_timeout, &mut writer_task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(connection = %id, error = %e, "Writer task failed"),
                Err(_) => {
                    debug!(connection = %id, "Writer did not drain in time, aborting");
                    writer_task.abort();
                }
            }
        }
        id
    }

    /// Purge a terminated connection and report the channels it vacated.
    ///
    /// Safe to call more than once; later calls find nothing to purge.
    pub fn on_stream_terminated(&self, credential: &Credential, id: ConnectionId) {
        let Some(vacated) = self.registry.purge_connection(id) else {
            return;
        };
        for channel in vacated {
            self.emit(credential, id, names::CHANNEL_VACATED, &channel, None);
        }
        self.log_sink
            .record(&credential.app_id, "", names::DISCONNECTION, id);
    }

    /// Log an event and notify webhooks.
    fn emit(
        &self,
        credential: &Credential,
        id: ConnectionId,
        event: &str,
        channel: &str,
        data: Option<Value>,
    ) {
        self.log_sink.record(&credential.app_id, channel, event, id);
        self.notifier.notify(WebhookEvent::new(
            credential.app_id.clone(),
            event,
            channel,
            data,
        ));
    }
}

/// State held by one running connection.
struct Session<'a> {
    dispatcher: &'a Dispatcher,
    id: ConnectionId,
    credential: Credential,
    outbound: ConnectionHandle,
    state: SessionState,
}

impl Session<'_> {
    fn advance(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        trace!(connection = %self.id, from = ?self.state, to = ?next, "Session state");
        self.state = next;
    }

    fn handle_payload(&mut self, payload: &[u8]) {
        metrics::record_frame("inbound", payload.len());
        match codec::decode(payload) {
            Ok(frame) => self.handle_frame(frame),
            Err(e) => {
                metrics::record_decode_error();
                debug!(connection = %self.id, error = %e, "Discarding malformed frame");
            }
        }
    }

    fn handle_frame(&mut self, frame: InboundFrame) {
        let registry = &self.dispatcher.registry;

        match frame {
            InboundFrame::Subscribe { channel } => match registry.subscribe(self.id, &channel) {
                Ok(became_occupied) => {
                    self.reply(&OutboundFrame::subscription_succeeded(channel.as_str()));
                    if became_occupied {
                        self.emit(names::CHANNEL_OCCUPIED, &channel, None);
                    }
                }
                Err(e) => {
                    warn!(
                        connection = %self.id,
                        channel = %channel,
                        error = %e,
                        "Subscribe failed"
                    );
                    self.reply(&OutboundFrame::error(e.code(), e.to_string()));
                }
            },

            InboundFrame::Unsubscribe { channel } => {
                if registry.unsubscribe(self.id, &channel) {
                    self.emit(names::CHANNEL_VACATED, &channel, None);
                }
            }

            InboundFrame::ClientEvent {
                event,
                channel,
                data,
            } => {
                let data = Value::Object(data);
                match codec::encode(&OutboundFrame::new(event, data.clone())) {
                    Ok(payload) => {
                        let recipients = registry.broadcast(&channel, payload);
                        debug!(
                            connection = %self.id,
                            channel = %channel,
                            recipients,
                            "Client event"
                        );
                    }
                    Err(e) => {
                        warn!(connection = %self.id, error = %e, "Failed to encode client event");
                    }
                }
                self.emit(names::CLIENT_EVENT, &channel, Some(data));
            }

            InboundFrame::MemberAdded { channel, data } => {
                self.emit(names::MEMBER_ADDED, &channel, Some(Value::Object(data)));
            }

            InboundFrame::MemberRemoved { channel, data } => {
                self.emit(names::MEMBER_REMOVED, &channel, Some(Value::Object(data)));
            }

            InboundFrame::Ping => self.reply(&OutboundFrame::pong()),

            InboundFrame::Unrecognized { event } => {
                trace!(connection = %self.id, event = %event, "Ignoring unrecognized event");
            }
        }
    }

    /// Queue a frame for this connection only.
    fn reply(&self, frame: &OutboundFrame) {
        match codec::encode(frame) {
            Ok(payload) => {
                if !self.outbound.try_deliver(payload) {
                    warn!(
                        connection = %self.id,
                        event = %frame.event,
                        "Outbound queue full, closing"
                    );
                }
            }
            Err(e) => warn!(connection = %self.id, error = %e, "Failed to encode reply"),
        }
    }

    fn record(&self, event: &str, channel: &str) {
        self.dispatcher
            .log_sink
            .record(&self.credential.app_id, channel, event, self.id);
    }

    fn emit(&self, event: &str, channel: &str, data: Option<Value>) {
        self.dispatcher
            .emit(&self.credential, self.id, event, channel, data);
    }
}

/// Forward queued frames to the socket until every sender is gone.
async fn write_loop<W: FrameWriter>(
    mut writer: W,
    mut rx: mpsc::Receiver<Arc<str>>,
    closer: Arc<Notify>,
    id: ConnectionId,
) {
    while let Some(payload) = rx.recv().await {
        let len = payload.len();
        if let Err(e) = writer.send(payload).await {
            warn!(connection = %id, error = %e, "Write failed");
            closer.notify_one();
            break;
        }
        metrics::record_frame("outbound", len);
    }
    if let Err(e) = writer.close().await {
        debug!(connection = %id, error = %e, "Close failed");
    }
}
