//! Stateful connection to a backend's notification stream.

use crate::config::ConnectionConfig;
use crate::error::{Error, HandshakeError};
use crate::events::{ConnectionState, Event};
use crate::frame::{Decoded, FrameDecoder};
use crate::handshake::{
    find_response_end, validate_response, AcceptKey, OpeningHandshake, StreamUrl,
};
use crate::stream_url::{BackendCredentials, MessageFilter, StreamUrlResolver};
use crate::transport::{Connector, TcpConnector, Transport, TransportEvent, TransportEvents};
use bytes::BytesMut;
use std::sync::Arc;
use tokio::time::Instant;

type EventHandler = Box<dyn Fn(Event) + Send + Sync>;

/// Where incoming bytes go.
#[derive(Debug)]
enum Phase {
    /// No handshake in flight; bytes are dropped.
    Idle,
    /// Opening request sent, collecting the response headers.
    Handshake {
        accept_key: AcceptKey,
        response: BytesMut,
    },
    /// Upgrade accepted; bytes go to the frame decoder.
    Streaming,
}

/// Client side of a backend notification stream.
///
/// Drives the opening handshake and the frame decoder from transport events
/// and reports state changes and decoded messages to registered handlers.
/// Errors never trigger a reconnect; callers decide whether to call
/// [`connect`](Self::connect) again.
pub struct BackendConnection {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    handlers: Vec<EventHandler>,
    state: ConnectionState,
    phase: Phase,
    decoder: FrameDecoder,
    url: Option<StreamUrl>,
    transport: Option<Arc<dyn Transport>>,
    events: Option<TransportEvents>,
    handshake_deadline: Option<Instant>,
}

impl BackendConnection {
    /// Create a connection using plain TCP.
    pub fn new(config: ConnectionConfig) -> Self {
        let connector = Arc::new(TcpConnector::from_config(&config));
        Self::with_connector(config, connector)
    }

    /// Create a connection over a custom transport.
    pub fn with_connector(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            handlers: Vec::new(),
            state: ConnectionState::Disconnected,
            phase: Phase::Idle,
            decoder: FrameDecoder::new(),
            url: None,
            transport: None,
            events: None,
            handshake_deadline: None,
        }
    }

    /// Add an event handler (called for every event, in emission order).
    pub fn add_event_handler<F>(&mut self, f: F)
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.handlers.push(Box::new(f));
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// URL of the current (or last attempted) stream.
    pub fn stream_url(&self) -> Option<&StreamUrl> {
        self.url.as_ref()
    }

    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }

    /// Opening request sent, response not yet validated.
    pub fn is_handshake_pending(&self) -> bool {
        matches!(self.phase, Phase::Handshake { .. })
    }

    /// Open a stream to `url`. Any previous connection is torn down first.
    ///
    /// Emits `Connecting`; `Connected` follows once the server accepts the
    /// handshake.
    pub async fn connect(&mut self, url: &str) -> crate::Result<()> {
        let url = StreamUrl::parse_with_default_port(url, self.config.default_port)?;
        self.disconnect().await;
        self.set_state(ConnectionState::Connecting);
        self.open_stream(url).await
    }

    /// Ask `resolver` for a stream URL, then open it.
    ///
    /// `Connecting` is emitted before the URL request. A failed request
    /// returns the connection to `Disconnected`.
    pub async fn connect_to_backend(
        &mut self,
        resolver: &dyn StreamUrlResolver,
        credentials: &BackendCredentials,
        filter: &MessageFilter,
    ) -> crate::Result<()> {
        self.disconnect().await;
        tracing::debug!(backend_id = %credentials.backend_id, "requesting stream url");
        self.set_state(ConnectionState::Connecting);

        let resolved = resolver
            .resolve(credentials, filter)
            .await
            .and_then(|raw| StreamUrl::parse_with_default_port(&raw, self.config.default_port));
        match resolved {
            Ok(url) => self.open_stream(url).await,
            Err(e) => {
                tracing::warn!(error = %e, "retrieving stream url failed");
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Close the stream and reset all protocol state. Emits `Disconnected`
    /// unless already disconnected.
    pub async fn disconnect(&mut self) {
        self.reset_protocol_state();
        self.events = None;
        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                tracing::debug!(error = %e, "closing transport failed");
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Wait for the next transport event and handle it.
    ///
    /// Returns `false` once no transport is open. With a handshake timeout
    /// configured, a response that does not arrive in time fails the handshake.
    pub async fn process_next(&mut self) -> bool {
        let deadline = self.handshake_deadline;
        let Some(events) = self.events.as_mut() else {
            return false;
        };
        let received = match deadline {
            Some(at) => tokio::time::timeout_at(at, events.recv()).await.ok(),
            None => Some(events.recv().await),
        };
        let Some(next) = received else {
            let waited = self.config.handshake_timeout.unwrap_or_default();
            self.fail(Event::HandshakeFailed(HandshakeError::Timeout(waited)))
                .await;
            return true;
        };
        match next {
            Some(event) => {
                self.handle_transport_event(event).await;
                true
            }
            None => {
                // Transport vanished without saying goodbye.
                self.on_transport_disconnected();
                false
            }
        }
    }

    /// Handle transport events until the stream ends.
    pub async fn run(&mut self) {
        while self.process_next().await {}
    }

    /// Apply one transport event.
    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_transport_connected().await,
            TransportEvent::Data(bytes) => self.on_data(&bytes).await,
            TransportEvent::Error(e) => {
                tracing::warn!(error = %e, "socket connection error");
                self.fail(Event::TransportError {
                    reason: e.to_string(),
                })
                .await;
            }
            TransportEvent::Disconnected => self.on_transport_disconnected(),
        }
    }

    async fn open_stream(&mut self, url: StreamUrl) -> crate::Result<()> {
        tracing::info!(%url, "opening stream");
        match self.connector.open(url.socket_host(), url.port).await {
            Ok((transport, events)) => {
                self.transport = Some(transport);
                self.events = Some(events);
                self.url = Some(url);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(%url, error = %e, "opening transport failed");
                self.url = Some(url);
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn on_transport_connected(&mut self) {
        let Some(url) = self.url.as_ref() else {
            tracing::warn!("transport connected without a stream url");
            return;
        };
        tracing::debug!(%url, "initiating websocket handshake");
        self.decoder.reset();
        let (request, accept_key) = OpeningHandshake::new(url).into_parts();
        self.phase = Phase::Handshake {
            accept_key,
            response: BytesMut::new(),
        };
        // A timeout too large to represent means no deadline.
        self.handshake_deadline = self
            .config
            .handshake_timeout
            .and_then(|t| Instant::now().checked_add(t));

        let sent = match &self.transport {
            Some(transport) => transport.send(&request).await,
            None => Err(Error::NotConnected),
        };
        if let Err(e) = sent {
            self.fail(Event::TransportError {
                reason: e.to_string(),
            })
            .await;
        }
    }

    async fn on_data(&mut self, bytes: &[u8]) {
        if matches!(self.phase, Phase::Streaming) {
            self.decode(bytes).await;
            return;
        }
        let max = self.config.max_handshake_len;
        let Phase::Handshake { response, .. } = &mut self.phase else {
            tracing::debug!(len = bytes.len(), "dropping bytes outside a connection");
            return;
        };
        response.extend_from_slice(bytes);
        let end = match find_response_end(response) {
            Some(end) => end,
            None => {
                let too_large = response.len() > max;
                if too_large {
                    self.fail(Event::HandshakeFailed(HandshakeError::ResponseTooLarge(max)))
                        .await;
                }
                return;
            }
        };

        let Phase::Handshake {
            accept_key,
            mut response,
        } = std::mem::replace(&mut self.phase, Phase::Idle)
        else {
            return;
        };
        self.handshake_deadline = None;
        let trailing = response.split_off(end);
        match validate_response(&response, &accept_key) {
            Ok(()) => {
                self.phase = Phase::Streaming;
                self.set_state(ConnectionState::Connected);
                if !trailing.is_empty() {
                    self.decode(&trailing).await;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "handshake failed");
                self.fail(Event::HandshakeFailed(e)).await;
            }
        }
    }

    async fn decode(&mut self, bytes: &[u8]) {
        let mut decoded = Vec::new();
        let result = self.decoder.feed(bytes, |d| decoded.push(d));
        for d in decoded {
            match d {
                Decoded::Message(message) => self.dispatch(Event::Message(message)),
                Decoded::DataError(e) => {
                    tracing::warn!(error = %e, "dropping undecodable message");
                    self.dispatch(Event::DataError(e));
                }
            }
        }
        if let Err(e) = result {
            tracing::warn!(error = %e, "protocol error");
            self.fail(Event::ProtocolError(e)).await;
        }
    }

    /// Fatal error: report it, drop all decode state and close the transport.
    /// `Disconnected` is emitted when the transport confirms the close.
    async fn fail(&mut self, event: Event) {
        tracing::warn!("closing socket");
        self.reset_protocol_state();
        self.dispatch(event);
        if let Some(transport) = &self.transport {
            if let Err(e) = transport.close().await {
                tracing::debug!(error = %e, "closing transport failed");
            }
        }
    }

    fn on_transport_disconnected(&mut self) {
        self.reset_protocol_state();
        self.transport = None;
        self.events = None;
        self.set_state(ConnectionState::Disconnected);
    }

    fn reset_protocol_state(&mut self) {
        self.phase = Phase::Idle;
        self.decoder.reset();
        self.handshake_deadline = None;
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        tracing::info!(from = %self.state, to = %state, "connection state changed");
        self.state = state;
        self.dispatch(Event::StateChanged(state));
    }

    fn dispatch(&self, evt: Event) {
        for f in self.handlers.iter() {
            f(evt.clone());
        }
    }
}
