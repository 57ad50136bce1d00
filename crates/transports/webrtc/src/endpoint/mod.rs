//! Pipeline-facing WebRTC endpoints
//!
//! An endpoint is one task owning one peer connection engine, one signaling
//! channel and the role-specific negotiation state. Everything that can
//! happen to it (host requests, engine events, signaling events) arrives as an
//! [`Event`] on a single queue and is processed strictly in order by
//! [`Endpoint::step`]. Results flow back to the host as [`PipelineAction`]s.
//!
//! Any failure closes the endpoint: every open output pad gets exactly one
//! end-of-stream, then a single [`PipelineAction::Terminate`] is emitted, the
//! engine is closed and the task exits.

mod session;
pub mod sink;
pub mod source;

pub use sink::{SinkEndpoint, SinkHandle};
pub use source::{SourceEndpoint, SourceHandle};

pub(crate) use session::Session;

use crate::config::EndpointConfig;
use crate::media::{Buffer, PadRef, RtpStreamFormat, TrackId, TrackInfo};
use crate::peer::{ConnectionState, EngineEvent, EngineEvents, PeerConnectionAdapter};
use crate::signaling::websocket::WebSocketSignalingServer;
use crate::signaling::{SessionDescription, SignalingEvent, SignalingMessage, SignalingSource};
use crate::{Error, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use webrtc::rtp::packet::Packet;

/// Lifecycle of an endpoint's peer connection
///
/// Moves forward only: Init → Connecting → Connected → Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Nothing negotiated yet
    Init,
    /// A local description has been sent
    Connecting,
    /// The engine reported the connection as established
    Connected,
    /// The endpoint has shut down
    Closed,
}

/// Notification sent to the pipeline parent
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Signaling channel is available
    Ready,
    /// Peer connection established
    Connected,
    /// Tracks that became available in one negotiation round
    NewTracks(Vec<TrackInfo>),
}

/// Why an endpoint shut down
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CloseReason {
    /// The signaling channel went away
    #[error("signaling channel terminated")]
    SignalingTerminated,
    /// The engine event stream ended
    #[error("peer connection engine terminated")]
    EngineTerminated,
    /// The engine reported a terminal connection state
    #[error("peer connection lost ({0:?})")]
    ConnectionLost(ConnectionState),
    /// An offer or answer arrived where the protocol forbids it
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// The remote peer muted or removed a track
    #[error("track {0} rejected by remote peer")]
    TrackRejected(TrackId),
    /// An engine operation failed
    #[error("engine failure: {0}")]
    EngineFailure(String),
    /// The host asked the endpoint to close
    #[error("shut down by host")]
    Shutdown,
}

impl From<Error> for CloseReason {
    fn from(e: Error) -> Self {
        match e {
            Error::ProtocolViolation(msg) => CloseReason::ProtocolViolation(msg),
            other => CloseReason::EngineFailure(other.to_string()),
        }
    }
}

/// Action for the pipeline host to carry out
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineAction {
    /// Announce the stream format on a newly bound output pad
    StreamFormat {
        /// Output pad
        pad: PadRef,
        /// Format of the track behind it
        format: RtpStreamFormat,
    },
    /// Push a buffer on an output pad
    Buffer {
        /// Output pad
        pad: PadRef,
        /// The buffer
        buffer: Buffer,
    },
    /// End the stream on an output pad
    EndOfStream {
        /// Output pad
        pad: PadRef,
    },
    /// Tell the parent something happened
    Notify(Notification),
    /// The endpoint has shut down; no further actions follow
    Terminate(CloseReason),
}

/// Stream of actions produced by an endpoint
pub type PipelineActions = mpsc::UnboundedReceiver<PipelineAction>;

/// Everything an endpoint task reacts to
#[derive(Debug)]
pub(crate) enum Event<I> {
    /// Request from the pipeline host
    Input(I),
    /// Event from the peer connection engine
    Engine(EngineEvent),
    /// The engine event stream ended
    EngineTerminated,
    /// Event from the signaling path
    Signaling(SignalingEvent),
    /// The host asked the endpoint to close
    Shutdown,
}

/// Role-specific half of an endpoint
#[async_trait]
pub(crate) trait Role: Send + 'static {
    /// Host requests this role accepts
    type Input: Send + 'static;

    /// Role name for logs
    const NAME: &'static str;

    async fn on_input(&mut self, input: Self::Input, session: &mut Session) -> Result<()>;

    async fn on_signaling_available(&mut self, session: &mut Session) -> Result<()>;

    async fn on_description(
        &mut self,
        desc: SessionDescription,
        session: &mut Session,
    ) -> Result<()>;

    async fn on_remote_tracks(
        &mut self,
        tracks: Vec<TrackInfo>,
        session: &mut Session,
    ) -> Result<()>;

    fn on_rtp(&mut self, track_id: TrackId, packet: Packet, session: &mut Session);

    /// Output pads that still need an end-of-stream; cleared by the call
    fn take_open_outputs(&mut self) -> Vec<PadRef>;
}

/// One endpoint instance: role state plus shared session
pub(crate) struct Endpoint<R: Role> {
    pub(crate) role: R,
    pub(crate) session: Session,
}

impl<R: Role> Endpoint<R> {
    /// Process one event
    ///
    /// Events arriving after close are ignored.
    pub(crate) async fn step(&mut self, event: Event<R::Input>) {
        if self.session.status() == ConnectionStatus::Closed {
            trace!("{} endpoint closed, ignoring event", R::NAME);
            return;
        }

        let outcome = match event {
            Event::Input(input) => self
                .role
                .on_input(input, &mut self.session)
                .await
                .map(|_| None),
            Event::Engine(event) => self.on_engine_event(event).await,
            Event::EngineTerminated => Ok(Some(CloseReason::EngineTerminated)),
            Event::Signaling(event) => self.on_signaling_event(event).await,
            Event::Shutdown => Ok(Some(CloseReason::Shutdown)),
        };

        match outcome {
            Ok(None) => {}
            Ok(Some(reason)) => self.close(reason).await,
            Err(e) => {
                error!("{} endpoint failed: {}", R::NAME, e);
                self.close(CloseReason::from(e)).await;
            }
        }
    }

    async fn on_engine_event(&mut self, event: EngineEvent) -> Result<Option<CloseReason>> {
        match event {
            EngineEvent::IceCandidate(candidate) => {
                self.session.on_local_candidate(candidate);
            }
            EngineEvent::ConnectionStateChange(ConnectionState::Connected) => {
                self.session.mark_connected();
            }
            EngineEvent::ConnectionStateChange(state) if state.is_terminal() => {
                return Ok(Some(CloseReason::ConnectionLost(state)));
            }
            EngineEvent::ConnectionStateChange(state) => {
                debug!("Connection state {:?}", state);
            }
            EngineEvent::TrackMuted(id) | EngineEvent::TrackRemoved(id) => {
                return Ok(Some(CloseReason::TrackRejected(id)));
            }
            EngineEvent::Track(info) => {
                self.role
                    .on_remote_tracks(vec![info], &mut self.session)
                    .await?;
            }
            EngineEvent::Rtp { track_id, packet } => {
                self.role.on_rtp(track_id, packet, &mut self.session);
            }
            EngineEvent::Other(description) => {
                warn!("Ignoring engine event: {}", description);
            }
        }
        Ok(None)
    }

    async fn on_signaling_event(&mut self, event: SignalingEvent) -> Result<Option<CloseReason>> {
        match event {
            SignalingEvent::Available(channel) => {
                if self.session.attach_signaling(channel) {
                    self.role.on_signaling_available(&mut self.session).await?;
                }
            }
            SignalingEvent::Message(SignalingMessage::SessionDescription(desc)) => {
                self.role.on_description(desc, &mut self.session).await?;
            }
            SignalingEvent::Message(SignalingMessage::IceCandidate(candidate)) => {
                self.session.on_remote_candidate(candidate).await?;
            }
            SignalingEvent::Terminated => return Ok(Some(CloseReason::SignalingTerminated)),
        }
        Ok(None)
    }

    async fn close(&mut self, reason: CloseReason) {
        info!("Closing {} endpoint: {}", R::NAME, reason);

        for pad in self.role.take_open_outputs() {
            self.session.emit(PipelineAction::EndOfStream { pad });
        }
        self.session.emit(PipelineAction::Terminate(reason));
        self.session.shut_down().await;
    }

    async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event<R::Input>>) {
        while let Some(event) = events.recv().await {
            self.step(event).await;
            if self.session.status() == ConnectionStatus::Closed {
                break;
            }
        }
        debug!("{} endpoint task exiting", R::NAME);
    }
}

/// What a started endpoint hands back to its handle
pub(crate) struct Launched<I> {
    pub(crate) events: mpsc::UnboundedSender<Event<I>>,
    pub(crate) actions: PipelineActions,
    pub(crate) signaling_addr: Option<SocketAddr>,
}

/// Wire an engine, a signaling source and a role together and spawn the task
pub(crate) async fn launch<R: Role>(
    role: R,
    config: EndpointConfig,
    signaling: SignalingSource,
    adapter: PeerConnectionAdapter,
    engine_events: EngineEvents,
) -> Result<Launched<R::Input>> {
    let (events_tx, events_rx) = mpsc::unbounded_channel::<Event<R::Input>>();
    let (actions_tx, actions_rx) = mpsc::unbounded_channel();

    let server = match signaling {
        SignalingSource::WebSocket { bind_addr } => {
            match WebSocketSignalingServer::bind(bind_addr).await {
                Ok(server) => Some(server),
                Err(e) => {
                    let _ = adapter.close().await;
                    return Err(e);
                }
            }
        }
        SignalingSource::Channel(channel) => {
            events_tx
                .send(Event::Signaling(SignalingEvent::Available(channel)))
                .map_err(|_| Error::EndpointClosed)?;
            None
        }
    };

    let tx = events_tx.clone();
    PeerConnectionAdapter::monitor(engine_events, move |event| match event {
        Some(event) => tx.send(Event::Engine(event)).is_ok(),
        None => tx.send(Event::EngineTerminated).is_ok(),
    });

    let tx = events_tx.clone();
    let forward: session::SignalingForward =
        Arc::new(move |event: SignalingEvent| tx.send(Event::Signaling(event)).is_ok());

    let mut session = Session::new(adapter, Arc::new(config), Arc::clone(&forward), actions_tx);

    let signaling_addr = server.map(|server| {
        let addr = server.local_addr();
        session.set_signaling_server(server.start(move |channel| {
            forward(SignalingEvent::Available(channel));
        }));
        addr
    });

    info!("{} endpoint started", R::NAME);
    tokio::spawn(Endpoint { role, session }.run(events_rx));

    Ok(Launched {
        events: events_tx,
        actions: actions_rx,
        signaling_addr,
    })
}

/// Queue an event for an endpoint task
pub(crate) fn dispatch<I>(events: &mpsc::UnboundedSender<Event<I>>, event: Event<I>) -> Result<()> {
    events.send(event).map_err(|_| Error::EndpointClosed)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_reason_from_error() {
        let reason = CloseReason::from(Error::ProtocolViolation("answer in source".to_string()));
        assert_eq!(
            reason,
            CloseReason::ProtocolViolation("answer in source".to_string())
        );

        let reason = CloseReason::from(Error::SdpError("bad".to_string()));
        assert!(matches!(reason, CloseReason::EngineFailure(_)));
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(
            CloseReason::ConnectionLost(ConnectionState::Failed).to_string(),
            "peer connection lost (Failed)"
        );
        assert_eq!(
            CloseReason::TrackRejected(TrackId::from("1")).to_string(),
            "track 1 rejected by remote peer"
        );
    }
}
