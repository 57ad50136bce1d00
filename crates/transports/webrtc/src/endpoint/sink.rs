//! Sink endpoint: pipeline buffers in, RTP out
//!
//! The sink is always the offerer. Tracks it wants to send are queued and
//! negotiated in batches, one outstanding offer at a time. Once an answer
//! arrives the batch becomes negotiated and input pads bind to those tracks.

use super::{dispatch, launch, Event, Notification, PipelineActions, Role, Session};
use crate::config::EndpointConfig;
use crate::media::dispatcher::buffer_to_rtp;
use crate::media::{Buffer, MediaKind, PadOptions, PadRef, TrackId, TrackInfo};
use crate::peer::{EngineEvents, PeerConnectionAdapter};
use crate::signaling::{SdpType, SessionDescription, SignalingSource};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, trace, warn};
use webrtc::rtp::packet::Packet;

/// Host request accepted by a sink
#[derive(Debug)]
pub enum SinkInput {
    /// Negotiate additional outgoing tracks
    AddTracks(Vec<MediaKind>),
    /// An input pad was linked
    PadAdded {
        /// Pad name
        pad: PadRef,
        /// Link options
        options: PadOptions,
    },
    /// Buffer arrived on an input pad
    Buffer {
        /// Pad name
        pad: PadRef,
        /// The buffer
        buffer: Buffer,
    },
    /// End of stream on an input pad
    EndOfStream {
        /// Pad name
        pad: PadRef,
    },
    /// An input pad was unlinked
    PadRemoved {
        /// Pad name
        pad: PadRef,
    },
}

/// Offer/answer progress of a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Negotiation {
    Idle,
    Offering,
}

#[derive(Debug, Clone)]
struct SinkTrack {
    info: TrackInfo,
    /// Whether the parent hears about this track once negotiated
    notify: bool,
}

#[derive(Debug, Clone, Copy)]
struct QueuedTrack {
    kind: MediaKind,
    notify: bool,
}

#[derive(Debug, Clone)]
struct Binding {
    track_id: TrackId,
    clock_rate: u32,
}

/// Sink role state
pub(crate) struct SinkState {
    negotiation: Negotiation,
    /// Requested but not yet offered
    queued: Vec<QueuedTrack>,
    /// Included in the outstanding offer
    negotiating: Vec<SinkTrack>,
    /// Negotiated and not bound to a pad
    negotiated: Vec<SinkTrack>,
    /// Pads linked before a matching track was negotiated
    awaiting_pads: Vec<(PadRef, PadOptions)>,
    bindings: HashMap<PadRef, Binding>,
}

impl SinkState {
    /// Initial tracks are negotiated silently
    pub(crate) fn new(initial_tracks: &[MediaKind]) -> Self {
        Self {
            negotiation: Negotiation::Idle,
            queued: initial_tracks
                .iter()
                .map(|&kind| QueuedTrack {
                    kind,
                    notify: false,
                })
                .collect(),
            negotiating: Vec::new(),
            negotiated: Vec::new(),
            awaiting_pads: Vec::new(),
            bindings: HashMap::new(),
        }
    }

    /// Send an offer for all queued tracks if nothing is outstanding
    async fn maybe_negotiate(&mut self, session: &mut Session) -> Result<()> {
        if self.negotiation == Negotiation::Offering
            || self.queued.is_empty()
            || !session.signaling_available()
        {
            return Ok(());
        }

        for queued in std::mem::take(&mut self.queued) {
            let id = session.adapter().add_track(queued.kind).await?;
            self.negotiating.push(SinkTrack {
                info: TrackInfo::new(id, queued.kind),
                notify: queued.notify,
            });
        }

        let offer = session.adapter().create_offer().await?;
        session.adapter().set_local_description(offer.clone()).await?;
        session.send_description(offer);
        session.mark_connecting();
        self.negotiation = Negotiation::Offering;

        info!("Sent offer covering {} new track(s)", self.negotiating.len());
        Ok(())
    }

    async fn on_answer(&mut self, answer: SessionDescription, session: &mut Session) -> Result<()> {
        let unexpected = session.adapter().set_remote_description(answer).await?;
        if !unexpected.is_empty() {
            warn!("Answer announced {} remote track(s), ignoring", unexpected.len());
        }
        session.remote_description_applied().await?;

        let batch = std::mem::take(&mut self.negotiating);
        let announced: Vec<TrackInfo> = batch
            .iter()
            .filter(|track| track.notify)
            .map(|track| track.info.clone())
            .collect();
        self.negotiated.extend(batch);
        self.negotiation = Negotiation::Idle;

        if !announced.is_empty() {
            session.notify(Notification::NewTracks(announced));
        }

        self.bind_awaiting_pads(session);
        self.maybe_negotiate(session).await
    }

    fn on_pad_added(&mut self, pad: PadRef, options: PadOptions, session: &Session) {
        if self.bindings.contains_key(&pad) || self.awaiting_pads.iter().any(|(p, _)| p == &pad) {
            warn!("Input pad {} already linked", pad);
            return;
        }

        match self.take_negotiated(&pad, &options) {
            Some(track) => self.bind(pad, track, session),
            None => {
                debug!("Input pad {} waiting for a negotiated track", pad);
                self.awaiting_pads.push((pad, options));
            }
        }
    }

    fn bind_awaiting_pads(&mut self, session: &Session) {
        let awaiting = std::mem::take(&mut self.awaiting_pads);
        for (pad, options) in awaiting {
            match self.take_negotiated(&pad, &options) {
                Some(track) => self.bind(pad, track, session),
                None => self.awaiting_pads.push((pad, options)),
            }
        }
    }

    /// Oldest negotiated, unbound track the pad accepts
    fn take_negotiated(&mut self, pad: &PadRef, options: &PadOptions) -> Option<TrackInfo> {
        let pos = self
            .negotiated
            .iter()
            .position(|track| options.matches(pad, &track.info))?;
        Some(self.negotiated.remove(pos).info)
    }

    fn bind(&mut self, pad: PadRef, track: TrackInfo, session: &Session) {
        let clock_rate = session.codec(track.kind).clock_rate;
        info!("Input pad {} bound to {} track {}", pad, track.kind, track.id);
        self.bindings.insert(
            pad,
            Binding {
                track_id: track.id,
                clock_rate,
            },
        );
    }

    async fn on_buffer(&mut self, pad: PadRef, buffer: Buffer, session: &mut Session) -> Result<()> {
        let Some(binding) = self.bindings.get(&pad) else {
            warn!("Dropping buffer on unbound input pad {}", pad);
            return Ok(());
        };

        let packet = match buffer_to_rtp(buffer, binding.clock_rate) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Dropping buffer on input pad {}: {}", pad, e);
                return Ok(());
            }
        };

        session.adapter().send_media(&binding.track_id, packet).await
    }

    fn release(&mut self, pad: &PadRef) {
        if let Some(binding) = self.bindings.remove(pad) {
            debug!("Input pad {} released track {}", pad, binding.track_id);
        }
        self.awaiting_pads.retain(|(p, _)| p != pad);
    }

    #[cfg(test)]
    pub(crate) fn negotiation(&self) -> Negotiation {
        self.negotiation
    }

    #[cfg(test)]
    pub(crate) fn bound_track(&self, pad: &PadRef) -> Option<&TrackId> {
        self.bindings.get(pad).map(|b| &b.track_id)
    }
}

#[async_trait]
impl Role for SinkState {
    type Input = SinkInput;

    const NAME: &'static str = "sink";

    async fn on_input(&mut self, input: SinkInput, session: &mut Session) -> Result<()> {
        match input {
            SinkInput::AddTracks(kinds) => {
                debug!("Queueing {} track(s) for negotiation", kinds.len());
                self.queued
                    .extend(kinds.into_iter().map(|kind| QueuedTrack { kind, notify: true }));
                self.maybe_negotiate(session).await
            }
            SinkInput::PadAdded { pad, options } => {
                self.on_pad_added(pad, options, session);
                Ok(())
            }
            SinkInput::Buffer { pad, buffer } => self.on_buffer(pad, buffer, session).await,
            SinkInput::EndOfStream { pad } | SinkInput::PadRemoved { pad } => {
                self.release(&pad);
                Ok(())
            }
        }
    }

    async fn on_signaling_available(&mut self, session: &mut Session) -> Result<()> {
        self.maybe_negotiate(session).await
    }

    async fn on_description(
        &mut self,
        desc: SessionDescription,
        session: &mut Session,
    ) -> Result<()> {
        match (desc.sdp_type, self.negotiation) {
            (SdpType::Answer, Negotiation::Offering) => self.on_answer(desc, session).await,
            (SdpType::Answer, Negotiation::Idle) => Err(Error::ProtocolViolation(
                "answer received with no outstanding offer".to_string(),
            )),
            (SdpType::Offer, _) => Err(Error::ProtocolViolation(
                "sink does not accept offers".to_string(),
            )),
        }
    }

    async fn on_remote_tracks(
        &mut self,
        tracks: Vec<TrackInfo>,
        _session: &mut Session,
    ) -> Result<()> {
        debug!("Sink ignoring {} remote track(s)", tracks.len());
        Ok(())
    }

    fn on_rtp(&mut self, track_id: TrackId, _packet: Packet, _session: &mut Session) {
        trace!("Sink ignoring RTP on remote track {}", track_id);
    }

    fn take_open_outputs(&mut self) -> Vec<PadRef> {
        Vec::new()
    }
}

/// Entry point for sink endpoints
pub struct SinkEndpoint;

impl SinkEndpoint {
    /// Start a sink backed by a webrtc-rs engine
    ///
    /// The configured tracks are offered as soon as signaling is available.
    #[instrument(skip(config, signaling))]
    pub async fn start(
        config: EndpointConfig,
        signaling: SignalingSource,
    ) -> Result<(SinkHandle, PipelineActions)> {
        config.validate()?;
        let (adapter, engine_events) = PeerConnectionAdapter::start(&config).await?;
        Self::start_with_adapter(config, signaling, adapter, engine_events).await
    }

    /// Start a sink on an already running engine
    pub async fn start_with_adapter(
        config: EndpointConfig,
        signaling: SignalingSource,
        adapter: PeerConnectionAdapter,
        engine_events: EngineEvents,
    ) -> Result<(SinkHandle, PipelineActions)> {
        config.validate()?;
        let role = SinkState::new(&config.tracks);
        let launched = launch(role, config, signaling, adapter, engine_events).await?;

        Ok((
            SinkHandle {
                events: launched.events,
                signaling_addr: launched.signaling_addr,
            },
            launched.actions,
        ))
    }
}

/// Host-side handle to a running sink
///
/// Every call only enqueues; results show up as actions. Calls fail with
/// [`Error::EndpointClosed`] once the endpoint has shut down.
#[derive(Debug, Clone)]
pub struct SinkHandle {
    events: mpsc::UnboundedSender<Event<SinkInput>>,
    signaling_addr: Option<SocketAddr>,
}

impl SinkHandle {
    /// Negotiate additional outgoing tracks
    pub fn add_tracks(&self, kinds: Vec<MediaKind>) -> Result<()> {
        self.send(SinkInput::AddTracks(kinds))
    }

    /// Link an input pad
    pub fn add_pad(&self, pad: PadRef, options: PadOptions) -> Result<()> {
        self.send(SinkInput::PadAdded { pad, options })
    }

    /// Push a buffer on an input pad
    pub fn buffer(&self, pad: PadRef, buffer: Buffer) -> Result<()> {
        self.send(SinkInput::Buffer { pad, buffer })
    }

    /// Signal end of stream on an input pad
    pub fn end_of_stream(&self, pad: PadRef) -> Result<()> {
        self.send(SinkInput::EndOfStream { pad })
    }

    /// Unlink an input pad
    pub fn remove_pad(&self, pad: PadRef) -> Result<()> {
        self.send(SinkInput::PadRemoved { pad })
    }

    /// Shut the endpoint down
    pub fn close(&self) -> Result<()> {
        dispatch(&self.events, Event::Shutdown)
    }

    /// Address of the WebSocket signaling server, if one was started
    pub fn signaling_addr(&self) -> Option<SocketAddr> {
        self.signaling_addr
    }

    fn send(&self, input: SinkInput) -> Result<()> {
        dispatch(&self.events, Event::Input(input))
    }
}
