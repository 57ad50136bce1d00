//! Source endpoint: RTP in, pipeline buffers out
//!
//! The source is always the answerer. Remote tracks become known from the
//! offer (or later engine events), are announced to the parent in one batch,
//! and stay pending with a packet queue until an output pad binds to them. The
//! answer goes out only once every known track has a pad.

use super::{
    dispatch, launch, Event, Notification, PipelineAction, PipelineActions, Role, Session,
};
use crate::config::EndpointConfig;
use crate::media::dispatcher::rtp_to_buffer;
use crate::media::{PacketQueue, PadOptions, PadRef, RtpStreamFormat, TrackId, TrackInfo};
use crate::peer::{EngineEvents, PeerConnectionAdapter};
use crate::signaling::{SdpType, SessionDescription, SignalingSource};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, trace, warn};
use webrtc::rtp::packet::Packet;

/// Host request accepted by a source
#[derive(Debug)]
pub enum SourceInput {
    /// An output pad was linked
    PadAdded {
        /// Pad name
        pad: PadRef,
        /// Link options
        options: PadOptions,
    },
    /// An output pad was unlinked
    PadRemoved {
        /// Pad name
        pad: PadRef,
    },
}

#[derive(Debug)]
enum Route {
    /// No pad yet; packets are held in arrival order
    Pending(PacketQueue),
    Connected(PadRef),
}

#[derive(Debug)]
struct RoutedTrack {
    info: TrackInfo,
    route: Route,
}

/// Source role state
#[derive(Default)]
pub(crate) struct SourceState {
    /// Known remote tracks in announcement order
    tracks: Vec<RoutedTrack>,
    /// Output pads linked before a matching track was known
    awaiting_outputs: Vec<(PadRef, PadOptions)>,
    /// Tracks whose pad was removed; their packets are dropped
    released: HashSet<TrackId>,
    /// A remote offer has been applied and not answered yet
    offer_pending: bool,
}

impl SourceState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn is_known(&self, id: &TrackId) -> bool {
        self.released.contains(id) || self.tracks.iter().any(|t| &t.info.id == id)
    }

    /// Register tracks not seen before and announce them in one notification
    fn register_tracks(&mut self, tracks: Vec<TrackInfo>, session: &mut Session) {
        let mut announced = Vec::new();
        let mut bound = Vec::new();

        for info in tracks {
            if self.is_known(&info.id) {
                trace!("Remote track {} already known", info.id);
                continue;
            }
            info!("New remote {} track {}", info.kind, info.id);
            announced.push(info.clone());

            let waiting = self
                .awaiting_outputs
                .iter()
                .position(|(pad, options)| options.matches(pad, &info));
            let route = match waiting {
                Some(pos) => {
                    let (pad, _) = self.awaiting_outputs.remove(pos);
                    bound.push((pad.clone(), info.clone()));
                    Route::Connected(pad)
                }
                None => Route::Pending(PacketQueue::new(info.id.clone())),
            };
            self.tracks.push(RoutedTrack { info, route });
        }

        if !announced.is_empty() {
            session.notify(Notification::NewTracks(announced));
        }
        for (pad, info) in bound {
            announce_format(&pad, &info, session);
        }
    }

    fn on_pad_added(&mut self, pad: PadRef, options: PadOptions, session: &mut Session) {
        let linked = self
            .tracks
            .iter()
            .any(|t| matches!(&t.route, Route::Connected(p) if p == &pad))
            || self.awaiting_outputs.iter().any(|(p, _)| p == &pad);
        if linked {
            warn!("Output pad {} already linked", pad);
            return;
        }

        let pending = self.tracks.iter().position(|t| {
            matches!(t.route, Route::Pending(_)) && options.matches(&pad, &t.info)
        });
        let Some(pos) = pending else {
            debug!("Output pad {} waiting for a matching remote track", pad);
            self.awaiting_outputs.push((pad, options));
            return;
        };

        let track = &mut self.tracks[pos];
        let route = std::mem::replace(&mut track.route, Route::Connected(pad.clone()));
        announce_format(&pad, &track.info, session);

        if let Route::Pending(queue) = route {
            if !queue.is_empty() {
                debug!("Flushing {} queued buffer(s) to pad {}", queue.len(), pad);
            }
            for buffer in queue.drain() {
                session.emit(PipelineAction::Buffer {
                    pad: pad.clone(),
                    buffer,
                });
            }
        }
    }

    fn on_pad_removed(&mut self, pad: &PadRef) {
        self.awaiting_outputs.retain(|(p, _)| p != pad);

        let bound = self
            .tracks
            .iter()
            .position(|t| matches!(&t.route, Route::Connected(p) if p == pad));
        if let Some(pos) = bound {
            let track = self.tracks.remove(pos);
            info!("Output pad {} removed, dropping track {}", pad, track.info.id);
            self.released.insert(track.info.id);
        }
    }

    async fn on_offer(&mut self, offer: SessionDescription, session: &mut Session) -> Result<()> {
        if self.offer_pending {
            return Err(Error::ProtocolViolation(
                "offer received while a previous offer is unanswered".to_string(),
            ));
        }

        let tracks = session.adapter().set_remote_description(offer).await?;
        session.remote_description_applied().await?;
        self.offer_pending = true;

        self.register_tracks(tracks, session);
        self.maybe_answer(session).await
    }

    /// Answer the pending offer once every known track has an output pad
    async fn maybe_answer(&mut self, session: &mut Session) -> Result<()> {
        if !self.offer_pending || !session.signaling_available() {
            return Ok(());
        }

        let unbound = self
            .tracks
            .iter()
            .filter(|t| matches!(t.route, Route::Pending(_)))
            .count();
        if unbound > 0 {
            debug!("Answer deferred, {} track(s) without an output pad", unbound);
            return Ok(());
        }

        let answer = session.adapter().create_answer().await?;
        session.adapter().set_local_description(answer.clone()).await?;
        session.send_description(answer);
        session.mark_connecting();
        self.offer_pending = false;

        info!("Sent answer for {} track(s)", self.tracks.len());
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn queued_len(&self, id: &TrackId) -> Option<usize> {
        self.tracks.iter().find(|t| &t.info.id == id).and_then(|t| match &t.route {
            Route::Pending(queue) => Some(queue.len()),
            Route::Connected(_) => None,
        })
    }
}

fn announce_format(pad: &PadRef, info: &TrackInfo, session: &Session) {
    info!("Output pad {} bound to {} track {}", pad, info.kind, info.id);
    session.emit(PipelineAction::StreamFormat {
        pad: pad.clone(),
        format: RtpStreamFormat {
            kind: info.kind,
            codec: session.codec(info.kind).clone(),
        },
    });
}

#[async_trait]
impl Role for SourceState {
    type Input = SourceInput;

    const NAME: &'static str = "source";

    async fn on_input(&mut self, input: SourceInput, session: &mut Session) -> Result<()> {
        match input {
            SourceInput::PadAdded { pad, options } => {
                self.on_pad_added(pad, options, session);
                self.maybe_answer(session).await
            }
            SourceInput::PadRemoved { pad } => {
                self.on_pad_removed(&pad);
                self.maybe_answer(session).await
            }
        }
    }

    async fn on_signaling_available(&mut self, session: &mut Session) -> Result<()> {
        self.maybe_answer(session).await
    }

    async fn on_description(
        &mut self,
        desc: SessionDescription,
        session: &mut Session,
    ) -> Result<()> {
        match desc.sdp_type {
            SdpType::Offer => self.on_offer(desc, session).await,
            SdpType::Answer => Err(Error::ProtocolViolation(
                "source does not send offers, cannot accept an answer".to_string(),
            )),
        }
    }

    async fn on_remote_tracks(
        &mut self,
        tracks: Vec<TrackInfo>,
        session: &mut Session,
    ) -> Result<()> {
        self.register_tracks(tracks, session);
        self.maybe_answer(session).await
    }

    fn on_rtp(&mut self, track_id: TrackId, packet: Packet, session: &mut Session) {
        let Some(track) = self.tracks.iter_mut().find(|t| t.info.id == track_id) else {
            trace!("Dropping RTP for unrouted track {}", track_id);
            return;
        };

        let buffer = rtp_to_buffer(packet);
        match &mut track.route {
            Route::Connected(pad) => session.emit(PipelineAction::Buffer {
                pad: pad.clone(),
                buffer,
            }),
            Route::Pending(queue) => queue.push(buffer),
        }
    }

    fn take_open_outputs(&mut self) -> Vec<PadRef> {
        self.tracks
            .drain(..)
            .filter_map(|t| match t.route {
                Route::Connected(pad) => Some(pad),
                Route::Pending(_) => None,
            })
            .collect()
    }
}

/// Entry point for source endpoints
pub struct SourceEndpoint;

impl SourceEndpoint {
    /// Start a source backed by a webrtc-rs engine
    #[instrument(skip(config, signaling))]
    pub async fn start(
        config: EndpointConfig,
        signaling: SignalingSource,
    ) -> Result<(SourceHandle, PipelineActions)> {
        config.validate()?;
        let (adapter, engine_events) = PeerConnectionAdapter::start(&config).await?;
        Self::start_with_adapter(config, signaling, adapter, engine_events).await
    }

    /// Start a source on an already running engine
    pub async fn start_with_adapter(
        config: EndpointConfig,
        signaling: SignalingSource,
        adapter: PeerConnectionAdapter,
        engine_events: EngineEvents,
    ) -> Result<(SourceHandle, PipelineActions)> {
        config.validate()?;
        let launched = launch(SourceState::new(), config, signaling, adapter, engine_events).await?;

        Ok((
            SourceHandle {
                events: launched.events,
                signaling_addr: launched.signaling_addr,
            },
            launched.actions,
        ))
    }
}

/// Host-side handle to a running source
#[derive(Debug, Clone)]
pub struct SourceHandle {
    events: mpsc::UnboundedSender<Event<SourceInput>>,
    signaling_addr: Option<SocketAddr>,
}

impl SourceHandle {
    /// Link an output pad
    pub fn add_pad(&self, pad: PadRef, options: PadOptions) -> Result<()> {
        dispatch(&self.events, Event::Input(SourceInput::PadAdded { pad, options }))
    }

    /// Unlink an output pad
    pub fn remove_pad(&self, pad: PadRef) -> Result<()> {
        dispatch(&self.events, Event::Input(SourceInput::PadRemoved { pad }))
    }

    /// Shut the endpoint down
    pub fn close(&self) -> Result<()> {
        dispatch(&self.events, Event::Shutdown)
    }

    /// Address of the WebSocket signaling server, if one was started
    pub fn signaling_addr(&self) -> Option<SocketAddr> {
        self.signaling_addr
    }
}
