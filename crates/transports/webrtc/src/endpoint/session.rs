//! Context shared by both endpoint roles

use super::{ConnectionStatus, Notification, PipelineAction};
use crate::config::{CodecParams, EndpointConfig};
use crate::media::MediaKind;
use crate::peer::PeerConnectionAdapter;
use crate::signaling::websocket::WebSocketServerHandle;
use crate::signaling::{
    IceCandidate, SessionDescription, SignalingChannel, SignalingEvent, SignalingMessage,
    SignalingSender,
};
use crate::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

pub(crate) type SignalingForward = Arc<dyn Fn(SignalingEvent) -> bool + Send + Sync>;

/// Everything an endpoint owns apart from its role-specific state
pub(crate) struct Session {
    status: ConnectionStatus,
    adapter: PeerConnectionAdapter,
    config: Arc<EndpointConfig>,
    signaling: Option<SignalingSender>,
    signaling_forward: SignalingForward,
    signaling_server: Option<WebSocketServerHandle>,
    /// Local candidates gathered before signaling was available
    pending_local_candidates: Vec<IceCandidate>,
    /// Remote candidates received before any remote description
    pending_remote_candidates: Vec<IceCandidate>,
    remote_description_applied: bool,
    actions: mpsc::UnboundedSender<PipelineAction>,
}

impl Session {
    pub(crate) fn new(
        adapter: PeerConnectionAdapter,
        config: Arc<EndpointConfig>,
        signaling_forward: SignalingForward,
        actions: mpsc::UnboundedSender<PipelineAction>,
    ) -> Self {
        Self {
            status: ConnectionStatus::Init,
            adapter,
            config,
            signaling: None,
            signaling_forward,
            signaling_server: None,
            pending_local_candidates: Vec::new(),
            pending_remote_candidates: Vec::new(),
            remote_description_applied: false,
            actions,
        }
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub(crate) fn adapter(&self) -> &PeerConnectionAdapter {
        &self.adapter
    }

    pub(crate) fn codec(&self, kind: MediaKind) -> &CodecParams {
        self.config.codec(kind)
    }

    pub(crate) fn signaling_available(&self) -> bool {
        self.signaling.is_some()
    }

    pub(crate) fn set_signaling_server(&mut self, server: WebSocketServerHandle) {
        self.signaling_server = Some(server);
    }

    /// Hand an action to the pipeline host
    pub(crate) fn emit(&self, action: PipelineAction) {
        if self.actions.send(action).is_err() {
            trace!("Pipeline action receiver dropped");
        }
    }

    pub(crate) fn notify(&self, notification: Notification) {
        self.emit(PipelineAction::Notify(notification));
    }

    /// Bind the signaling channel. Returns `false` if one is already bound.
    pub(crate) fn attach_signaling(&mut self, channel: SignalingChannel) -> bool {
        if self.signaling.is_some() {
            warn!("Signaling channel already registered, ignoring another one");
            return false;
        }

        let forward = Arc::clone(&self.signaling_forward);
        let sender = channel.register(move |event| forward(event));

        let queued = std::mem::take(&mut self.pending_local_candidates);
        if !queued.is_empty() {
            debug!("Flushing {} queued local ICE candidate(s)", queued.len());
        }
        for candidate in queued {
            send_or_log(&sender, SignalingMessage::IceCandidate(candidate));
        }

        self.signaling = Some(sender);
        info!("Signaling channel registered");
        self.notify(Notification::Ready);
        true
    }

    /// Send a local session description to the remote peer
    pub(crate) fn send_description(&self, desc: SessionDescription) {
        match &self.signaling {
            Some(sender) => send_or_log(sender, SignalingMessage::SessionDescription(desc)),
            None => warn!("No signaling channel, dropping local {:?}", desc.sdp_type),
        }
    }

    pub(crate) fn on_local_candidate(&mut self, candidate: IceCandidate) {
        match &self.signaling {
            Some(sender) => send_or_log(sender, SignalingMessage::IceCandidate(candidate)),
            None => self.pending_local_candidates.push(candidate),
        }
    }

    pub(crate) async fn on_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        if self.remote_description_applied {
            self.adapter.add_ice_candidate(candidate).await
        } else {
            debug!("Holding remote ICE candidate until a remote description is set");
            self.pending_remote_candidates.push(candidate);
            Ok(())
        }
    }

    /// Record that a remote description is in place and apply held candidates
    pub(crate) async fn remote_description_applied(&mut self) -> Result<()> {
        self.remote_description_applied = true;
        for candidate in std::mem::take(&mut self.pending_remote_candidates) {
            self.adapter.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }

    pub(crate) fn mark_connecting(&mut self) {
        if self.status == ConnectionStatus::Init {
            self.status = ConnectionStatus::Connecting;
        }
    }

    pub(crate) fn mark_connected(&mut self) {
        if matches!(
            self.status,
            ConnectionStatus::Init | ConnectionStatus::Connecting
        ) {
            self.status = ConnectionStatus::Connected;
            info!("Peer connection established");
            self.notify(Notification::Connected);
        }
    }

    /// Release signaling and the engine. Actions must already be emitted.
    pub(crate) async fn shut_down(&mut self) {
        self.status = ConnectionStatus::Closed;
        self.signaling = None;
        self.signaling_server = None;
        if let Err(e) = self.adapter.close().await {
            warn!("Error closing peer connection engine: {}", e);
        }
    }
}

fn send_or_log(sender: &SignalingSender, msg: SignalingMessage) {
    if let Err(e) = sender.send(msg) {
        debug!("Dropping outgoing signaling message: {}", e);
    }
}
