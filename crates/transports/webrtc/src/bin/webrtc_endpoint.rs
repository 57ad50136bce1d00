//! WebRTC endpoint binary
//!
//! Runs a single source or sink endpoint against one remote peer and logs the
//! pipeline actions it produces.
//!
//! # Usage
//!
//! ```bash
//! # Receive media from a browser that connects to ws://<host>:8829
//! cargo run --bin webrtc_endpoint -- --role source --listen 0.0.0.0:8829
//!
//! # Send Opus silence to a peer reachable through a signaling server
//! cargo run --bin webrtc_endpoint -- --role sink --connect ws://localhost:8829 --tracks audio
//!
//! # Use H.264 and a JSON configuration file
//! cargo run --bin webrtc_endpoint -- --role source --video-codec h264 --config endpoint.json
//! ```

use clap::Parser;
use pipeline_webrtc::{
    signaling, Buffer, CodecParams, EndpointConfig, MediaKind, Notification, PadOptions, PadRef,
    PipelineAction, PipelineActions, SignalingSource, SinkEndpoint, SinkHandle, SourceEndpoint,
    TrackInfo,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Opus frame duration used by the silence generator
const OPUS_FRAME: Duration = Duration::from_millis(20);

/// A single Opus SILK frame that decodes to silence
const OPUS_SILENCE: [u8; 3] = [0xf8, 0xff, 0xfe];

/// WebRTC pipeline endpoint
///
/// Bridges one remote WebRTC peer. A source logs what the peer sends; a sink
/// negotiates tracks and streams Opus silence on its audio tracks.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Endpoint role
    #[arg(short, long, default_value = "source", env = "WEBRTC_ROLE")]
    role: RoleArg,

    /// Start a WebSocket signaling server on this address
    #[arg(long, default_value = "0.0.0.0:8829", env = "WEBRTC_LISTEN")]
    listen: SocketAddr,

    /// Connect to a WebSocket signaling server instead of listening
    #[arg(long, env = "WEBRTC_SIGNALING_URL")]
    connect: Option<String>,

    /// JSON configuration file (command line flags override it)
    #[arg(long, env = "WEBRTC_CONFIG")]
    config: Option<PathBuf>,

    /// STUN servers (comma-separated)
    #[arg(long, value_delimiter = ',', env = "WEBRTC_STUN_SERVERS")]
    stun_servers: Vec<String>,

    /// Video codec: vp8, h264
    #[arg(long, env = "WEBRTC_VIDEO_CODEC")]
    video_codec: Option<VideoCodecArg>,

    /// Tracks a sink negotiates (comma-separated: audio, video)
    #[arg(long, value_delimiter = ',', default_value = "audio,video")]
    tracks: Vec<TrackArg>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum RoleArg {
    /// Receive media from the peer
    Source,
    /// Send media to the peer
    Sink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum VideoCodecArg {
    Vp8,
    H264,
}

impl From<VideoCodecArg> for CodecParams {
    fn from(arg: VideoCodecArg) -> Self {
        match arg {
            VideoCodecArg::Vp8 => CodecParams::vp8(),
            VideoCodecArg::H264 => CodecParams::h264(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum TrackArg {
    Audio,
    Video,
}

impl From<TrackArg> for MediaKind {
    fn from(arg: TrackArg) -> Self {
        match arg {
            TrackArg::Audio => MediaKind::Audio,
            TrackArg::Video => MediaKind::Video,
        }
    }
}

fn build_config(args: &Args) -> anyhow::Result<EndpointConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            EndpointConfig::from_file(path)?
        }
        None => EndpointConfig::default(),
    };

    if !args.stun_servers.is_empty() {
        config.stun_servers = args.stun_servers.clone();
    }
    if let Some(codec) = args.video_codec {
        config = config.with_video_codec(codec.into());
    }
    config.validate()?;

    Ok(config)
}

async fn signaling_source(args: &Args) -> anyhow::Result<SignalingSource> {
    match &args.connect {
        Some(url) => Ok(SignalingSource::Channel(
            signaling::websocket::connect(url).await?,
        )),
        None => Ok(SignalingSource::WebSocket {
            bind_addr: args.listen,
        }),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,webrtc=warn")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!("Starting WebRTC {:?} endpoint", args.role);

    let config = build_config(&args)?;
    let signaling = signaling_source(&args).await?;

    match args.role {
        RoleArg::Source => {
            let (source, actions) = SourceEndpoint::start(config, signaling).await?;
            if let Some(addr) = source.signaling_addr() {
                info!("Waiting for a signaling peer on ws://{}", addr);
            }

            let linker = source.clone();
            let on_tracks = move |tracks: Vec<TrackInfo>| {
                for track in tracks {
                    // Pads named after the track bind to exactly that track
                    let pad = PadRef::new(track.id.as_str());
                    if let Err(e) = linker.add_pad(pad, PadOptions::default()) {
                        warn!("Failed to add output pad for track {}: {}", track.id, e);
                    }
                }
            };
            tokio::select! {
                _ = drive(actions, on_tracks) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received, shutting down");
                    let _ = source.close();
                }
            }
        }
        RoleArg::Sink => {
            let kinds: Vec<MediaKind> = args.tracks.iter().map(|&t| t.into()).collect();
            // Tracks requested at runtime are announced, so pads can follow them
            let (sink, actions) = SinkEndpoint::start(config.with_tracks(vec![]), signaling).await?;
            if let Some(addr) = sink.signaling_addr() {
                info!("Waiting for a signaling peer on ws://{}", addr);
            }
            sink.add_tracks(kinds)?;

            let feeder = sink.clone();
            let on_tracks = move |tracks: Vec<TrackInfo>| {
                for track in tracks {
                    spawn_feeder(feeder.clone(), track);
                }
            };
            tokio::select! {
                _ = drive(actions, on_tracks) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received, shutting down");
                    let _ = sink.close();
                }
            }
        }
    }

    Ok(())
}

/// Log actions until the endpoint terminates
async fn drive<F>(mut actions: PipelineActions, on_tracks: F)
where
    F: Fn(Vec<TrackInfo>),
{
    let mut buffers: HashMap<PadRef, u64> = HashMap::new();

    while let Some(action) = actions.recv().await {
        match action {
            PipelineAction::Notify(Notification::Ready) => info!("Signaling peer connected"),
            PipelineAction::Notify(Notification::Connected) => info!("Peer connection established"),
            PipelineAction::Notify(Notification::NewTracks(tracks)) => {
                for track in &tracks {
                    info!("New {} track {}", track.kind, track.id);
                }
                on_tracks(tracks);
            }
            PipelineAction::StreamFormat { pad, format } => {
                info!(
                    "Pad {} carries {} ({} Hz)",
                    pad, format.codec.mime_type, format.codec.clock_rate
                );
            }
            PipelineAction::Buffer { pad, buffer } => {
                let count = buffers.entry(pad.clone()).or_default();
                *count += 1;
                if *count % 500 == 0 {
                    info!(
                        "Pad {}: {} buffers received (last {} bytes)",
                        pad,
                        count,
                        buffer.payload.len()
                    );
                }
            }
            PipelineAction::EndOfStream { pad } => info!("End of stream on pad {}", pad),
            PipelineAction::Terminate(reason) => {
                error!("Endpoint terminated: {}", reason);
                break;
            }
        }
    }
}

/// Bind an input pad to a negotiated track and stream silence on audio
fn spawn_feeder(sink: SinkHandle, track: TrackInfo) {
    let pad = PadRef::new(track.id.as_str());
    if let Err(e) = sink.add_pad(pad.clone(), PadOptions::default()) {
        warn!("Failed to add input pad for track {}: {}", track.id, e);
        return;
    }
    if track.kind != MediaKind::Audio {
        info!("No generator for {} track {}, pad stays idle", track.kind, track.id);
        return;
    }

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(OPUS_FRAME);
        let mut pts = Duration::ZERO;
        loop {
            ticker.tick().await;
            let buffer = Buffer::new(OPUS_SILENCE.to_vec(), pts);
            if sink.buffer(pad.clone(), buffer).is_err() {
                break;
            }
            pts += OPUS_FRAME;
        }
    });
}
