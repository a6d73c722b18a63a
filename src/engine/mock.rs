//! In-process engine with a fixed element catalogue
//!
//! Graphs built here never touch media. Setting one to PLAYING starts a small
//! simulation thread that posts the state changes, end-of-stream and errors a
//! real pipeline of the same shape would post.

use super::tools::EngineError;
use super::{
    assemble, BusMessage, ConstructionError, ElementFactory, Engine, EngineState, Graph, GraphLink, GraphNode,
    PadDirection, PadPresence, PadTemplate, StateChange, StateSnapshot,
};
use crate::caps;
use crate::pipeline::description::PipelineDescription;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

use PadDirection::{Sink, Src};
use PadPresence::{Always, Request, Sometimes};

type TemplateSpec = (&'static str, PadDirection, PadPresence, &'static str);

struct MockElement {
    name: &'static str,
    long_name: &'static str,
    klass: &'static str,
    plugin: &'static str,
    properties: &'static [&'static [&'static str]],
    templates: &'static [TemplateSpec],
}

const OBJECT: &[&str] = &["name", "parent"];
const BIN: &[&str] = &["async-handling", "message-forward"];
const BASE_SRC: &[&str] = &["blocksize", "num-buffers", "typefind", "do-timestamp", "automatic-eos"];
const BASE_SINK: &[&str] = &[
    "sync", "max-lateness", "qos", "async", "ts-offset", "enable-last-sample", "last-sample", "blocksize",
    "render-delay", "throttle-time", "max-bitrate", "processing-deadline", "stats",
];
const BASE_TRANSFORM: &[&str] = &["qos"];
const ENCODER: &[&str] = &["perfect-timestamp", "hard-resync", "mark-granule", "tolerance"];

const RAW_VIDEO: &str = "video/x-raw, format=(string){ I420, YV12, NV12, RGB, BGR, RGBA, BGRA, GRAY8 }, \
     width=(int)[ 1, 2147483647 ], height=(int)[ 1, 2147483647 ], framerate=(fraction)[ 0/1, 2147483647/1 ]";
const RAW_AUDIO: &str = "audio/x-raw, format=(string){ S16LE, S32LE, F32LE, F64LE }, \
     layout=(string){ interleaved, non-interleaved }, rate=(int)[ 1, 2147483647 ], channels=(int)[ 1, 2147483647 ]";
const TEST_VIDEO: &str = "video/x-raw, format=(string){ I420, YV12, NV12, RGB, BGR, RGBA, BGRA }, \
     width=(int)[ 1, 2147483647 ], height=(int)[ 1, 2147483647 ], framerate=(fraction)[ 0/1, 2147483647/1 ]";
const TEST_AUDIO: &str = "audio/x-raw, format=(string){ S16LE, S32LE, F32LE, F64LE }, layout=(string)interleaved, \
     rate=(int)[ 1, 2147483647 ], channels=(int)[ 1, 2147483647 ]";
const H264: &str = "video/x-h264, stream-format=(string){ avc, byte-stream }, alignment=(string)au";

const CATALOGUE: &[MockElement] = &[
    MockElement {
        name: "fakesrc",
        long_name: "Fake Source",
        klass: "Source",
        plugin: "coreelements",
        properties: &[OBJECT, BASE_SRC, &["data", "datarate", "sizetype", "sizemin", "sizemax", "filltype", "silent", "signal-handoffs", "dump", "parentsize", "is-live", "format", "sync", "pattern"]],
        templates: &[("src", Src, Always, "ANY")],
    },
    MockElement {
        name: "fakesink",
        long_name: "Fake Sink",
        klass: "Sink",
        plugin: "coreelements",
        properties: &[OBJECT, BASE_SINK, &["state-error", "silent", "dump", "signal-handoffs", "drop-out-of-segment", "num-buffers"]],
        templates: &[("sink", Sink, Always, "ANY")],
    },
    MockElement {
        name: "filesrc",
        long_name: "File Source",
        klass: "Source/File",
        plugin: "coreelements",
        properties: &[OBJECT, BASE_SRC, &["location"]],
        templates: &[("src", Src, Always, "ANY")],
    },
    MockElement {
        name: "filesink",
        long_name: "File Sink",
        klass: "Sink/File",
        plugin: "coreelements",
        properties: &[OBJECT, BASE_SINK, &["location", "buffer-mode", "buffer-size", "append", "o-sync"]],
        templates: &[("sink", Sink, Always, "ANY")],
    },
    MockElement {
        name: "multifilesink",
        long_name: "Multi-File Sink",
        klass: "Sink/File",
        plugin: "multifile",
        properties: &[OBJECT, BASE_SINK, &["location", "index", "post-messages", "next-file", "max-files", "max-file-size", "max-file-duration", "aggregate-gops"]],
        templates: &[("sink", Sink, Always, "ANY")],
    },
    MockElement {
        name: "appsrc",
        long_name: "AppSrc",
        klass: "Generic/Source",
        plugin: "app",
        properties: &[OBJECT, BASE_SRC, &["caps", "size", "stream-type", "max-bytes", "max-buffers", "max-time", "format", "block", "is-live", "min-latency", "max-latency", "emit-signals", "leaky-type"]],
        templates: &[("src", Src, Always, "ANY")],
    },
    MockElement {
        name: "appsink",
        long_name: "AppSink",
        klass: "Generic/Sink",
        plugin: "app",
        properties: &[OBJECT, BASE_SINK, &["caps", "eos", "emit-signals", "max-buffers", "drop", "wait-on-eos", "buffer-list", "max-time", "max-bytes"]],
        templates: &[("sink", Sink, Always, "ANY")],
    },
    MockElement {
        name: "queue",
        long_name: "Queue",
        klass: "Generic",
        plugin: "coreelements",
        properties: &[OBJECT, &["current-level-buffers", "current-level-bytes", "current-level-time", "max-size-buffers", "max-size-bytes", "max-size-time", "min-threshold-buffers", "min-threshold-bytes", "min-threshold-time", "leaky", "silent", "flush-on-eos"]],
        templates: &[("sink", Sink, Always, "ANY"), ("src", Src, Always, "ANY")],
    },
    MockElement {
        name: "tee",
        long_name: "Tee pipe fitting",
        klass: "Generic",
        plugin: "coreelements",
        properties: &[OBJECT, &["num-src-pads", "has-chain", "silent", "last-message", "pull-mode", "alloc-pad", "allow-not-linked"]],
        templates: &[("sink", Sink, Always, "ANY"), ("src_%u", Src, Request, "ANY")],
    },
    MockElement {
        name: "identity",
        long_name: "Identity",
        klass: "Generic",
        plugin: "coreelements",
        properties: &[OBJECT, BASE_TRANSFORM, &["sleep-time", "error-after", "drop-probability", "datarate", "silent", "single-segment", "dump", "sync", "ts-offset", "signal-handoffs", "eos-after"]],
        templates: &[("sink", Sink, Always, "ANY"), ("src", Src, Always, "ANY")],
    },
    MockElement {
        name: "capsfilter",
        long_name: "CapsFilter",
        klass: "Generic",
        plugin: "coreelements",
        properties: &[OBJECT, BASE_TRANSFORM, &["caps", "caps-change-mode"]],
        templates: &[("sink", Sink, Always, "ANY"), ("src", Src, Always, "ANY")],
    },
    MockElement {
        name: "videotestsrc",
        long_name: "Video test source",
        klass: "Source/Video",
        plugin: "videotestsrc",
        properties: &[OBJECT, BASE_SRC, &["pattern", "timestamp-offset", "is-live", "foreground-color", "background-color", "horizontal-speed", "animation-mode", "motion", "flip"]],
        templates: &[("src", Src, Always, TEST_VIDEO)],
    },
    MockElement {
        name: "audiotestsrc",
        long_name: "Audio test source",
        klass: "Source/Audio",
        plugin: "audiotestsrc",
        properties: &[OBJECT, BASE_SRC, &["samplesperbuffer", "wave", "freq", "volume", "is-live", "timestamp-offset", "marker"]],
        templates: &[("src", Src, Always, TEST_AUDIO)],
    },
    MockElement {
        name: "videoconvert",
        long_name: "Colorspace converter",
        klass: "Filter/Converter/Video",
        plugin: "videoconvertscale",
        properties: &[OBJECT, BASE_TRANSFORM, &["dither", "dither-quantization", "chroma-resampler", "alpha-mode", "alpha-value", "chroma-mode", "matrix-mode", "gamma-mode", "primaries-mode", "n-threads"]],
        templates: &[("sink", Sink, Always, RAW_VIDEO), ("src", Src, Always, RAW_VIDEO)],
    },
    MockElement {
        name: "videoscale",
        long_name: "Video scaler",
        klass: "Filter/Converter/Video/Scaler",
        plugin: "videoconvertscale",
        properties: &[OBJECT, BASE_TRANSFORM, &["method", "add-borders", "sharpness", "sharpen", "dither", "envelope", "gamma-decode", "n-threads"]],
        templates: &[("sink", Sink, Always, RAW_VIDEO), ("src", Src, Always, RAW_VIDEO)],
    },
    MockElement {
        name: "videorate",
        long_name: "Video rate adjuster",
        klass: "Filter/Effect/Video",
        plugin: "videorate",
        properties: &[OBJECT, &["in", "out", "duplicate", "drop", "silent", "new-pref", "skip-to-first", "drop-only", "average-period", "max-rate", "rate"]],
        templates: &[("sink", Sink, Always, RAW_VIDEO), ("src", Src, Always, RAW_VIDEO)],
    },
    MockElement {
        name: "audioconvert",
        long_name: "Audio converter",
        klass: "Filter/Converter/Audio",
        plugin: "audioconvert",
        properties: &[OBJECT, BASE_TRANSFORM, &["dithering", "noise-shaping", "mix-matrix", "dithering-threshold"]],
        templates: &[("sink", Sink, Always, RAW_AUDIO), ("src", Src, Always, RAW_AUDIO)],
    },
    MockElement {
        name: "audioresample",
        long_name: "Audio resampler",
        klass: "Filter/Converter/Audio",
        plugin: "audioresample",
        properties: &[OBJECT, BASE_TRANSFORM, &["quality", "resample-method", "sinc-filter-mode", "sinc-filter-auto-threshold", "sinc-filter-interpolation"]],
        templates: &[("sink", Sink, Always, RAW_AUDIO), ("src", Src, Always, RAW_AUDIO)],
    },
    MockElement {
        name: "x264enc",
        long_name: "x264 H.264 Encoder",
        klass: "Codec/Encoder/Video",
        plugin: "x264",
        properties: &[OBJECT, &["threads", "pass", "quantizer", "byte-stream", "bitrate", "vbv-buf-capacity", "me", "subme", "ref", "bframes", "b-adapt", "key-int-max", "cabac", "qp-min", "qp-max", "rc-lookahead", "interlaced", "option-string", "speed-preset", "psy-tune", "tune", "insert-vui", "qos"]],
        templates: &[
            (
                "sink",
                Sink,
                Always,
                "video/x-raw, format=(string){ I420, YV12, NV12 }, framerate=(fraction)[ 0/1, 2147483647/1 ], \
                 width=(int)[ 16, 2147483647 ], height=(int)[ 16, 2147483647 ]",
            ),
            ("src", Src, Always, H264),
        ],
    },
    MockElement {
        name: "lamemp3enc",
        long_name: "L.A.M.E. mp3 encoder",
        klass: "Codec/Encoder/Audio",
        plugin: "lame",
        properties: &[OBJECT, ENCODER, &["target", "bitrate", "cbr", "quality", "encoding-engine-quality", "mono"]],
        templates: &[
            (
                "sink",
                Sink,
                Always,
                "audio/x-raw, format=(string)S16LE, layout=(string)interleaved, \
                 rate=(int){ 8000, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000 }, channels=(int)[ 1, 2 ]",
            ),
            ("src", Src, Always, "audio/mpeg, mpegversion=(int)1, layer=(int)3, channels=(int)[ 1, 2 ]"),
        ],
    },
    MockElement {
        name: "vorbisenc",
        long_name: "Vorbis audio encoder",
        klass: "Codec/Encoder/Audio",
        plugin: "vorbis",
        properties: &[OBJECT, ENCODER, &["max-bitrate", "bitrate", "min-bitrate", "quality", "managed", "last-message"]],
        templates: &[
            (
                "sink",
                Sink,
                Always,
                "audio/x-raw, format=(string)F32LE, layout=(string)interleaved, rate=(int)[ 1, 200000 ], channels=(int)[ 1, 255 ]",
            ),
            ("src", Src, Always, "audio/x-vorbis"),
        ],
    },
    MockElement {
        name: "jpegenc",
        long_name: "JPEG image encoder",
        klass: "Codec/Encoder/Image",
        plugin: "jpeg",
        properties: &[OBJECT, &["qos", "quality", "smoothing", "idct-method", "snapshot"]],
        templates: &[
            ("sink", Sink, Always, "video/x-raw, format=(string){ I420, YV12, NV12, RGB, BGR, GRAY8 }"),
            ("src", Src, Always, "image/jpeg"),
        ],
    },
    MockElement {
        name: "pngenc",
        long_name: "PNG image encoder",
        klass: "Codec/Encoder/Image",
        plugin: "png",
        properties: &[OBJECT, &["qos", "snapshot", "compression-level"]],
        templates: &[
            ("sink", Sink, Always, "video/x-raw, format=(string){ RGBA, RGB, GRAY8 }"),
            ("src", Src, Always, "image/png"),
        ],
    },
    MockElement {
        name: "wavenc",
        long_name: "WAV audio muxer",
        klass: "Codec/Muxer/Audio",
        plugin: "wavenc",
        properties: &[OBJECT],
        templates: &[
            ("sink", Sink, Always, "audio/x-raw, format=(string){ S16LE, S32LE, F32LE }, layout=(string)interleaved"),
            ("src", Src, Always, "audio/x-wav"),
        ],
    },
    MockElement {
        name: "h264parse",
        long_name: "H.264 parser",
        klass: "Codec/Parser/Converter/Video",
        plugin: "videoparsersbad",
        properties: &[OBJECT, &["disable-passthrough", "config-interval", "update-timecode"]],
        templates: &[
            ("sink", Sink, Always, "video/x-h264"),
            ("src", Src, Always, "video/x-h264, parsed=(boolean)true, stream-format=(string){ avc, byte-stream }, alignment=(string){ au, nal }"),
        ],
    },
    MockElement {
        name: "avdec_h264",
        long_name: "libav H.264 decoder",
        klass: "Codec/Decoder/Video",
        plugin: "libav",
        properties: &[OBJECT, &["lowres", "skip-frame", "direct-rendering", "debug-mv", "max-threads", "output-corrupt", "thread-type", "std-compliance"]],
        templates: &[
            ("sink", Sink, Always, "video/x-h264, alignment=(string)au, stream-format=(string){ avc, byte-stream }"),
            ("src", Src, Always, "video/x-raw, format=(string){ I420, NV12, GRAY8 }"),
        ],
    },
    MockElement {
        name: "decodebin",
        long_name: "Decoder Bin",
        klass: "Generic/Bin/Decoder",
        plugin: "playback",
        properties: &[OBJECT, BIN, &["caps", "subtitle-encoding", "sink-caps", "expose-all-streams", "connection-speed", "max-size-bytes", "max-size-buffers", "max-size-time", "post-stream-topology", "use-buffering"]],
        templates: &[("sink", Sink, Always, "ANY"), ("src_%u", Src, Sometimes, "ANY")],
    },
    MockElement {
        name: "qtdemux",
        long_name: "QuickTime demuxer",
        klass: "Codec/Demuxer",
        plugin: "isomp4",
        properties: &[OBJECT],
        templates: &[
            ("sink", Sink, Always, "video/quicktime; audio/x-m4a; application/x-3gp"),
            ("video_%u", Src, Sometimes, "ANY"),
            ("audio_%u", Src, Sometimes, "ANY"),
        ],
    },
    MockElement {
        name: "mp4mux",
        long_name: "MP4 Muxer",
        klass: "Codec/Muxer",
        plugin: "isomp4",
        properties: &[OBJECT, &["movie-timescale", "trak-timescale", "faststart", "faststart-file", "fragment-duration", "streamable", "reserved-max-duration", "interleave-bytes", "interleave-time", "latency", "start-time"]],
        templates: &[
            ("video_%u", Sink, Request, "video/x-h264, stream-format=(string)avc, alignment=(string)au"),
            ("audio_%u", Sink, Request, "audio/mpeg, mpegversion=(int)1, layer=(int)3; audio/mpeg, mpegversion=(int)4"),
            ("src", Src, Always, "video/quicktime, variant=(string)iso"),
        ],
    },
    MockElement {
        name: "oggmux",
        long_name: "Ogg muxer",
        klass: "Codec/Muxer",
        plugin: "ogg",
        properties: &[OBJECT, &["max-delay", "max-page-delay", "max-tolerance", "skeleton", "latency", "start-time"]],
        templates: &[
            ("sink_%u", Sink, Request, "audio/x-vorbis; video/x-theora"),
            ("src", Src, Always, "application/ogg"),
        ],
    },
    MockElement {
        name: "autovideosink",
        long_name: "Auto video sink",
        klass: "Sink/Video",
        plugin: "autodetect",
        properties: &[OBJECT, BIN, &["filter-caps", "sync", "ts-offset"]],
        templates: &[("sink", Sink, Always, "ANY")],
    },
    MockElement {
        name: "autoaudiosink",
        long_name: "Auto audio sink",
        klass: "Sink/Audio",
        plugin: "autodetect",
        properties: &[OBJECT, BIN, &["filter-caps", "sync", "ts-offset"]],
        templates: &[("sink", Sink, Always, "ANY")],
    },
    MockElement {
        name: "ximagesink",
        long_name: "Video sink",
        klass: "Sink/Video",
        plugin: "ximagesink",
        properties: &[OBJECT, BASE_SINK, &["display", "synchronous", "pixel-aspect-ratio", "force-aspect-ratio", "handle-events", "handle-expose", "window-width", "window-height"]],
        templates: &[(
            "sink",
            Sink,
            Always,
            "video/x-raw, format=(string){ BGRx, xRGB }, width=(int)[ 1, 2147483647 ], height=(int)[ 1, 2147483647 ], \
             framerate=(fraction)[ 0/1, 2147483647/1 ]",
        )],
    },
    MockElement {
        name: "alsasink",
        long_name: "Audio sink (ALSA)",
        klass: "Sink/Audio",
        plugin: "alsa",
        properties: &[OBJECT, BASE_SINK, &["device", "device-name", "card-name", "buffer-time", "latency-time", "provide-clock", "slave-method", "alignment-threshold", "drift-tolerance", "discont-wait"]],
        templates: &[(
            "sink",
            Sink,
            Always,
            "audio/x-raw, format=(string){ S16LE, S32LE, F32LE }, layout=(string)interleaved, \
             rate=(int)[ 1, 2147483647 ], channels=(int)[ 1, 2147483647 ]",
        )],
    },
];

#[derive(Debug, Clone)]
pub struct MockEngine {
    /// Duration of one simulated buffer
    tick: Duration,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            tick: Duration::from_millis(1),
        }
    }

    pub fn with_tick(tick: Duration) -> Self {
        Self { tick }
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn element_names(&self) -> Result<Vec<String>, EngineError> {
        Ok(CATALOGUE.iter().map(|e| e.name.to_string()).collect())
    }

    fn find_factory(&self, name: &str) -> Result<Option<ElementFactory>, EngineError> {
        let Some(element) = CATALOGUE.iter().find(|e| e.name == name) else {
            return Ok(None);
        };
        let templates = element
            .templates
            .iter()
            .map(|(template, direction, presence, caps_text)| {
                let caps = caps::parse(caps_text)
                    .map_err(|e| EngineError::InvalidOutput(format!("{}.{}: {}", element.name, template, e)))?;
                Ok(PadTemplate {
                    name_template: template.to_string(),
                    direction: *direction,
                    presence: *presence,
                    caps,
                })
            })
            .collect::<Result<Vec<_>, EngineError>>()?;

        Ok(Some(ElementFactory {
            name: element.name.to_string(),
            long_name: element.long_name.to_string(),
            klass: element.klass.to_string(),
            description: element.long_name.to_string(),
            plugin: element.plugin.to_string(),
            rank: 0,
            templates,
            properties: element.properties.iter().flat_map(|group| group.iter()).map(|p| p.to_string()).collect(),
        }))
    }

    fn construct(
        &self,
        description: &PipelineDescription,
        working_directory: Option<&Path>,
    ) -> Result<Box<dyn Graph>, ConstructionError> {
        let assembly = assemble(description, |name| self.find_factory(name))?;
        let plan = Plan::new(&assembly.nodes, working_directory);
        Ok(Box::new(MockGraph::new(assembly.nodes, assembly.links, plan, self.tick)))
    }
}

/// What the simulation will do once playing
#[derive(Debug, Clone)]
struct Plan {
    /// filesrc whose input is missing: (element, location)
    missing_input: Option<(String, String)>,
    /// Buffers until EOS, `None` for live/unbounded sources
    buffers: Option<u64>,
    outputs: Vec<(String, PathBuf)>,
}

fn resolve(working_directory: Option<&Path>, location: &str) -> PathBuf {
    match working_directory {
        Some(dir) => dir.join(location),
        None => PathBuf::from(location),
    }
}

/// Expand a printf-style `%d` / `%05d` index in a multifilesink location
fn indexed_location(location: &str, index: u64) -> String {
    let Some(start) = location.find('%') else {
        return location.to_string();
    };
    let rest = &location[start + 1..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if !rest[digits.len()..].starts_with('d') {
        return location.to_string();
    }
    let width: usize = digits.parse().unwrap_or(0);
    format!(
        "{}{:0width$}{}",
        &location[..start],
        index,
        &rest[digits.len() + 1..],
        width = width
    )
}

impl Plan {
    fn new(nodes: &[GraphNode], working_directory: Option<&Path>) -> Self {
        let missing_input = nodes.iter().filter(|n| n.factory == "filesrc").find_map(|node| {
            let location = node.property("location").unwrap_or("");
            (location.is_empty() || !resolve(working_directory, location).exists())
                .then(|| (node.name.clone(), location.to_string()))
        });

        let sources: Vec<&GraphNode> = nodes.iter().filter(|n| n.is_source()).collect();
        let buffers = if sources.is_empty() {
            None
        } else {
            sources
                .iter()
                .map(|node| match node.property("num-buffers").map(str::parse::<i64>) {
                    Some(Ok(n)) if n >= 0 => Some(n as u64),
                    // files run out on their own
                    None if node.factory == "filesrc" => Some(1),
                    _ => None,
                })
                .collect::<Option<Vec<u64>>>()
                .map(|counts| counts.into_iter().max().unwrap_or(0))
        };

        let outputs = nodes
            .iter()
            .filter(|n| n.factory == "filesink" || n.factory == "multifilesink")
            .filter_map(|node| {
                let location = node.property("location")?;
                let location = if node.factory == "multifilesink" {
                    indexed_location(location, 0)
                } else {
                    location.to_string()
                };
                Some((node.name.clone(), resolve(working_directory, &location)))
            })
            .collect();

        Self {
            missing_input,
            buffers,
            outputs,
        }
    }
}

struct MockGraph {
    nodes: Vec<GraphNode>,
    links: Vec<GraphLink>,
    plan: Plan,
    tick: Duration,
    bus_tx: Sender<BusMessage>,
    bus_rx: Receiver<BusMessage>,
    state: Arc<Mutex<StateSnapshot>>,
    worker: Option<(Sender<()>, JoinHandle<()>)>,
}

impl MockGraph {
    fn new(nodes: Vec<GraphNode>, links: Vec<GraphLink>, plan: Plan, tick: Duration) -> Self {
        let (bus_tx, bus_rx) = unbounded();
        Self {
            nodes,
            links,
            plan,
            tick,
            bus_tx,
            bus_rx,
            state: Arc::new(Mutex::new(StateSnapshot {
                current: EngineState::Null,
                pending: None,
            })),
            worker: None,
        }
    }

    fn set_snapshot(&self, current: EngineState, pending: Option<EngineState>) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = StateSnapshot { current, pending };
    }

    fn start(&mut self) -> StateChange {
        let (stop_tx, stop_rx) = bounded(1);
        let simulation = Simulation {
            element_names: self.nodes.iter().map(|n| n.name.clone()).collect(),
            plan: self.plan.clone(),
            tick: self.tick,
            bus: self.bus_tx.clone(),
            state: Arc::clone(&self.state),
        };
        let current = self.state.lock().unwrap_or_else(PoisonError::into_inner).current;
        self.set_snapshot(current, Some(EngineState::Playing));

        match thread::Builder::new()
            .name("mock-pipeline".to_string())
            .spawn(move || simulation.run(current, stop_rx))
        {
            Ok(handle) => {
                self.worker = Some((stop_tx, handle));
                StateChange::Async
            }
            Err(e) => {
                warn!("Failed to spawn mock pipeline thread: {}", e);
                self.set_snapshot(current, None);
                StateChange::Failure
            }
        }
    }

    fn halt(&mut self) {
        if let Some((stop_tx, handle)) = self.worker.take() {
            drop(stop_tx);
            if handle.join().is_err() {
                warn!("mock pipeline thread panicked");
            }
        }
    }
}

struct Simulation {
    element_names: Vec<String>,
    plan: Plan,
    tick: Duration,
    bus: Sender<BusMessage>,
    state: Arc<Mutex<StateSnapshot>>,
}

impl Simulation {
    fn post(&self, message: BusMessage) {
        let _ = self.bus.send(message);
    }

    fn transition(&self, old: EngineState, new: EngineState, pending: Option<EngineState>) {
        for name in &self.element_names {
            self.post(BusMessage::StateChanged {
                source: name.clone(),
                from_pipeline: false,
                old,
                new,
                pending: None,
            });
        }
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = StateSnapshot { current: new, pending };
        self.post(BusMessage::StateChanged {
            source: "pipeline0".to_string(),
            from_pipeline: true,
            old,
            new,
            pending,
        });
    }

    fn run(self, from: EngineState, stop: Receiver<()>) {
        use EngineState::{Null, Paused, Playing, Ready};

        let path = [Null, Ready, Paused, Playing];
        let start = path.iter().position(|s| *s == from).unwrap_or(0);
        for window in path[start..].windows(2) {
            let (old, new) = (window[0], window[1]);
            let pending = (new != Playing).then_some(Playing);
            self.transition(old, new, pending);

            if new == Ready {
                if let Some((element, location)) = &self.plan.missing_input {
                    *self.state.lock().unwrap_or_else(PoisonError::into_inner) = StateSnapshot {
                        current: Ready,
                        pending: None,
                    };
                    self.post(BusMessage::Error {
                        source: element.clone(),
                        message: "Resource not found.".to_string(),
                        debug: Some(format!("No such file \"{}\"", location)),
                    });
                    return;
                }
            }
        }

        let Some(buffers) = self.plan.buffers else {
            // live until told otherwise
            let _ = stop.recv();
            return;
        };

        let runtime = self.tick.saturating_mul(u32::try_from(buffers.max(1)).unwrap_or(u32::MAX));
        match stop.recv_timeout(runtime) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => return,
        }

        for (element, path) in &self.plan.outputs {
            if let Err(e) = fs::write(path, b"") {
                self.post(BusMessage::Error {
                    source: element.clone(),
                    message: "Could not open file for writing.".to_string(),
                    debug: Some(format!("{}: {}", path.display(), e)),
                });
                return;
            }
        }
        debug!("mock pipeline reached EOS after {} buffers", buffers);
        self.post(BusMessage::Eos);
    }
}

impl Graph for MockGraph {
    fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    fn links(&self) -> &[GraphLink] {
        &self.links
    }

    fn set_state(&mut self, state: EngineState) -> StateChange {
        match state {
            EngineState::Playing if self.worker.is_none() => self.start(),
            EngineState::Playing => StateChange::Success,
            EngineState::Null | EngineState::VoidPending => {
                self.halt();
                self.set_snapshot(EngineState::Null, None);
                StateChange::Success
            }
            EngineState::Ready | EngineState::Paused => {
                if self.worker.is_some() {
                    return StateChange::Failure;
                }
                self.set_snapshot(state, None);
                StateChange::Success
            }
        }
    }

    fn query_state(&self) -> Option<StateSnapshot> {
        let snapshot = *self.state.lock().unwrap_or_else(PoisonError::into_inner);
        snapshot.pending.is_none().then_some(snapshot)
    }

    fn bus(&self) -> Receiver<BusMessage> {
        self.bus_rx.clone()
    }
}

impl Drop for MockGraph {
    fn drop(&mut self) {
        self.halt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn construct(text: &str, dir: Option<&Path>) -> Box<dyn Graph> {
        let description = PipelineDescription::parse(text).unwrap();
        MockEngine::new().construct(&description, dir).unwrap()
    }

    fn drain_until_terminal(bus: &Receiver<BusMessage>) -> BusMessage {
        loop {
            let message = bus.recv_timeout(Duration::from_secs(5)).unwrap();
            if message.is_terminal() {
                return message;
            }
        }
    }

    #[test]
    fn test_catalogue_templates_parse() {
        let engine = MockEngine::new();
        for name in engine.element_names().unwrap() {
            let factory = engine.find_factory(&name).unwrap().unwrap();
            assert!(!factory.templates.is_empty(), "{name} has no templates");
        }
        assert!(engine.find_factory("nosuchelement").unwrap().is_none());
    }

    #[test]
    fn test_finite_pipeline_reaches_eos() {
        let mut graph = construct("fakesrc num-buffers=5 ! fakesink", None);
        let bus = graph.bus();
        assert_eq!(graph.set_state(EngineState::Playing), StateChange::Async);
        assert_eq!(drain_until_terminal(&bus), BusMessage::Eos);
        assert_eq!(graph.query_state().unwrap().current, EngineState::Playing);
        graph.set_state(EngineState::Null);
        assert_eq!(graph.query_state().unwrap().current, EngineState::Null);
    }

    #[test]
    fn test_pipeline_posts_state_changes_in_order() {
        let mut graph = construct("fakesrc num-buffers=1 ! fakesink", None);
        let bus = graph.bus();
        graph.set_state(EngineState::Playing);
        drain_until_terminal(&bus);
        graph.set_state(EngineState::Null);

        let mut graph = construct("fakesrc num-buffers=1 ! fakesink", None);
        let bus = graph.bus();
        graph.set_state(EngineState::Playing);
        let mut pipeline_states = Vec::new();
        loop {
            match bus.recv_timeout(Duration::from_secs(5)).unwrap() {
                BusMessage::StateChanged { from_pipeline: true, new, .. } => pipeline_states.push(new),
                BusMessage::Eos => break,
                _ => {}
            }
        }
        assert_eq!(pipeline_states, vec![EngineState::Ready, EngineState::Paused, EngineState::Playing]);
    }

    #[test]
    fn test_missing_file_posts_error() {
        let mut graph = construct("filesrc location=/nonexistent/input.wav ! fakesink", None);
        let bus = graph.bus();
        graph.set_state(EngineState::Playing);
        match drain_until_terminal(&bus) {
            BusMessage::Error { source, message, .. } => {
                assert_eq!(source, "filesrc0");
                assert_eq!(message, "Resource not found.");
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn test_live_pipeline_runs_until_stopped() {
        let mut graph = construct("videotestsrc ! fakesink", None);
        let bus = graph.bus();
        graph.set_state(EngineState::Playing);
        assert!(bus
            .iter()
            .take_while(|m| !matches!(m, BusMessage::StateChanged { from_pipeline: true, new: EngineState::Playing, .. }))
            .all(|m| !m.is_terminal()));
        assert!(bus.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(graph.set_state(EngineState::Null), StateChange::Success);
    }

    #[test]
    fn test_output_files_created_on_eos() {
        let dir = tempfile::tempdir().unwrap();
        let mut graph = construct(
            &format!("videotestsrc num-buffers=3 ! multifilesink location={}/frame%05d.png", dir.path().display()),
            None,
        );
        let bus = graph.bus();
        graph.set_state(EngineState::Playing);
        assert_eq!(drain_until_terminal(&bus), BusMessage::Eos);
        assert!(dir.path().join("frame00000.png").exists());
    }

    #[test]
    fn test_indexed_location() {
        assert_eq!(indexed_location("frame%05d.png", 7), "frame00007.png");
        assert_eq!(indexed_location("out%d.jpg", 3), "out3.jpg");
        assert_eq!(indexed_location("plain.mp4", 3), "plain.mp4");
    }
}
