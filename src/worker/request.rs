use std::sync::Arc;

use tokio::sync::oneshot;

use crate::config::{DeviceParams, EffectiveParams};
use crate::directory::DeviceDirectory;
use crate::event::EventCallback;
use crate::host::Direction;
use crate::pipeline::{SharedMixer, StreamShared};
use crate::worker::session::SessionId;
use crate::StreamDeviceError;

/// Sender half of a request's reply slot.
pub(crate) type Reply<T> = oneshot::Sender<Result<T, StreamDeviceError>>;

/// What kind of session to open.
pub(crate) enum OpenKind {
    Playback(SharedMixer),
    Capture,
}

impl OpenKind {
    pub fn direction(&self) -> Direction {
        match self {
            Self::Playback(_) => Direction::Playback,
            Self::Capture => Direction::Capture,
        }
    }
}

/// Result of a successful open.
pub(crate) struct Opened {
    pub session: SessionId,
    pub name: String,
    pub shared: Arc<StreamShared>,
}

/// A lifecycle request, serviced in arrival order by the worker.
pub(crate) enum Request {
    Open {
        kind: OpenKind,
        selector: Option<String>,
        callback: Option<EventCallback>,
        reply: Reply<Opened>,
    },
    Reset {
        session: SessionId,
        params: DeviceParams,
        reply: Reply<EffectiveParams>,
    },
    Start {
        session: SessionId,
        reply: Reply<()>,
    },
    Stop {
        session: SessionId,
        reply: Reply<()>,
    },
    Close {
        session: SessionId,
        reply: Reply<()>,
    },
    Enumerate {
        direction: Direction,
        reply: Reply<DeviceDirectory>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Reset { .. } => "reset",
            Self::Start { .. } => "start",
            Self::Stop { .. } => "stop",
            Self::Close { .. } => "close",
            Self::Enumerate { .. } => "enumerate",
            Self::Shutdown { .. } => "shutdown",
        }
    }
}
