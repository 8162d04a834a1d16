//! The device worker: one thread that owns the host and every session.
//!
//! Lifecycle calls from any thread are queued to the worker and answered in
//! arrival order, so hosts that must be driven from a single thread are
//! driven from a single thread. Stream threads never go through the worker.

mod request;
mod session;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;

use crate::config::{DeviceParams, EffectiveParams, RuntimeConfig};
use crate::directory::DeviceDirectory;
use crate::event::EventCallback;
use crate::host::{AudioHost, Direction};
use crate::pipeline::StreamShared;
use crate::{HostError, StreamDeviceError};

pub(crate) use request::{OpenKind, Opened};
use request::{Reply, Request};
pub(crate) use session::SessionId;
use session::{Session, SessionKind};

/// Handle to a running device worker.
///
/// Cloning is cheap; all clones talk to the same worker. The worker shuts
/// down when the last clone is dropped, closing whatever sessions remain.
///
/// Lifecycle calls block the calling thread until the worker answers. From
/// async code, make them inside `spawn_blocking`. Dropping a [`Device`] or
/// the last runtime handle never waits on a reply and is safe anywhere.
///
/// [`Device`]: crate::Device
///
/// # Example
///
/// ```
/// use stream_device::host::mock::MockHost;
/// use stream_device::host::Direction;
/// use stream_device::{AudioRuntime, RuntimeConfig};
///
/// let host = MockHost::new().with_endpoint(Direction::Playback, "Speakers", "{spk}");
/// let runtime = AudioRuntime::spawn(RuntimeConfig::default(), move || host)?;
///
/// let playback = runtime.enumerate(Direction::Playback)?;
/// assert_eq!(playback.names().collect::<Vec<_>>(), ["Speakers"]);
/// # Ok::<(), stream_device::StreamDeviceError>(())
/// ```
#[derive(Clone)]
pub struct AudioRuntime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    sender: UnboundedSender<Request>,
    subsystem_refs: Arc<AtomicUsize>,
    thread: Mutex<Option<JoinHandle<()>>>,
    config: RuntimeConfig,
}

impl RuntimeInner {
    /// The worker exits right after answering Shutdown, so joining it is the
    /// wait. Nothing here blocks on a channel, which keeps drop safe inside
    /// an async runtime.
    fn shutdown(&self) {
        let (reply, _response) = oneshot::channel();
        let _ = self.sender.send(Request::Shutdown { reply });
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                tracing::error!("Device worker panicked");
            }
        }
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for AudioRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioRuntime")
            .field("config", &self.inner.config)
            .field("subsystem_refs", &self.subsystem_refs())
            .finish_non_exhaustive()
    }
}

impl AudioRuntime {
    /// Starts a worker thread driving the host built by `factory`.
    ///
    /// The host is constructed on the worker thread itself and never leaves
    /// it, so it does not need to be `Send`.
    pub fn spawn<H, F>(config: RuntimeConfig, factory: F) -> Result<Self, StreamDeviceError>
    where
        H: AudioHost + 'static,
        F: FnOnce() -> H + Send + 'static,
    {
        let (sender, requests) = mpsc::unbounded_channel();
        let subsystem_refs = Arc::new(AtomicUsize::new(0));
        let published = Arc::clone(&subsystem_refs);
        let worker_config = config.clone();

        let thread = thread::Builder::new()
            .name(config.worker_thread_name.clone())
            .spawn(move || {
                let worker = DeviceWorker::new(Box::new(factory()), worker_config, published);
                worker.run(requests);
            })
            .map_err(StreamDeviceError::WorkerSpawn)?;

        tracing::debug!(thread = %config.worker_thread_name, "Device worker spawned");
        Ok(Self {
            inner: Arc::new(RuntimeInner {
                sender,
                subsystem_refs,
                thread: Mutex::new(Some(thread)),
                config,
            }),
        })
    }

    /// The process-wide runtime over the default CPAL host.
    ///
    /// Spawned on first use with [`RuntimeConfig::default()`].
    #[cfg(feature = "cpal-host")]
    pub fn global() -> Result<Self, StreamDeviceError> {
        static GLOBAL: std::sync::OnceLock<AudioRuntime> = std::sync::OnceLock::new();

        if let Some(runtime) = GLOBAL.get() {
            return Ok(runtime.clone());
        }
        let runtime = Self::spawn(RuntimeConfig::default(), crate::host::cpal_host::CpalHost::new)?;
        Ok(GLOBAL.get_or_init(|| runtime).clone())
    }

    /// Configuration the worker was started with.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Enumerates endpoints for a direction.
    ///
    /// The worker keeps the latest snapshot per direction; a failed
    /// enumeration leaves the previous one in place.
    pub fn enumerate(&self, direction: Direction) -> Result<DeviceDirectory, StreamDeviceError> {
        self.call(|reply| Request::Enumerate { direction, reply })
    }

    /// Display names for a direction as a NUL-separated, double-NUL
    /// terminated list.
    pub fn device_names(&self, direction: Direction) -> Result<String, StreamDeviceError> {
        Ok(self.enumerate(direction)?.name_list())
    }

    /// Number of outstanding references on the host audio subsystem.
    ///
    /// Each open session holds one; enumeration holds one while it runs.
    #[must_use]
    pub fn subsystem_refs(&self) -> usize {
        self.inner.subsystem_refs.load(Ordering::Acquire)
    }

    /// Closes every session and stops the worker.
    ///
    /// Later requests fail with [`StreamDeviceError::WorkerUnavailable`].
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub(crate) fn open(
        &self,
        kind: OpenKind,
        selector: Option<String>,
        callback: Option<EventCallback>,
    ) -> Result<Opened, StreamDeviceError> {
        self.call(|reply| Request::Open {
            kind,
            selector,
            callback,
            reply,
        })
    }

    pub(crate) fn reset(
        &self,
        session: SessionId,
        params: DeviceParams,
    ) -> Result<EffectiveParams, StreamDeviceError> {
        self.call(|reply| Request::Reset {
            session,
            params,
            reply,
        })
    }

    pub(crate) fn start(&self, session: SessionId) -> Result<(), StreamDeviceError> {
        self.call(|reply| Request::Start { session, reply })
    }

    pub(crate) fn stop(&self, session: SessionId) -> Result<(), StreamDeviceError> {
        self.call(|reply| Request::Stop { session, reply })
    }

    pub(crate) fn close(&self, session: SessionId) -> Result<(), StreamDeviceError> {
        self.call(|reply| Request::Close { session, reply })
    }

    /// Queues a close without waiting for the worker to carry it out.
    ///
    /// Requests are served in order, so any later call observes the closed
    /// session.
    pub(crate) fn close_detached(&self, session: SessionId) -> Result<(), StreamDeviceError> {
        let (reply, _response) = oneshot::channel();
        self.inner
            .sender
            .send(Request::Close { session, reply })
            .map_err(|_| StreamDeviceError::WorkerUnavailable)
    }

    /// Queues a request and blocks until the worker answers it.
    fn call<T>(&self, build: impl FnOnce(Reply<T>) -> Request) -> Result<T, StreamDeviceError> {
        let (reply, response) = oneshot::channel();
        self.inner
            .sender
            .send(build(reply))
            .map_err(|_| StreamDeviceError::WorkerUnavailable)?;
        response
            .blocking_recv()
            .map_err(|_| StreamDeviceError::WorkerUnavailable)?
    }
}

/// Reference count on the host audio subsystem.
///
/// The host is initialized on the 0 → 1 transition and released on 1 → 0.
struct SubsystemRef {
    count: usize,
    published: Arc<AtomicUsize>,
}

impl SubsystemRef {
    fn acquire(&mut self, host: &mut dyn AudioHost) -> Result<(), HostError> {
        if self.count == 0 {
            host.initialize()?;
            tracing::debug!("Audio subsystem initialized");
        }
        self.count += 1;
        self.published.store(self.count, Ordering::Release);
        Ok(())
    }

    fn release(&mut self, host: &mut dyn AudioHost) {
        match self.count {
            0 => tracing::warn!("Unbalanced audio subsystem release"),
            1 => {
                self.count = 0;
                host.uninitialize();
                tracing::debug!("Audio subsystem released");
            }
            _ => self.count -= 1,
        }
        self.published.store(self.count, Ordering::Release);
    }
}

struct DeviceWorker {
    host: Box<dyn AudioHost>,
    config: RuntimeConfig,
    subsystem: SubsystemRef,
    sessions: HashMap<SessionId, Session>,
    next_session: u64,
    playback: DeviceDirectory,
    capture: DeviceDirectory,
}

impl DeviceWorker {
    fn new(host: Box<dyn AudioHost>, config: RuntimeConfig, published: Arc<AtomicUsize>) -> Self {
        Self {
            host,
            config,
            subsystem: SubsystemRef {
                count: 0,
                published,
            },
            sessions: HashMap::new(),
            next_session: 1,
            playback: DeviceDirectory::empty(Direction::Playback),
            capture: DeviceDirectory::empty(Direction::Capture),
        }
    }

    fn run(mut self, mut requests: UnboundedReceiver<Request>) {
        tracing::info!("Device worker started");

        while let Some(request) = requests.blocking_recv() {
            tracing::trace!(request = request.name(), "Servicing request");
            match request {
                Request::Open {
                    kind,
                    selector,
                    callback,
                    reply,
                } => {
                    let _ = reply.send(self.open(kind, selector, callback));
                }
                Request::Reset {
                    session,
                    params,
                    reply,
                } => {
                    let _ = reply.send(self.reset(session, &params));
                }
                Request::Start { session, reply } => {
                    let _ = reply.send(self.start(session));
                }
                Request::Stop { session, reply } => {
                    if let Some(session) = self.sessions.get_mut(&session) {
                        session.stop();
                    }
                    let _ = reply.send(Ok(()));
                }
                Request::Close { session, reply } => {
                    self.close(session);
                    let _ = reply.send(Ok(()));
                }
                Request::Enumerate { direction, reply } => {
                    let _ = reply.send(self.enumerate(direction));
                }
                Request::Shutdown { reply } => {
                    self.close_all();
                    let _ = reply.send(Ok(()));
                    break;
                }
            }
        }

        // Also reached when every runtime handle is gone without a shutdown
        self.close_all();
        tracing::info!("Device worker stopped");
    }

    fn directory_mut(&mut self, direction: Direction) -> &mut DeviceDirectory {
        match direction {
            Direction::Playback => &mut self.playback,
            Direction::Capture => &mut self.capture,
        }
    }

    /// Replaces the cached snapshot on success only.
    fn refresh(&mut self, direction: Direction) -> Result<DeviceDirectory, StreamDeviceError> {
        let directory = DeviceDirectory::enumerate(self.host.as_mut(), direction)?;
        *self.directory_mut(direction) = directory.clone();
        Ok(directory)
    }

    fn enumerate(&mut self, direction: Direction) -> Result<DeviceDirectory, StreamDeviceError> {
        self.subsystem.acquire(self.host.as_mut())?;
        let result = self.refresh(direction);
        self.subsystem.release(self.host.as_mut());

        if let Err(e) = &result {
            tracing::warn!(%direction, error = %e, "Enumeration failed, keeping previous snapshot");
        }
        result
    }

    fn open(
        &mut self,
        kind: OpenKind,
        selector: Option<String>,
        callback: Option<EventCallback>,
    ) -> Result<Opened, StreamDeviceError> {
        self.subsystem.acquire(self.host.as_mut())?;
        let result = self.open_session(kind, selector, callback);
        if result.is_err() {
            self.subsystem.release(self.host.as_mut());
        }
        result
    }

    fn open_session(
        &mut self,
        kind: OpenKind,
        selector: Option<String>,
        callback: Option<EventCallback>,
    ) -> Result<Opened, StreamDeviceError> {
        let direction = kind.direction();
        let directory = self.refresh(direction)?;

        let endpoint = match selector.filter(|s| !s.is_empty()) {
            Some(name) => directory
                .select(&name)
                .cloned()
                .ok_or(StreamDeviceError::DeviceNotFound { name })?,
            None => directory
                .default_endpoint()
                .cloned()
                .ok_or(StreamDeviceError::NoDefaultDevice { direction })?,
        };

        let client = self
            .host
            .activate(&endpoint.id, direction)
            .map_err(|source| StreamDeviceError::Activation {
                name: endpoint.name.clone(),
                source,
            })?;

        let id = SessionId(self.next_session);
        self.next_session += 1;
        let shared = Arc::new(StreamShared::new());
        let name = endpoint.name.clone();
        let kind = match kind {
            OpenKind::Playback(mixer) => SessionKind::playback(mixer),
            OpenKind::Capture => SessionKind::capture(),
        };

        tracing::info!(device = %name, %direction, "Device opened");
        self.sessions.insert(
            id,
            Session::new(endpoint, client, Arc::clone(&shared), callback, kind),
        );
        Ok(Opened {
            session: id,
            name,
            shared,
        })
    }

    fn reset(
        &mut self,
        id: SessionId,
        params: &DeviceParams,
    ) -> Result<EffectiveParams, StreamDeviceError> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(StreamDeviceError::UnknownSession)?;
        let result = session.reset(self.host.as_mut(), params, &self.config);
        if let Err(e) = &result {
            tracing::warn!(device = %session.name(), error = %e, "Reset failed");
        }
        result
    }

    fn start(&mut self, id: SessionId) -> Result<(), StreamDeviceError> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(StreamDeviceError::UnknownSession)?;
        session.start(&self.config)
    }

    fn close(&mut self, id: SessionId) {
        if let Some(session) = self.sessions.remove(&id) {
            session.close();
            self.subsystem.release(self.host.as_mut());
        }
    }

    fn close_all(&mut self) {
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for id in ids {
            self.close(id);
        }
    }
}
