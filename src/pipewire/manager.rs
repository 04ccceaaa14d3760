use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::mpsc::{RecvTimeoutError, SyncSender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use libspa::param::ParamType;
use libspa::pod::Pod;
use libspa::utils::dict::DictRef;
use pipewire::{
    context::ContextRc,
    core::PW_ID_CORE,
    main_loop::MainLoopRc,
    metadata::{Metadata, MetadataListener},
    node::{Node as PwNode, NodeListener},
    registry::{GlobalObject, RegistryRc},
    types::ObjectType,
};

use super::backoff::Backoff;
use super::defaults::{self, DEFAULT_METADATA_NAME};
use super::fanout::{BoxedListener, Fanout};
use super::mirror::RegistryMirror;
use super::types::{DeviceKind, ObjectId};
use super::volume::{PropsUpdate, props_from_pod, serialize_props};
use crate::config::Config;
use crate::error::{Error, Result, Stage};

/// Commands from other threads to the PipeWire thread
enum MirrorCommand {
    /// Add a listener; it is first replayed the current device set
    Register(BoxedListener),
    /// Write volume or mute to a bound device node
    SetProps { id: ObjectId, update: PropsUpdate },
    /// Tear down the session and let the thread exit
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Main loop was quit on request
    Quit,
    /// The daemon went away
    Lost,
}

struct SessionOutcome {
    end: SessionEnd,
    /// Got through the initial sync
    established: bool,
}

type ReadySlot = Rc<RefCell<Option<SyncSender<Result<()>>>>>;

/// Proxy and param listener for a node whose volume we follow. Dropping it
/// unsubscribes.
struct BoundNode {
    proxy: PwNode,
    _listener: NodeListener,
    /// Channel count from the last `channelVolumes`, for writing volume back
    channels: Rc<Cell<usize>>,
}

type BoundNodes = Rc<RefCell<HashMap<ObjectId, BoundNode>>>;

/// The session manager's `default` metadata object
struct BoundMetadata {
    id: ObjectId,
    _proxy: Metadata,
    _listener: MetadataListener,
}

/// Owner of a running mirror. Dropping it disconnects.
pub struct DeviceMirrorHandle {
    cmd_tx: pipewire::channel::Sender<MirrorCommand>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceMirrorHandle {
    /// Add a listener from any thread. It hears about every device that is
    /// already live before seeing new events.
    pub fn register(&self, listener: BoxedListener) -> Result<()> {
        self.send(MirrorCommand::Register(listener))
    }

    /// Set a device's volume on the normalized `0.0..=1.0` scale; values
    /// above 1 are clamped. Needs volume tracking, since only tracked nodes
    /// are bound. The new value comes back as an `on_volume_change`.
    pub fn set_volume(&self, id: ObjectId, volume: f32) -> Result<()> {
        if !volume.is_finite() {
            return Err(Error::InvalidVolume(volume));
        }
        self.send(MirrorCommand::SetProps {
            id,
            update: PropsUpdate::Volume(volume.clamp(0.0, 1.0)),
        })
    }

    pub fn set_mute(&self, id: ObjectId, muted: bool) -> Result<()> {
        self.send(MirrorCommand::SetProps {
            id,
            update: PropsUpdate::Mute(muted),
        })
    }

    fn send(&self, cmd: MirrorCommand) -> Result<()> {
        self.cmd_tx.send(cmd).map_err(|_| Error::LoopThreadGone)
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the session and join the PipeWire thread. Every live device is
    /// reported removed to the listeners on the way out.
    pub fn disconnect(mut self) {
        self.shutdown();
    }

    /// Block until the PipeWire thread exits on its own, i.e. after the
    /// connection is lost and reconnecting is disabled or gave up.
    pub fn wait(mut self) {
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            log::error!("PipeWire thread panicked");
        }
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.cmd_tx.send(MirrorCommand::Shutdown);
        if thread.join().is_err() {
            log::error!("PipeWire thread panicked");
        }
    }
}

impl Drop for DeviceMirrorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Connect to PipeWire and start mirroring audio devices.
///
/// `listeners` are registered before the registry is opened, so they see
/// the initial enumeration. Returns once every device present at connect
/// time has been announced (and, with volume tracking on, its volume read),
/// or fails if any setup step fails or the handshake takes longer than
/// `config.connect_timeout_ms`.
pub fn connect(config: Config, listeners: Vec<BoxedListener>) -> Result<DeviceMirrorHandle> {
    let (cmd_tx, cmd_rx) = pipewire::channel::channel();
    let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);
    let timeout = config.connect_timeout();

    let thread = std::thread::Builder::new()
        .name("pipewire".into())
        .spawn(move || run_pipewire_thread(config, listeners, cmd_rx, ready_tx))
        .map_err(|e| Error::connection(Stage::Thread, e))?;

    match ready_rx.recv_timeout(timeout) {
        Ok(Ok(())) => Ok(DeviceMirrorHandle {
            cmd_tx,
            thread: Some(thread),
        }),
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(e)
        }
        Err(RecvTimeoutError::Timeout) => {
            // The thread may be stuck inside a blocking connect; ask it to
            // stop but don't wait for it.
            log::error!("PipeWire handshake timed out after {:?}", timeout);
            let _ = cmd_tx.send(MirrorCommand::Shutdown);
            Err(Error::ConnectTimeout(timeout))
        }
        Err(RecvTimeoutError::Disconnected) => {
            let _ = thread.join();
            Err(Error::LoopThreadGone)
        }
    }
}

fn run_pipewire_thread(
    config: Config,
    listeners: Vec<BoxedListener>,
    cmd_rx: pipewire::channel::Receiver<MirrorCommand>,
    ready_tx: SyncSender<Result<()>>,
) {
    pipewire::init();

    let mainloop = match MainLoopRc::new(None) {
        Ok(mainloop) => mainloop,
        Err(e) => {
            let _ = ready_tx.send(Err(Error::connection(Stage::MainLoop, e)));
            return;
        }
    };

    let mut fanout = Fanout::new();
    for listener in listeners {
        fanout.register(listener);
    }
    let mirror = Rc::new(RefCell::new(RegistryMirror::new(fanout)));
    let bound: BoundNodes = Rc::new(RefCell::new(HashMap::new()));
    let shutdown = Rc::new(Cell::new(false));
    let ready: ReadySlot = Rc::new(RefCell::new(Some(ready_tx)));

    let _cmd_receiver = cmd_rx.attach(mainloop.loop_(), {
        let mirror = mirror.clone();
        let bound = bound.clone();
        let mainloop = mainloop.clone();
        let shutdown = shutdown.clone();

        move |cmd| match cmd {
            MirrorCommand::Register(listener) => {
                mirror.borrow_mut().register_with_replay(listener);
                log::debug!("Listener registered ({} total)", mirror.borrow().listener_count());
            }
            MirrorCommand::SetProps { id, update } => apply_props(&bound, id, update),
            MirrorCommand::Shutdown => {
                shutdown.set(true);
                mainloop.quit();
            }
        }
    });

    let mut backoff = Backoff::new(&config.reconnect);

    loop {
        let started = Instant::now();
        let outcome = run_session(&mainloop, &mirror, &bound, &config, &ready);

        let stale = mirror.borrow_mut().clear();
        if stale > 0 {
            log::info!("Session ended, dropped {} devices", stale);
        }
        if shutdown.get() {
            break;
        }

        let pending_ready = ready.borrow_mut().take();
        if let Some(tx) = pending_ready {
            // Never got through the first handshake: that's connect()'s error
            let err = match outcome {
                Err(e) => e,
                Ok(_) => Error::connection(Stage::Sync, "connection closed before initial sync"),
            };
            let _ = tx.send(Err(err));
            break;
        }

        match outcome {
            Ok(session) => {
                if session.established {
                    backoff.session_ready();
                }
                match session.end {
                    SessionEnd::Lost => {
                        log::warn!("Lost connection to PipeWire");
                        if session.established {
                            backoff.session_ended(started.elapsed());
                        }
                    }
                    SessionEnd::Quit => {
                        log::debug!("Main loop quit without a shutdown request");
                        break;
                    }
                }
            }
            Err(e) => log::warn!("Reconnect failed: {}", e),
        }

        if !config.reconnect.enabled {
            break;
        }
        let Some(delay) = backoff.next_delay() else {
            log::error!(
                "Giving up on PipeWire after {} failed reconnects",
                backoff.failures()
            );
            break;
        };
        log::info!("Reconnecting to PipeWire in {:?}", delay);
        wait(&mainloop, delay);
        if shutdown.get() {
            break;
        }
    }

    log::info!("PipeWire thread exiting");
}

/// One connection lifetime: context → core → registry, run until quit or
/// the core reports the socket gone.
fn run_session(
    mainloop: &MainLoopRc,
    mirror: &Rc<RefCell<RegistryMirror>>,
    bound: &BoundNodes,
    config: &Config,
    ready: &ReadySlot,
) -> Result<SessionOutcome> {
    let context = ContextRc::new(mainloop, None).map_err(|e| Error::connection(Stage::Context, e))?;
    let core = match &config.remote {
        Some(remote) => {
            let props = pipewire::properties::properties! {
                *pipewire::keys::REMOTE_NAME => remote.as_str(),
            };
            context.connect_rc(Some(props))
        }
        None => context.connect_rc(None),
    }
    .map_err(|e| Error::connection(Stage::Core, e))?;
    let registry = core
        .get_registry_rc()
        .map_err(|e| Error::connection(Stage::Registry, e))?;

    let metadata: Rc<RefCell<Option<BoundMetadata>>> = Rc::new(RefCell::new(None));
    let lost = Rc::new(Cell::new(false));
    let established = Rc::new(Cell::new(false));

    let _registry_listener = registry
        .add_listener_local()
        .global({
            let mirror = mirror.clone();
            let registry = registry.clone();
            let bound = bound.clone();
            let metadata = metadata.clone();
            let track_volume = config.track_volume;

            move |global| {
                if matches!(global.type_, ObjectType::Metadata) {
                    bind_defaults(&registry, global, &mirror, &metadata);
                    return;
                }
                let accepted = mirror
                    .borrow_mut()
                    .on_object_announced(global.id, &global.type_, global.props);
                if accepted.is_some() && track_volume {
                    bind_node(&registry, global, &mirror, &bound);
                }
            }
        })
        .global_remove({
            let mirror = mirror.clone();
            let bound = bound.clone();
            let metadata = metadata.clone();

            move |id| {
                let was_defaults = metadata.borrow().as_ref().is_some_and(|m| m.id == id);
                if was_defaults {
                    log::info!("Default metadata went away");
                    metadata.borrow_mut().take();
                    let mut mirror = mirror.borrow_mut();
                    mirror.on_default_changed(DeviceKind::Sink, None);
                    mirror.on_default_changed(DeviceKind::Source, None);
                    return;
                }
                bound.borrow_mut().remove(&id);
                mirror.borrow_mut().on_object_removed(id);
            }
        })
        .register();

    // First sync: all globals announced. Second: the Props params and
    // metadata properties requested while handling them have arrived too.
    let pending = Rc::new(RefCell::new(
        core.sync(0).map_err(|e| Error::connection(Stage::Sync, e))?,
    ));
    let bindings_synced = Rc::new(Cell::new(false));

    let _core_listener = core
        .add_listener_local()
        .done({
            let core = core.clone();
            let mirror = mirror.clone();
            let ready = ready.clone();
            let established = established.clone();

            move |id, seq| {
                if id != PW_ID_CORE || seq != *pending.borrow() {
                    return;
                }
                if !bindings_synced.get() {
                    bindings_synced.set(true);
                    match core.sync(0) {
                        Ok(next) => {
                            *pending.borrow_mut() = next;
                            return;
                        }
                        Err(e) => log::warn!("Second sync failed, volumes may lag: {}", e),
                    }
                }
                if established.replace(true) {
                    return;
                }
                let devices = mirror.borrow().len();
                let tx = ready.borrow_mut().take();
                match tx {
                    Some(tx) => {
                        log::info!("PipeWire connected, {} devices", devices);
                        let _ = tx.send(Ok(()));
                    }
                    None => log::info!("PipeWire reconnected, {} devices", devices),
                }
            }
        })
        .error({
            let lost = lost.clone();
            let mainloop = mainloop.clone();

            move |id, seq, res, message| {
                log::warn!("PipeWire error: id={} seq={} res={}: {}", id, seq, res, message);
                if id == PW_ID_CORE && res == -libc::EPIPE {
                    lost.set(true);
                    mainloop.quit();
                }
            }
        })
        .register();

    log::debug!("PipeWire session running");
    mainloop.run();

    bound.borrow_mut().clear();
    metadata.borrow_mut().take();
    Ok(SessionOutcome {
        end: if lost.get() {
            SessionEnd::Lost
        } else {
            SessionEnd::Quit
        },
        established: established.get(),
    })
}

fn bind_node(
    registry: &RegistryRc,
    global: &GlobalObject<&DictRef>,
    mirror: &Rc<RefCell<RegistryMirror>>,
    bound: &BoundNodes,
) {
    let id = global.id;
    let proxy: PwNode = match registry.bind(global) {
        Ok(proxy) => proxy,
        Err(e) => {
            log::warn!("Failed to bind node {}: {}", id, e);
            return;
        }
    };
    let channels = Rc::new(Cell::new(0));

    let listener = proxy
        .add_listener_local()
        .param({
            let mirror = mirror.clone();
            let channels = channels.clone();

            move |_seq, _param_type, _index, _next, param| {
                let Some(props) = param.and_then(props_from_pod) else {
                    return;
                };
                if props.channels > 0 {
                    channels.set(props.channels);
                }
                let mut mirror = mirror.borrow_mut();
                if let Some(volume) = props.volume {
                    mirror.on_volume_changed(id, volume);
                }
                if let Some(muted) = props.muted {
                    mirror.on_mute_changed(id, muted);
                }
            }
        })
        .register();
    proxy.subscribe_params(&[ParamType::Props]);

    bound.borrow_mut().insert(
        id,
        BoundNode {
            proxy,
            _listener: listener,
            channels,
        },
    );
}

/// Follow the `default` metadata object. Other metadata objects (`settings`,
/// `route-settings`) are ignored.
fn bind_defaults(
    registry: &RegistryRc,
    global: &GlobalObject<&DictRef>,
    mirror: &Rc<RefCell<RegistryMirror>>,
    slot: &Rc<RefCell<Option<BoundMetadata>>>,
) {
    let name = global.props.and_then(|props| props.get("metadata.name"));
    if name != Some(DEFAULT_METADATA_NAME) {
        return;
    }
    let proxy: Metadata = match registry.bind(global) {
        Ok(proxy) => proxy,
        Err(e) => {
            log::warn!("Failed to bind default metadata {}: {}", global.id, e);
            return;
        }
    };

    let listener = proxy
        .add_listener_local()
        .property({
            let mirror = mirror.clone();

            move |subject, key, _type, value| {
                for (kind, name) in defaults::changes(subject, key, value) {
                    mirror.borrow_mut().on_default_changed(kind, name.as_deref());
                }
                0
            }
        })
        .register();

    log::debug!("Following default metadata {}", global.id);
    *slot.borrow_mut() = Some(BoundMetadata {
        id: global.id,
        _proxy: proxy,
        _listener: listener,
    });
}

fn apply_props(bound: &BoundNodes, id: ObjectId, update: PropsUpdate) {
    let bound = bound.borrow();
    let Some(node) = bound.get(&id) else {
        log::warn!("Cannot update node {}: not a tracked device", id);
        return;
    };
    let Some(bytes) = serialize_props(update, node.channels.get()) else {
        return;
    };
    let Some(pod) = Pod::from_bytes(&bytes) else {
        log::warn!("Props for node {} did not serialize to a valid pod", id);
        return;
    };
    log::debug!("Setting {:?} on node {}", update, id);
    node.proxy.set_param(ParamType::Props, 0, pod);
}

/// Run the loop for `delay` without a session, so shutdown commands are
/// still handled during the backoff.
fn wait(mainloop: &MainLoopRc, delay: Duration) {
    let timer = mainloop.loop_().add_timer({
        let mainloop = mainloop.clone();
        move |_| mainloop.quit()
    });
    let _ = timer.update_timer(Some(delay), None);
    mainloop.run();
}
