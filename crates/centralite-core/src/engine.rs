//! Protocol engine
//!
//! Owns the link to one panel. A background thread reads and classifies
//! lines, hands replies to the command channel and dispatches push events
//! to the event bus. Everything else runs on the caller's thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::net::TcpStream;
use std::time::Duration;

use crate::config::{EngineConfig, LinkConfig};
use crate::events::{EventBus, EventKey, PanelEvent, Subscription};
use crate::levels;
use crate::protocol::{
    classify, decode_loads, decode_switches, open_port, ChannelStats, Command, CommandChannel,
    DeviceStates, Frame, FrameReader, ProtocolError, ReadOutcome, ReplySlot, SceneDirection,
    TcpLink, Transport,
};

/// Ramp rate used when setting a level from a 0-255 brightness
pub const DEFAULT_RAMP_RATE: u8 = 1;

/// State shared with the reader thread
struct Shared {
    bus: Arc<EventBus>,
    replies: Arc<ReplySlot>,
    running: AtomicBool,
    bulk_load_events: bool,
}

impl Shared {
    fn handle_line(&self, line: &str) {
        let frame = classify(line, self.replies.is_pending());
        if frame.is_push_event() {
            tracing::debug!("reader: push event {:?}", frame);
        }
        match frame {
            Frame::SwitchPressed(id) => self.dispatch(PanelEvent::SwitchPressed { id }),
            Frame::SwitchReleased(id) => self.dispatch(PanelEvent::SwitchReleased { id }),
            Frame::LoadChanged { id, level } => {
                self.dispatch(PanelEvent::LoadChanged { id, level })
            }
            Frame::LoadBulkStatus(hex) => {
                let answered = self.replies.offer(hex);
                if self.bulk_load_events {
                    self.dispatch_bulk_loads(hex);
                } else if !answered {
                    tracing::debug!("reader: unsolicited load bitmap {:?}", hex);
                }
            }
            Frame::SwitchBulkStatus(hex) => {
                if !self.replies.offer(hex) {
                    tracing::debug!("reader: unsolicited switch bitmap {:?}", hex);
                }
            }
            Frame::CommandReply(text) => {
                if !self.replies.offer(text) {
                    tracing::info!("reader: reply {:?} arrived after its command gave up", text);
                }
            }
            Frame::Unrecognized("") => tracing::trace!("reader: empty line"),
            Frame::Unrecognized(text) => tracing::info!("reader: unrecognized input {:?}", text),
        }
    }

    /// Replay a load bitmap as level events so load subscribers resync
    fn dispatch_bulk_loads(&self, hex: &str) {
        match decode_loads(hex) {
            Ok(states) => {
                for (id, on) in states {
                    let level = if on { 99 } else { 0 };
                    self.dispatch(PanelEvent::LoadChanged { id, level });
                }
            }
            Err(e) => tracing::warn!("reader: undecodable load bitmap {:?}: {}", hex, e),
        }
    }

    fn dispatch(&self, event: PanelEvent) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        let report = self.bus.dispatch(&event);
        if report.failed > 0 {
            tracing::debug!(
                "reader: {:?} delivered to {}, {} handler(s) failed",
                event,
                report.delivered,
                report.failed
            );
        }
    }
}

fn reader_loop(mut reader: FrameReader<Box<dyn Transport>>, shared: Arc<Shared>, backoff: Duration) {
    tracing::info!("reader: started");
    while shared.running.load(Ordering::Acquire) {
        match reader.read_line() {
            Ok(ReadOutcome::Timeout) => continue,
            Ok(ReadOutcome::Line(line)) => {
                tracing::trace!("reader: incoming line {:?}", line);
                shared.handle_line(&line);
            }
            Err(e) => {
                tracing::warn!("reader: read failed: {}", e);
                thread::sleep(backoff);
            }
        }
    }
    tracing::info!("reader: stopped");
}

/// Connection to one panel
pub struct ProtocolEngine {
    shared: Arc<Shared>,
    channel: CommandChannel,
    reader: Mutex<Option<JoinHandle<()>>>,
    config: EngineConfig,
}

impl ProtocolEngine {
    /// Start an engine on an already opened transport
    ///
    /// The transport is cloned so reads and writes use separate handles;
    /// failure to clone is a setup error.
    pub fn new(mut transport: Box<dyn Transport>, config: EngineConfig) -> Result<Self, ProtocolError> {
        transport.set_timeout(config.read_timeout())?;
        if let Err(e) = transport.clear_input_buffer() {
            tracing::warn!("new: failed to clear input buffer: {} (continuing)", e);
        }
        let writer = transport.try_clone()?;

        let replies = Arc::new(ReplySlot::new());
        let shared = Arc::new(Shared {
            bus: Arc::new(EventBus::new()),
            replies: replies.clone(),
            running: AtomicBool::new(true),
            bulk_load_events: config.bulk_load_events,
        });

        let reader = FrameReader::with_max_len(transport, config.max_line_length);
        let reader_shared = shared.clone();
        let backoff = config.read_timeout();
        let handle = thread::Builder::new()
            .name("centralite-reader".to_string())
            .spawn(move || reader_loop(reader, reader_shared, backoff))?;

        Ok(Self {
            shared,
            channel: CommandChannel::new(writer, replies),
            reader: Mutex::new(Some(handle)),
            config,
        })
    }

    /// Open a serial port and start an engine on it
    pub fn open_serial(link: &LinkConfig, config: EngineConfig) -> Result<Self, ProtocolError> {
        let port = open_port(&link.port_name, Some(link.baud_rate), config.read_timeout())?;
        Self::new(Box::new(port), config)
    }

    /// Connect to a serial-over-TCP bridge ("host:port") and start an engine on it
    pub fn open_tcp(addr: &str, config: EngineConfig) -> Result<Self, ProtocolError> {
        tracing::info!("open_tcp: connecting to {}", addr);
        let stream = TcpStream::connect(addr).map_err(|e| ProtocolError::PortOpen {
            port: addr.to_string(),
            reason: e.to_string(),
        })?;
        Self::new(Box::new(TcpLink::new(stream)), config)
    }

    /// Settings the engine was started with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Bus the reader dispatches to, for adapters that subscribe directly
    pub fn event_bus(&self) -> Arc<EventBus> {
        self.shared.bus.clone()
    }

    /// False once `close` has begun
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Command and reply counters since start
    pub fn stats(&self) -> ChannelStats {
        self.channel.stats()
    }

    // ---- commands ------------------------------------------------------

    /// Turn a load fully on
    pub fn activate_load(&self, id: u16) -> Result<(), ProtocolError> {
        self.channel.send(&Command::ActivateLoad(id))
    }

    /// Turn a load off
    pub fn deactivate_load(&self, id: u16) -> Result<(), ProtocolError> {
        self.channel.send(&Command::DeactivateLoad(id))
    }

    /// Ramp a load to `level` (0-99) at `rate` (0-99); both are clamped
    pub fn set_load_level(&self, id: u16, level: u8, rate: u8) -> Result<(), ProtocolError> {
        self.channel.send(&Command::SetLoadLevel { id, level, rate })
    }

    /// Set a load from a 0-255 brightness
    pub fn set_load_brightness(&self, id: u16, brightness: u8) -> Result<(), ProtocolError> {
        let level = levels::to_narrow(i32::from(brightness));
        self.set_load_level(id, level, DEFAULT_RAMP_RATE)
    }

    /// Ask the panel for a load's level
    ///
    /// `Ok(None)` when the panel did not answer or answered with something
    /// that is not a level.
    pub fn query_load_level(&self, id: u16) -> Result<Option<u8>, ProtocolError> {
        let reply = self
            .channel
            .send_and_await_reply(&Command::QueryLoadLevel(id), self.config.reply_timeout())?;
        let Some(text) = reply else {
            return Ok(None);
        };
        match text.trim().parse::<u8>() {
            Ok(level) if level <= 99 => Ok(Some(level)),
            _ => {
                tracing::debug!("query_load_level: load {} answered {:?}, not a level", id, text);
                Ok(None)
            }
        }
    }

    /// Snapshot every load's on/off state
    ///
    /// Empty when the panel gave no usable answer.
    pub fn query_all_load_states(&self) -> Result<DeviceStates, ProtocolError> {
        self.query_bitmap(Command::QueryAllLoads, decode_loads)
    }

    /// Snapshot every switch's state
    ///
    /// Empty when the panel gave no usable answer.
    pub fn query_all_switch_states(&self) -> Result<DeviceStates, ProtocolError> {
        self.query_bitmap(Command::QueryAllSwitches, decode_switches)
    }

    fn query_bitmap(
        &self,
        command: Command,
        decode: fn(&str) -> Result<DeviceStates, ProtocolError>,
    ) -> Result<DeviceStates, ProtocolError> {
        let wire = command.to_wire();
        let Some(text) = self
            .channel
            .send_and_await_reply(&command, self.config.reply_timeout())?
        else {
            tracing::warn!("query_bitmap: no answer to {}", wire);
            return Ok(DeviceStates::new());
        };
        match decode(&text) {
            Ok(states) => {
                tracing::debug!("query_bitmap: {} decoded {} devices", wire, states.len());
                Ok(states)
            }
            Err(e) => {
                tracing::warn!("query_bitmap: {} answered {:?}: {}", wire, text, e);
                Ok(DeviceStates::new())
            }
        }
    }

    /// Fire a scene; "off" is a separate command on the panel
    pub fn activate_scene(&self, id: u16, direction: SceneDirection) -> Result<(), ProtocolError> {
        self.channel.send(&direction.command(id))
    }

    /// Begin a simulated press; the panel treats a held switch as dimming
    pub fn press_switch(&self, id: u16) -> Result<(), ProtocolError> {
        self.channel.send(&Command::PressSwitch(id))
    }

    /// End a simulated press
    pub fn release_switch(&self, id: u16) -> Result<(), ProtocolError> {
        self.channel.send(&Command::ReleaseSwitch(id))
    }

    /// Press and immediately release a switch
    pub fn tap_switch(&self, id: u16) -> Result<(), ProtocolError> {
        self.press_switch(id)?;
        self.release_switch(id)
    }

    // ---- subscriptions -------------------------------------------------

    /// Call `handler` for every level change of load `id`
    pub fn subscribe_load_change<F>(&self, id: u16, handler: F) -> Subscription
    where
        F: Fn(&PanelEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.bus.subscribe(EventKey::load_change(id), handler)
    }

    /// Call `handler` each time switch `id` goes down
    pub fn subscribe_pressed<F>(&self, id: u16, handler: F) -> Subscription
    where
        F: Fn(&PanelEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.bus.subscribe(EventKey::pressed(id), handler)
    }

    /// Call `handler` each time switch `id` comes back up
    pub fn subscribe_released<F>(&self, id: u16, handler: F) -> Subscription
    where
        F: Fn(&PanelEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.bus.subscribe(EventKey::released(id), handler)
    }

    /// Remove one subscription; false if it was already gone
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.shared.bus.unsubscribe(subscription)
    }

    // ---- lifecycle -----------------------------------------------------

    /// Stop the reader, release the transport and drop all subscriptions
    ///
    /// Safe to call more than once and from a handler. Returns within
    /// about one read timeout.
    pub fn close(&self) {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            tracing::info!("close: stopping reader");
        }

        let handle = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                // Called from a handler; the loop exits once the handler returns
                tracing::debug!("close: called on reader thread, not joining");
            } else if handle.join().is_err() {
                tracing::warn!("close: reader thread panicked");
            }
        }

        self.channel.close();
        self.shared.bus.clear();
    }
}

impl Drop for ProtocolEngine {
    fn drop(&mut self) {
        self.close();
    }
}
