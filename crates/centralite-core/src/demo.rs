//! Demo Mode - Simulated panel for testing without hardware
//!
//! `SimulatedPanel` implements [`Transport`] and behaves like a small
//! panel: it answers level and bitmap queries, echoes `^K` events when a
//! load changes, and turns simulated presses into `P`/`R` events. Clones
//! share the same panel so a test can keep a handle after giving one to
//! the engine.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::levels;
use crate::protocol::{encode_loads, encode_switches, Command, DeviceStates, Transport};

/// Loads addressable through a 48 digit bitmap
pub const SIMULATED_LOADS: u16 = 192;
/// Switches addressable through a 96 digit bitmap
pub const SIMULATED_SWITCHES: u16 = 384;

struct PanelState {
    /// Level per load, index 0 is load 1
    levels: Vec<u8>,
    switches: DeviceStates,
    /// Bytes waiting to be read by the host
    outbound: VecDeque<u8>,
    /// Bytes written by the host that do not yet end in CR
    inbound: Vec<u8>,
    /// Every complete command received, without CR
    received: Vec<String>,
    mute_replies: bool,
    rng: StdRng,
}

struct PanelShared {
    state: Mutex<PanelState>,
    readable: Condvar,
}

/// In-memory panel implementing Transport
#[derive(Clone)]
pub struct SimulatedPanel {
    shared: Arc<PanelShared>,
    read_timeout: Duration,
}

impl Default for SimulatedPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPanel {
    /// Create a panel with every load off and a random activity seed
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create a panel whose random activity is reproducible
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        let state = PanelState {
            levels: vec![0; usize::from(SIMULATED_LOADS)],
            switches: (1..=SIMULATED_SWITCHES).map(|id| (id, false)).collect(),
            outbound: VecDeque::new(),
            inbound: Vec::new(),
            received: Vec::new(),
            mute_replies: false,
            rng,
        };
        Self {
            shared: Arc::new(PanelShared {
                state: Mutex::new(state),
                readable: Condvar::new(),
            }),
            read_timeout: Duration::from_millis(50),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PanelState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a line (CR appended) for the host to read
    pub fn inject_line(&self, line: &str) {
        let mut state = self.lock();
        push_line(&mut state, line);
        self.shared.readable.notify_all();
    }

    /// Queue raw bytes for the host to read
    pub fn inject_bytes(&self, bytes: &[u8]) {
        let mut state = self.lock();
        state.outbound.extend(bytes.iter().copied());
        self.shared.readable.notify_all();
    }

    /// Stop answering queries (push events still flow)
    pub fn set_mute_replies(&self, mute: bool) {
        self.lock().mute_replies = mute;
    }

    /// Commands received so far, in order, without CR
    pub fn received_commands(&self) -> Vec<String> {
        self.lock().received.clone()
    }

    /// Current level of a load, `None` outside 1-192
    pub fn load_level(&self, id: u16) -> Option<u8> {
        let state = self.lock();
        level_slot(id).map(|i| state.levels[i])
    }

    /// Change a load without emitting an event
    pub fn set_load_level(&self, id: u16, level: u8) {
        let mut state = self.lock();
        if let Some(i) = level_slot(id) {
            state.levels[i] = level.min(99);
        }
    }

    /// Change a switch state without emitting an event
    pub fn set_switch(&self, id: u16, on: bool) {
        self.lock().switches.insert(id, on);
    }

    /// Generate one burst of random activity and return the lines emitted
    ///
    /// Either a switch tap (press then release) or a load level change.
    pub fn emit_random_activity(&self) -> Vec<String> {
        let mut state = self.lock();
        let before = state.outbound.len();
        if state.rng.gen_bool(0.5) {
            let id = state.rng.gen_range(1..=96);
            push_line(&mut state, &format!("P{:04}", id));
            push_line(&mut state, &format!("R{:04}", id));
        } else {
            let id = state.rng.gen_range(1..=48);
            let level = state.rng.gen_range(0..=99);
            change_level(&mut state, id, level);
        }
        let emitted: Vec<u8> = state.outbound.iter().skip(before).copied().collect();
        self.shared.readable.notify_all();
        String::from_utf8_lossy(&emitted)
            .split_terminator('\r')
            .map(str::to_string)
            .collect()
    }

    fn handle_command(&self, state: &mut PanelState, text: &str) {
        state.received.push(text.to_string());

        let Some(command) = Command::parse(text) else {
            tracing::debug!("simulated panel: ignoring {:?}", text);
            return;
        };

        match command {
            Command::ActivateLoad(id) => change_level(state, id, 99),
            Command::DeactivateLoad(id) => change_level(state, id, 0),
            Command::SetLoadLevel { id, level, .. } => change_level(state, id, level),
            Command::QueryLoadLevel(id) => {
                let level = level_slot(id).map_or(0, |i| state.levels[i]);
                reply(state, &format!("{:02}", level));
            }
            Command::QueryAllLoads => {
                let states: DeviceStates = state
                    .levels
                    .iter()
                    .enumerate()
                    .map(|(i, &level)| (i as u16 + 1, levels::is_on(level)))
                    .collect();
                reply(state, &encode_loads(&states));
            }
            Command::QueryAllSwitches => {
                let bitmap = encode_switches(&state.switches);
                reply(state, &bitmap);
            }
            Command::PressSwitch(id) => {
                state.switches.insert(id, true);
                push_line(state, &format!("P{:04}", id));
            }
            Command::ReleaseSwitch(id) => {
                state.switches.insert(id, false);
                push_line(state, &format!("R{:04}", id));
            }
            Command::SceneOn(_) | Command::SceneOff(_) => {}
        }
    }
}

fn level_slot(id: u16) -> Option<usize> {
    (1..=SIMULATED_LOADS)
        .contains(&id)
        .then(|| usize::from(id - 1))
}

fn push_line(state: &mut PanelState, line: &str) {
    state.outbound.extend(line.bytes());
    state.outbound.push_back(b'\r');
}

fn reply(state: &mut PanelState, line: &str) {
    if !state.mute_replies {
        push_line(state, line);
    }
}

fn change_level(state: &mut PanelState, id: u16, level: u8) {
    let Some(i) = level_slot(id) else {
        return;
    };
    let level = level.min(99);
    if state.levels[i] != level {
        state.levels[i] = level;
        push_line(state, &format!("^K{:03}{:02}", id, level));
    }
}

impl Read for SimulatedPanel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let guard = self.lock();
        let (mut state, _) = self
            .shared
            .readable
            .wait_timeout_while(guard, self.read_timeout, |s| s.outbound.is_empty())
            .unwrap_or_else(PoisonError::into_inner);

        if state.outbound.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "simulated read timeout"));
        }
        let n = buf.len().min(state.outbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.outbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedPanel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        state.inbound.extend_from_slice(buf);
        while let Some(pos) = state.inbound.iter().position(|&b| b == b'\r') {
            let line: Vec<u8> = state.inbound.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..pos]).into_owned();
            self.handle_command(&mut state, &text);
        }
        self.shared.readable.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for SimulatedPanel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.read_timeout = timeout;
        Ok(())
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.lock().outbound.clear();
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(self.clone()))
    }
}
