//! Command/reply correlation
//!
//! The protocol has no request ids: the answer to a command is simply the
//! next reply-shaped line. The channel therefore allows one command in
//! flight at a time. The write lock is held from the write until the reply
//! (or timeout), while the reader thread only ever touches the reply slot.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{Command, ProtocolError, Transport};

#[derive(Debug, Default)]
struct SlotState {
    pending: bool,
    reply: Option<String>,
}

/// Single shared slot the reader fills when a reply arrives
#[derive(Debug, Default)]
pub struct ReplySlot {
    state: Mutex<SlotState>,
    arrived: Condvar,
}

impl ReplySlot {
    /// Create an empty, idle slot
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check if a command is waiting for its reply
    pub fn is_pending(&self) -> bool {
        self.lock().pending
    }

    /// Hand a line to the waiting command
    ///
    /// Returns false when nothing is waiting or the reply was already
    /// filled; the caller treats the line as unrecognized.
    pub fn offer(&self, line: &str) -> bool {
        let mut state = self.lock();
        if !state.pending || state.reply.is_some() {
            return false;
        }
        state.reply = Some(line.to_string());
        self.arrived.notify_all();
        true
    }

    /// Clear any stale reply and mark a command as pending
    fn arm(&self) {
        let mut state = self.lock();
        state.pending = true;
        state.reply = None;
    }

    fn disarm(&self) {
        let mut state = self.lock();
        state.pending = false;
        state.reply = None;
    }

    fn wait(&self, timeout: Duration) -> Option<String> {
        let guard = self.lock();
        let (mut state, _) = self
            .arrived
            .wait_timeout_while(guard, timeout, |s| s.reply.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        state.pending = false;
        state.reply.take()
    }
}

/// Cumulative channel counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Commands written to the transport
    pub commands_sent: u64,
    /// Queries that got an answer
    pub replies_received: u64,
    /// Queries that gave up waiting
    pub reply_timeouts: u64,
}

/// Serializes commands onto the transport and pairs them with replies
pub struct CommandChannel {
    writer: Mutex<Option<Box<dyn Transport>>>,
    replies: Arc<ReplySlot>,
    commands_sent: AtomicU64,
    replies_received: AtomicU64,
    reply_timeouts: AtomicU64,
}

impl CommandChannel {
    /// Channel writing to `writer` and waiting on `replies`
    pub fn new(writer: Box<dyn Transport>, replies: Arc<ReplySlot>) -> Self {
        Self {
            writer: Mutex::new(Some(writer)),
            replies,
            commands_sent: AtomicU64::new(0),
            replies_received: AtomicU64::new(0),
            reply_timeouts: AtomicU64::new(0),
        }
    }

    fn lock_writer(&self) -> MutexGuard<'_, Option<Box<dyn Transport>>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write a command without waiting for any answer
    pub fn send(&self, command: &Command) -> Result<(), ProtocolError> {
        command.validate()?;
        let mut writer = self.lock_writer();
        let port = writer.as_mut().ok_or(ProtocolError::Closed)?;
        tracing::debug!("send: {}", command.to_wire());
        self.write_command(port, command)
    }

    /// Write a command and wait up to `timeout` for the next reply line
    ///
    /// `Ok(None)` means the panel did not answer in time.
    pub fn send_and_await_reply(
        &self,
        command: &Command,
        timeout: Duration,
    ) -> Result<Option<String>, ProtocolError> {
        debug_assert!(command.expects_reply(), "{:?} gets no reply", command);
        command.validate()?;
        let mut writer = self.lock_writer();
        let port = writer.as_mut().ok_or(ProtocolError::Closed)?;

        self.replies.arm();
        tracing::debug!("send_and_await_reply: {}", command.to_wire());
        if let Err(e) = self.write_command(port, command) {
            self.replies.disarm();
            return Err(e);
        }

        let reply = self.replies.wait(timeout);
        match &reply {
            Some(line) => {
                self.replies_received.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("send_and_await_reply: {} -> {:?}", command.to_wire(), line);
            }
            None => {
                self.reply_timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "send_and_await_reply: no reply to {} within {}ms",
                    command.to_wire(),
                    timeout.as_millis()
                );
            }
        }
        Ok(reply)
    }

    fn write_command(
        &self,
        port: &mut Box<dyn Transport>,
        command: &Command,
    ) -> Result<(), ProtocolError> {
        port.write_all(&command.to_bytes())?;
        port.flush()?;
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Release the transport; later sends fail with `Closed`
    ///
    /// Blocks until an in-flight command finishes or times out.
    pub fn close(&self) {
        if self.lock_writer().take().is_some() {
            tracing::debug!("close: command channel released transport");
        }
    }

    /// Check if `close` has released the transport
    pub fn is_closed(&self) -> bool {
        self.lock_writer().is_none()
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            replies_received: self.replies_received.load(Ordering::Relaxed),
            reply_timeouts: self.reply_timeouts.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Read};
    use std::thread;
    use std::time::Instant;

    /// Write-only transport recording everything written
    #[derive(Clone, Default)]
    struct RecordingTransport {
        written: Arc<Mutex<Vec<u8>>>,
        fail_writes: bool,
    }

    impl Read for RecordingTransport {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"))
        }
    }

    impl Write for RecordingTransport {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
            }
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for RecordingTransport {
        fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
            Ok(())
        }

        fn clear_input_buffer(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
            Ok(Box::new(self.clone()))
        }
    }

    fn channel() -> (Arc<CommandChannel>, Arc<ReplySlot>, RecordingTransport) {
        let transport = RecordingTransport::default();
        let slot = Arc::new(ReplySlot::new());
        let channel = CommandChannel::new(Box::new(transport.clone()), slot.clone());
        (Arc::new(channel), slot, transport)
    }

    #[test]
    fn test_send_writes_cr_terminated_command() {
        let (channel, slot, transport) = channel();
        channel.send(&Command::ActivateLoad(7)).unwrap();
        assert_eq!(*transport.written.lock().unwrap(), b"^A007\r".to_vec());
        assert!(!slot.is_pending());
        assert_eq!(channel.stats().commands_sent, 1);
    }

    #[test]
    fn test_offer_without_pending_is_rejected() {
        let slot = ReplySlot::new();
        assert!(!slot.offer("42"));
    }

    #[test]
    fn test_reply_delivered_to_waiting_caller() {
        let (channel, slot, _transport) = channel();

        let responder = thread::spawn(move || {
            while !slot.is_pending() {
                thread::sleep(Duration::from_millis(1));
            }
            assert!(slot.offer("42"));
            // A second line for the same command is not taken
            assert!(!slot.offer("43"));
        });

        let reply = channel
            .send_and_await_reply(&Command::QueryLoadLevel(1), Duration::from_secs(2))
            .unwrap();
        responder.join().unwrap();
        assert_eq!(reply.as_deref(), Some("42"));
        assert_eq!(channel.stats().replies_received, 1);
    }

    #[test]
    fn test_timeout_returns_none() {
        let (channel, slot, _transport) = channel();
        let start = Instant::now();
        let reply = channel
            .send_and_await_reply(&Command::QueryLoadLevel(1), Duration::from_millis(50))
            .unwrap();
        assert!(reply.is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(!slot.is_pending());
        assert_eq!(channel.stats().reply_timeouts, 1);
    }

    #[test]
    fn test_stale_reply_is_cleared_before_next_command() {
        let (channel, slot, _transport) = channel();

        // First command times out; a late reply arrives afterwards
        let first = channel
            .send_and_await_reply(&Command::QueryLoadLevel(1), Duration::from_millis(10))
            .unwrap();
        assert!(first.is_none());
        assert!(!slot.offer("late"));

        let second = channel
            .send_and_await_reply(&Command::QueryLoadLevel(2), Duration::from_millis(10))
            .unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn test_write_failure_propagates_and_disarms() {
        let transport = RecordingTransport {
            fail_writes: true,
            ..Default::default()
        };
        let slot = Arc::new(ReplySlot::new());
        let channel = CommandChannel::new(Box::new(transport), slot.clone());

        let result = channel.send_and_await_reply(&Command::QueryAllLoads, Duration::from_secs(1));
        assert!(matches!(result, Err(ProtocolError::IoError(_))));
        assert!(!slot.is_pending());
    }

    #[test]
    fn test_out_of_range_id_is_never_written() {
        let (channel, slot, transport) = channel();
        channel.send(&Command::ActivateLoad(999)).unwrap();

        assert!(matches!(
            channel.send(&Command::ActivateLoad(1234)),
            Err(ProtocolError::InvalidId(1234))
        ));
        assert!(matches!(
            channel.send_and_await_reply(&Command::QueryLoadLevel(1000), Duration::from_secs(1)),
            Err(ProtocolError::InvalidId(1000))
        ));
        assert_eq!(*transport.written.lock().unwrap(), b"^A999\r".to_vec());
        assert!(!slot.is_pending());
        assert_eq!(channel.stats().commands_sent, 1);
    }

    #[test]
    fn test_closed_channel_rejects_commands() {
        let (channel, _slot, _transport) = channel();
        channel.close();
        assert!(channel.is_closed());
        assert!(matches!(
            channel.send(&Command::ActivateLoad(1)),
            Err(ProtocolError::Closed)
        ));
        assert!(matches!(
            channel.send_and_await_reply(&Command::QueryAllLoads, Duration::from_millis(10)),
            Err(ProtocolError::Closed)
        ));
    }

    #[test]
    fn test_concurrent_callers_are_serialized() {
        let (channel, slot, transport) = channel();

        // Answers each command with its own wire text once it is pending
        let written = transport.written.clone();
        let responder = thread::spawn(move || {
            let mut answered = 0;
            while answered < 2 {
                let text = String::from_utf8(written.lock().unwrap().clone()).unwrap();
                let commands: Vec<&str> = text.split_terminator('\r').collect();
                // Slot is armed before the write lands; wait for the bytes too
                if slot.is_pending() && commands.len() == answered + 1 {
                    let last = commands[answered];
                    if slot.offer(&format!("reply:{last}")) {
                        answered += 1;
                    }
                }
                thread::sleep(Duration::from_millis(1));
            }
        });

        let handles: Vec<_> = [1u16, 2]
            .into_iter()
            .map(|id| {
                let channel = channel.clone();
                thread::spawn(move || {
                    let reply = channel
                        .send_and_await_reply(&Command::QueryLoadLevel(id), Duration::from_secs(2))
                        .unwrap();
                    (id, reply)
                })
            })
            .collect();

        for handle in handles {
            let (id, reply) = handle.join().unwrap();
            assert_eq!(reply, Some(format!("reply:^F{:03}", id)));
        }
        responder.join().unwrap();
    }
}
