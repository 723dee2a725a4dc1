//! Ring buffer, receiver/processor threads, and the handler chain (§4.5).
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::wire::RtpPacket;
use std::collections::{HashMap, VecDeque};
use std::net::{SocketAddr, UdpSocket};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// What a handler did with one packet (§4.5).
#[derive(Debug, Clone)]
pub enum HandlerOutcome {
    /// Pass the packet, unmodified, to the next handler.
    Ok,
    /// This handler does not apply; try the next one.
    PktNotHandled,
    /// The packet was rewritten in place; re-dispatch from the top so
    /// later handlers see the new bytes.
    PktModified(Vec<u8>),
    /// A frame is ready for delivery.
    PktReady(RtpPacket),
    /// More than one frame is ready at once (an aggregation packet
    /// expanding into several NAL units).
    MultiplePktsReady(Vec<RtpPacket>),
    /// Contained failure: log and drop this packet.
    GenericError(String),
}

/// A boxed handler: remote-SSRC filter (0 = any) plus the function.
type HandlerFn = Box<dyn Fn(&[u8], SocketAddr) -> HandlerOutcome + Send + Sync>;

struct Installed {
    token: u64,
    remote_ssrc: u32,
    handler: HandlerFn,
}

struct Slot {
    data: Vec<u8>,
    len: usize,
    from: Option<SocketAddr>,
}

/// Fixed-capacity SPSC ring of received datagrams. The receiver thread
/// writes, the processor thread reads; overtaking the processor drops
/// the oldest unread slot.
struct RingBuffer {
    slots: Vec<Mutex<Slot>>,
    read_index: AtomicUsize,
    write_index: AtomicUsize,
}

impl RingBuffer {
    fn new(capacity: usize, payload_size: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| {
                Mutex::new(Slot {
                    data: vec![0u8; payload_size],
                    len: 0,
                    from: None,
                })
            })
            .collect();
        Self {
            slots,
            read_index: AtomicUsize::new(0),
            write_index: AtomicUsize::new(0),
        }
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Handles reception for one socket: receiver thread polls and writes
/// into the ring, processor thread walks the handler chain.
pub struct ReceptionFlow {
    ring: Arc<RingBuffer>,
    handlers: Arc<Mutex<Vec<Installed>>>,
    next_token: AtomicUsize,
    should_stop: Arc<AtomicBool>,
    wait: Arc<(Mutex<bool>, Condvar)>,
    delivery: Arc<Mutex<VecDeque<RtpPacket>>>,
    per_ssrc_delivery: Arc<Mutex<HashMap<u32, VecDeque<RtpPacket>>>>,
    receiver_thread: Option<JoinHandle<()>>,
    processor_thread: Option<JoinHandle<()>>,
    poll_timeout_ms: i32,
}

impl ReceptionFlow {
    pub fn new(ring_capacity: usize, payload_size: usize) -> Self {
        Self {
            ring: Arc::new(RingBuffer::new(ring_capacity, payload_size)),
            handlers: Arc::new(Mutex::new(Vec::new())),
            next_token: AtomicUsize::new(1),
            should_stop: Arc::new(AtomicBool::new(false)),
            wait: Arc::new((Mutex::new(false), Condvar::new())),
            delivery: Arc::new(Mutex::new(VecDeque::new())),
            per_ssrc_delivery: Arc::new(Mutex::new(HashMap::new())),
            receiver_thread: None,
            processor_thread: None,
            poll_timeout_ms: 100,
        }
    }

    pub fn set_poll_timeout_ms(&mut self, timeout_ms: i32) {
        self.poll_timeout_ms = timeout_ms;
    }

    /// Register a handler, returning a token that can later be used to
    /// remove it. `remote_ssrc == 0` matches every source.
    pub fn install_handler(&self, remote_ssrc: u32, handler: HandlerFn) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst) as u64;
        self.handlers.lock().unwrap().push(Installed {
            token,
            remote_ssrc,
            handler,
        });
        token
    }

    pub fn remove_handler(&self, token: u64) {
        self.handlers.lock().unwrap().retain(|h| h.token != token);
    }

    /// Spawn the receiver and processor threads for `socket`.
    pub fn start(&mut self, socket: UdpSocket) {
        socket
            .set_nonblocking(true)
            .expect("non-blocking mode is required for poll-driven reception");
        let socket = Arc::new(socket);

        let ring = self.ring.clone();
        let should_stop = self.should_stop.clone();
        let wait = self.wait.clone();
        let poll_timeout_ms = self.poll_timeout_ms;
        let recv_socket = socket.clone();

        self.receiver_thread = Some(thread::spawn(move || {
            receiver_loop(recv_socket, ring, should_stop, wait, poll_timeout_ms);
        }));

        let ring = self.ring.clone();
        let should_stop = self.should_stop.clone();
        let wait = self.wait.clone();
        let handlers = self.handlers.clone();
        let delivery = self.delivery.clone();
        let per_ssrc_delivery = self.per_ssrc_delivery.clone();

        self.processor_thread = Some(thread::spawn(move || {
            processor_loop(ring, should_stop, wait, handlers, delivery, per_ssrc_delivery);
        }));
    }

    /// Signal both threads to exit and join them.
    pub fn stop(&mut self) {
        self.should_stop.store(true, Ordering::SeqCst);
        {
            let (lock, cvar) = &*self.wait;
            let mut woken = lock.lock().unwrap();
            *woken = true;
            cvar.notify_all();
        }
        if let Some(handle) = self.receiver_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.processor_thread.take() {
            let _ = handle.join();
        }
    }

    /// Block up to `timeout` for a delivered frame from any source.
    pub fn pull_frame(&self, timeout: Duration) -> Option<RtpPacket> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let Some(frame) = self.delivery.lock().unwrap().pop_front() {
                return Some(frame);
            }
            if std::time::Instant::now() >= deadline {
                return None;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Block up to `timeout` for a delivered frame from `remote_ssrc`.
    pub fn pull_frame_from(&self, remote_ssrc: u32, timeout: Duration) -> Option<RtpPacket> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let Some(queue) = self.per_ssrc_delivery.lock().unwrap().get_mut(&remote_ssrc) {
                if let Some(frame) = queue.pop_front() {
                    return Some(frame);
                }
            }
            if std::time::Instant::now() >= deadline {
                return None;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

fn receiver_loop(
    socket: Arc<UdpSocket>,
    ring: Arc<RingBuffer>,
    should_stop: Arc<AtomicBool>,
    wait: Arc<(Mutex<bool>, Condvar)>,
    poll_timeout_ms: i32,
) {
    let fd = socket.as_raw_fd();
    let mut buf = vec![0u8; 65536];

    while !should_stop.load(Ordering::SeqCst) {
        let mut pollfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let ready = unsafe { libc::poll(&mut pollfd, 1, poll_timeout_ms) };
        if ready <= 0 {
            continue;
        }

        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                let ring_len = ring.len();
                let write = ring.write_index.load(Ordering::SeqCst);
                let next_write = (write + 1) % ring_len;
                let read = ring.read_index.load(Ordering::SeqCst);
                if next_write == read {
                    warn!("ring buffer full, overwriting oldest unread datagram");
                    ring.read_index
                        .store((read + 1) % ring_len, Ordering::SeqCst);
                }

                {
                    let mut slot = ring.slots[write].lock().unwrap();
                    if slot.data.len() < len {
                        slot.data.resize(len, 0);
                    }
                    slot.data[..len].copy_from_slice(&buf[..len]);
                    slot.len = len;
                    slot.from = Some(from);
                }
                ring.write_index.store(next_write, Ordering::SeqCst);

                let (lock, cvar) = &*wait;
                let mut woken = lock.lock().unwrap();
                *woken = true;
                cvar.notify_one();
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(err) => {
                warn!(error = %err, "recv_from failed");
            }
        }
    }
}

fn processor_loop(
    ring: Arc<RingBuffer>,
    should_stop: Arc<AtomicBool>,
    wait: Arc<(Mutex<bool>, Condvar)>,
    handlers: Arc<Mutex<Vec<Installed>>>,
    delivery: Arc<Mutex<VecDeque<RtpPacket>>>,
    per_ssrc_delivery: Arc<Mutex<HashMap<u32, VecDeque<RtpPacket>>>>,
) {
    let ring_len = ring.len();

    while !should_stop.load(Ordering::SeqCst) {
        {
            let (lock, cvar) = &*wait;
            let mut woken = lock.lock().unwrap();
            while !*woken && !should_stop.load(Ordering::SeqCst) {
                woken = cvar.wait_timeout(woken, Duration::from_millis(200)).unwrap().0;
            }
            *woken = false;
        }

        loop {
            let read = ring.read_index.load(Ordering::SeqCst);
            let write = ring.write_index.load(Ordering::SeqCst);
            if read == write {
                break;
            }

            let (bytes, from) = {
                let slot = ring.slots[read].lock().unwrap();
                (slot.data[..slot.len].to_vec(), slot.from)
            };
            ring.read_index.store((read + 1) % ring_len, Ordering::SeqCst);

            let Some(from) = from else { continue };
            dispatch(&bytes, from, &handlers, &delivery, &per_ssrc_delivery);
        }
    }
}

fn dispatch(
    bytes: &[u8],
    from: SocketAddr,
    handlers: &Arc<Mutex<Vec<Installed>>>,
    delivery: &Arc<Mutex<VecDeque<RtpPacket>>>,
    per_ssrc_delivery: &Arc<Mutex<HashMap<u32, VecDeque<RtpPacket>>>>,
) {
    // SSRC sits at the same byte offset in the RTP and RTCP common
    // header, so it can be read before any format-specific parsing to
    // filter which installed handlers this packet is even offered to.
    let source_ssrc = if bytes.len() >= 12 {
        u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]])
    } else {
        0
    };

    let mut current = bytes.to_vec();
    let guard = handlers.lock().unwrap();
    for installed in guard.iter() {
        if installed.remote_ssrc != 0 && installed.remote_ssrc != source_ssrc {
            continue;
        }
        trace!(token = installed.token, "dispatching to handler");
        match (installed.handler)(&current, from) {
            HandlerOutcome::Ok => continue,
            HandlerOutcome::PktNotHandled => continue,
            HandlerOutcome::PktModified(new_bytes) => {
                current = new_bytes;
                continue;
            }
            HandlerOutcome::PktReady(packet) => {
                debug!(ssrc = packet.header.ssrc, "frame ready");
                let ssrc = packet.header.ssrc;
                let mut per_ssrc = per_ssrc_delivery.lock().unwrap();
                if let Some(queue) = per_ssrc.get_mut(&ssrc) {
                    queue.push_back(packet);
                } else {
                    delivery.lock().unwrap().push_back(packet);
                }
                return;
            }
            HandlerOutcome::MultiplePktsReady(packets) => {
                let mut per_ssrc = per_ssrc_delivery.lock().unwrap();
                for packet in packets {
                    debug!(ssrc = packet.header.ssrc, "frame ready (aggregate)");
                    let ssrc = packet.header.ssrc;
                    if let Some(queue) = per_ssrc.get_mut(&ssrc) {
                        queue.push_back(packet);
                    } else {
                        delivery.lock().unwrap().push_back(packet);
                    }
                }
                return;
            }
            HandlerOutcome::GenericError(reason) => {
                warn!(reason, "packet dropped by handler chain");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_wraps_at_capacity() {
        let ring = RingBuffer::new(4, 16);
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.read_index.load(Ordering::SeqCst), 0);
        assert_eq!(ring.write_index.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn install_and_remove_handler() {
        let flow = ReceptionFlow::new(16, 1500);
        let token = flow.install_handler(0, Box::new(|_bytes, _from| HandlerOutcome::PktNotHandled));
        assert_eq!(flow.handlers.lock().unwrap().len(), 1);
        flow.remove_handler(token);
        assert_eq!(flow.handlers.lock().unwrap().len(), 0);
    }

    #[test]
    fn end_to_end_delivers_a_frame() {
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let receiver_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let recv_addr = receiver_socket.local_addr().unwrap();

        let mut flow = ReceptionFlow::new(64, 1500);
        flow.install_handler(
            0,
            Box::new(|bytes, _from| match RtpPacket::parse(bytes) {
                Ok(packet) => HandlerOutcome::PktReady(packet),
                Err(_) => HandlerOutcome::GenericError("bad packet".into()),
            }),
        );
        flow.start(receiver_socket);

        let header = crate::wire::RtpHeader {
            version: 2,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: true,
            payload_type: 96,
            sequence_number: 42,
            timestamp: 9000,
            ssrc: 0x1234,
            csrc: vec![],
            extension_header: None,
        };
        let mut buf = header.serialize();
        buf.extend_from_slice(b"hello");
        sender.send_to(&buf, recv_addr).unwrap();

        let frame = flow.pull_frame(Duration::from_secs(2));
        flow.stop();

        let frame = frame.expect("frame should have been delivered");
        assert_eq!(frame.header.sequence_number, 42);
        assert_eq!(&frame.payload[..], b"hello");
    }
}
