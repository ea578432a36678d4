//! Delivery Classes
//!
//! The two delivery guarantees the protocol needs, abstracted behind a
//! trait so the session logic never touches sockets:
//!
//! - **reliable**: delivered exactly once, in order (snapshots).
//! - **redundant**: retransmitted with every flush until the peer
//!   acknowledges it (per-step entropy, where latency matters more than
//!   bandwidth).
//!
//! [`loopback_pair`] is the in-memory implementation used by tests and
//! the demo binary, with scriptable drop and duplication for the
//! redundant class.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// One side of a bidirectional connection.
pub trait Transport {
    /// Queue a payload for exactly-once, in-order delivery.
    fn send_reliable(&mut self, payload: Vec<u8>);

    /// Queue a payload for redundant delivery: it is retransmitted on
    /// every flush until acknowledged by the peer.
    fn post_redundant(&mut self, payload: Vec<u8>);

    /// Transmit everything queued, including redundant retransmissions
    /// and acknowledgements for payloads received so far.
    fn flush(&mut self);

    /// Drain received payloads in delivery order. Acknowledgements and
    /// duplicate suppression happen internally.
    fn receive(&mut self) -> Vec<Vec<u8>>;
}

/// Scripted fault injection for the redundant class.
///
/// Faults are scheduled per frame on its transmission-attempt counter, so
/// a frame dropped on one flush is retransmitted on a later attempt and
/// still gets through. A modulo of 0 disables the fault; a `drop_modulo`
/// of 1 drops every attempt and models a dead link. Reliable frames are
/// never faulted.
#[derive(Clone, Copy, Debug, Default)]
pub struct FaultPlan {
    /// Drop every Nth transmission attempt of each frame, counting from
    /// the first.
    pub drop_modulo: u64,
    /// Transmit every Nth attempt of each frame twice.
    pub duplicate_modulo: u64,
}

#[derive(Clone, Debug)]
enum Frame {
    Reliable(Vec<u8>),
    Redundant { id: u64, payload: Vec<u8> },
    Ack { up_to: u64 },
}

type Wire = Rc<RefCell<VecDeque<Frame>>>;

/// A redundant payload awaiting acknowledgement, with its per-frame
/// transmission-attempt counter driving fault scheduling.
#[derive(Clone, Debug)]
struct PendingFrame {
    id: u64,
    attempts: u64,
    payload: Vec<u8>,
}

/// In-memory [`Transport`] endpoint created by [`loopback_pair`].
pub struct LoopbackEndpoint {
    outgoing: Wire,
    incoming: Wire,
    /// Redundant payloads not yet acknowledged by the peer.
    pending: VecDeque<PendingFrame>,
    next_id: u64,
    /// Highest redundant id delivered in order from the peer.
    received_up_to: u64,
    /// Fault injection applied to outgoing redundant frames.
    pub faults: FaultPlan,
}

/// Create two connected in-memory endpoints.
pub fn loopback_pair() -> (LoopbackEndpoint, LoopbackEndpoint) {
    let a_to_b: Wire = Rc::new(RefCell::new(VecDeque::new()));
    let b_to_a: Wire = Rc::new(RefCell::new(VecDeque::new()));

    let a = LoopbackEndpoint::new(a_to_b.clone(), b_to_a.clone());
    let b = LoopbackEndpoint::new(b_to_a, a_to_b);
    (a, b)
}

impl LoopbackEndpoint {
    fn new(outgoing: Wire, incoming: Wire) -> Self {
        Self {
            outgoing,
            incoming,
            pending: VecDeque::new(),
            next_id: 1,
            received_up_to: 0,
            faults: FaultPlan::default(),
        }
    }

    fn transmit_redundant(&mut self, id: u64, attempt: u64, payload: Vec<u8>) {
        if self.faults.drop_modulo != 0 && attempt % self.faults.drop_modulo == 0 {
            return;
        }

        let frame = Frame::Redundant { id, payload };
        if self.faults.duplicate_modulo != 0 && attempt % self.faults.duplicate_modulo == 0 {
            self.outgoing.borrow_mut().push_back(frame.clone());
        }
        self.outgoing.borrow_mut().push_back(frame);
    }

    /// Count of redundant payloads awaiting acknowledgement.
    pub fn unacknowledged(&self) -> usize {
        self.pending.len()
    }
}

impl Transport for LoopbackEndpoint {
    fn send_reliable(&mut self, payload: Vec<u8>) {
        self.outgoing.borrow_mut().push_back(Frame::Reliable(payload));
    }

    fn post_redundant(&mut self, payload: Vec<u8>) {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.push_back(PendingFrame {
            id,
            attempts: 0,
            payload,
        });
    }

    fn flush(&mut self) {
        if self.received_up_to > 0 {
            self.outgoing.borrow_mut().push_back(Frame::Ack {
                up_to: self.received_up_to,
            });
        }

        for i in 0..self.pending.len() {
            let (id, attempt, payload) = {
                let frame = &mut self.pending[i];
                let attempt = frame.attempts;
                frame.attempts += 1;
                (frame.id, attempt, frame.payload.clone())
            };
            self.transmit_redundant(id, attempt, payload);
        }
    }

    fn receive(&mut self) -> Vec<Vec<u8>> {
        let frames: Vec<Frame> = self.incoming.borrow_mut().drain(..).collect();
        let mut delivered = Vec::new();

        for frame in frames {
            match frame {
                Frame::Reliable(payload) => delivered.push(payload),
                Frame::Redundant { id, payload } => {
                    // Deliver only the next expected id. Duplicates and
                    // frames beyond a gap are ignored: the peer keeps
                    // retransmitting until acknowledged.
                    if id == self.received_up_to + 1 {
                        self.received_up_to = id;
                        delivered.push(payload);
                    }
                }
                Frame::Ack { up_to } => {
                    while let Some(frame) = self.pending.front() {
                        if frame.id > up_to {
                            break;
                        }
                        self.pending.pop_front();
                    }
                }
            }
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reliable_delivery_in_order() {
        let (mut a, mut b) = loopback_pair();

        a.send_reliable(vec![1]);
        a.send_reliable(vec![2]);
        a.flush();

        assert_eq!(b.receive(), vec![vec![1], vec![2]]);
        assert_eq!(b.receive(), Vec::<Vec<u8>>::new());
    }

    #[test]
    fn test_redundant_resends_until_acked() {
        let (mut a, mut b) = loopback_pair();

        a.post_redundant(vec![10]);
        a.flush();
        assert_eq!(b.receive(), vec![vec![10]]);
        assert_eq!(a.unacknowledged(), 1);

        // Retransmissions of the delivered payload are suppressed.
        a.flush();
        assert_eq!(b.receive(), Vec::<Vec<u8>>::new());

        // The ack travels on b's next flush and clears the backlog.
        b.flush();
        a.receive();
        assert_eq!(a.unacknowledged(), 0);
    }

    #[test]
    fn test_redundant_survives_drops() {
        let (mut a, mut b) = loopback_pair();
        a.faults.drop_modulo = 2;

        for n in 0u8..4 {
            a.post_redundant(vec![n]);
        }

        // Flush until everything got through despite every second attempt
        // of each frame being dropped.
        let mut delivered = Vec::new();
        let mut rounds = 0;
        for _ in 0..16 {
            rounds += 1;
            a.flush();
            delivered.extend(b.receive());
            b.flush();
            a.receive();
            if a.unacknowledged() == 0 {
                break;
            }
        }

        assert_eq!(delivered, vec![vec![0], vec![1], vec![2], vec![3]]);
        assert!(rounds > 1, "the first attempts were dropped");
    }

    #[test]
    fn test_frames_posted_between_flushes_still_get_through() {
        let (mut a, mut b) = loopback_pair();
        a.faults.drop_modulo = 2;

        let mut delivered = Vec::new();
        for n in 0u8..6 {
            a.post_redundant(vec![n]);
            a.flush();
            delivered.extend(b.receive());
            b.flush();
            a.receive();
        }
        for _ in 0..8 {
            a.flush();
            delivered.extend(b.receive());
            b.flush();
            a.receive();
            if a.unacknowledged() == 0 {
                break;
            }
        }

        assert_eq!(a.unacknowledged(), 0);
        assert_eq!(
            delivered,
            (0u8..6).map(|n| vec![n]).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_duplicates_suppressed() {
        let (mut a, mut b) = loopback_pair();
        a.faults.duplicate_modulo = 1;

        a.post_redundant(vec![7]);
        a.flush();
        a.flush();

        assert_eq!(b.receive(), vec![vec![7]]);
    }

    #[test]
    fn test_directions_are_independent() {
        let (mut a, mut b) = loopback_pair();

        a.post_redundant(vec![1]);
        b.post_redundant(vec![2]);
        a.flush();
        b.flush();

        assert_eq!(b.receive(), vec![vec![1]]);
        assert_eq!(a.receive(), vec![vec![2]]);
    }
}
