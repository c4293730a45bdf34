//! A reducing queue for pending wire messages.
//!
//! Controller sweeps and parameter readbacks arrive in bursts far denser
//! than anything downstream needs. Between two poll drains, an incoming
//! control-change supersedes any queued one with the same
//! `(channel, control)` and an incoming sysex supersedes any queued one
//! with the same `(address, body length)` — only the latest value survives.
//! Everything else (notes, transport, program changes) keeps first-in
//! first-out order.
//!
//! The queue also recognizes the track-selection avalanche: the surface
//! fires all eight string controllers (16..=23) at once when a track is
//! selected. That burst is not eight gestures; it collapses into a single
//! channel-focus change and the buffered controller messages are dropped.

use crate::msg::Message;

/// Sum of controls 16..=23, the complete avalanche set.
const SELECT_CONTROLS_SUM: u32 = 156;

pub struct ReducingQueue {
    items: Vec<Message>,
    select_channel: Option<u8>,
    select_mask: u8,
    focus: Option<u8>,
}

impl Default for ReducingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReducingQueue {
    pub fn new() -> Self {
        ReducingQueue {
            items: Vec::with_capacity(32),
            select_channel: None,
            select_mask: 0,
            focus: None,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, msg: Message) {
        match &msg {
            Message::ControlChange { channel, control, .. } => {
                if (16..=23).contains(control) && self.track_selection(*channel, *control) {
                    return;
                }
                let (channel, control) = (*channel, *control);
                self.items.retain(|m| {
                    !matches!(m, Message::ControlChange { channel: c, control: k, .. }
                        if *c == channel && *k == control)
                });
                self.items.push(msg);
            }
            Message::Sysex(frame) => {
                let (address, len) = (frame.address, frame.body.len());
                self.items.retain(|m| {
                    !matches!(m, Message::Sysex(f)
                        if f.address == address && f.body.len() == len)
                });
                self.items.push(msg);
            }
            _ => self.items.insert(0, msg),
        }
    }

    /// Latest control-change and sysex first, everything else in arrival
    /// order behind them.
    pub fn pop(&mut self) -> Option<Message> {
        self.items.pop()
    }

    /// The channel of a completed track-selection avalanche, if one was
    /// swallowed since the last call. Resets the detector.
    pub fn take_channel_focus(&mut self) -> Option<u8> {
        self.select_channel = None;
        self.select_mask = 0;
        self.focus.take()
    }

    /// Returns true when this controller completed the avalanche set.
    fn track_selection(&mut self, channel: u8, control: u8) -> bool {
        if self.select_channel.is_none() {
            self.select_channel = Some(channel);
        }
        self.select_mask |= 1 << (control - 16);
        if self.select_mask != 0xff {
            return false;
        }
        debug_assert_eq!((16u32..=23).sum::<u32>(), SELECT_CONTROLS_SUM);
        self.items.retain(|m| {
            !matches!(m, Message::ControlChange { control, .. } if (16..=23).contains(control))
        });
        self.focus = self.select_channel;
        self.select_mask = 0;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::Message;

    #[test]
    fn identical_ccs_collapse_to_latest() {
        let mut q = ReducingQueue::new();
        q.push(Message::cc(0, 7, 10));
        q.push(Message::note(0, 91, 127));
        q.push(Message::cc(0, 7, 99));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop(), Some(Message::cc(0, 7, 99)));
        assert_eq!(q.pop(), Some(Message::note(0, 91, 127)));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn distinct_ccs_survive() {
        let mut q = ReducingQueue::new();
        q.push(Message::cc(0, 7, 10));
        q.push(Message::cc(1, 7, 20));
        q.push(Message::cc(0, 15, 30));
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn non_cc_messages_keep_arrival_order() {
        let mut q = ReducingQueue::new();
        q.push(Message::note(0, 91, 127));
        q.push(Message::note(0, 92, 127));
        q.push(Message::note(0, 93, 127));
        assert_eq!(q.pop(), Some(Message::note(0, 91, 127)));
        assert_eq!(q.pop(), Some(Message::note(0, 92, 127)));
        assert_eq!(q.pop(), Some(Message::note(0, 93, 127)));
    }

    #[test]
    fn avalanche_collapses_to_channel_focus() {
        let mut q = ReducingQueue::new();
        for control in 16..=23 {
            q.push(Message::cc(3, control, 127));
        }
        assert!(q.is_empty(), "selection burst must not reach downstream");
        assert_eq!(q.take_channel_focus(), Some(3));
        assert_eq!(q.take_channel_focus(), None);
    }

    #[test]
    fn partial_selection_burst_is_ordinary_input() {
        let mut q = ReducingQueue::new();
        q.push(Message::cc(2, 16, 100));
        q.push(Message::cc(2, 17, 100));
        assert_eq!(q.len(), 2);
        assert_eq!(q.take_channel_focus(), None);
    }
}
