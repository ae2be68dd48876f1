use std::mem::replace;

use crate::message::{frame_len, ReceivedMessage};
use crate::protocol::FIXED_HEADER_LEN;
use crate::Result;

/// Reassembles a byte stream into complete messages.
///
/// Fragments accumulate into a single view; `due` counts bytes known to be
/// missing before the current message can complete, so a feed in the middle
/// of a large message is a counter update rather than a framing pass.
///
/// A message is produced iff all of its bytes are in hand; a fragment that
/// coalesces several messages produces all of them in order.
#[derive(Debug, Default)]
pub(crate) struct RecvQueue {
    view: Vec<u8>,
    due: usize,
}

impl RecvQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment, appending completed messages to `out`.
    pub(crate) fn feed(&mut self, chunk: &[u8], out: &mut Vec<ReceivedMessage>) -> Result<()> {
        self.view.extend_from_slice(chunk);

        if chunk.len() < self.due {
            self.due -= chunk.len();
            return Ok(());
        }

        self.due = 0;

        while !self.view.is_empty() {
            let Some(len) = frame_len(&self.view)? else {
                // Not enough for the fixed header yet.
                self.due = FIXED_HEADER_LEN - self.view.len();
                return Ok(());
            };

            if len > self.view.len() {
                self.due = len - self.view.len();
                return Ok(());
            }

            let rest = self.view.split_off(len);
            let bytes = replace(&mut self.view, rest);
            out.push(ReceivedMessage::new(bytes));
        }

        Ok(())
    }

    /// Test if no partial message is buffered.
    #[cfg(test)]
    pub(crate) fn is_drained(&self) -> bool {
        self.view.is_empty() && self.due == 0
    }
}
