//! Splits a whole inbound message into buffer-sized fragments

use bytes::Bytes;

use super::Received;
use crate::value_objects::MessageKind;

/// Read position inside one inbound frame
///
/// Transports whose socket library hands over whole messages keep one cursor
/// per pending message and serve it to the caller buffer by buffer.
#[derive(Debug, Clone)]
pub struct FragmentCursor {
    data: Bytes,
    offset: usize,
    kind: MessageKind,
    final_fragment: bool,
}

impl FragmentCursor {
    /// `final_fragment` marks the frame as the end of its message
    pub fn new(data: Bytes, kind: MessageKind, final_fragment: bool) -> Self {
        Self {
            data,
            offset: 0,
            kind,
            final_fragment,
        }
    }

    /// Cursor over a complete message
    pub fn message(data: Bytes, kind: MessageKind) -> Self {
        Self::new(data, kind, true)
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Copy the next chunk into `buffer`
    pub fn fill(&mut self, buffer: &mut [u8]) -> Received {
        let len = self.remaining().min(buffer.len());
        buffer[..len].copy_from_slice(&self.data[self.offset..self.offset + len]);
        self.offset += len;

        Received::Fragment {
            len,
            kind: self.kind,
            end_of_message: self.final_fragment && self.is_exhausted(),
        }
    }
}
