/// What a cursor does once it would reach its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wrap {
    /// Restart at offset 0
    ToStart,
    /// Continue with the overshoot, i.e. advance modulo the limit
    Carry,
}

/// Offset into a buffer or file that advances by a fixed stride and wraps at `limit`.
///
/// Churners use one cursor for reading and one for writing with different
/// strides, so the two drift relative to each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChurnCursor {
    position: u64,
    stride: u64,
    limit: u64,
    wrap: Wrap,
}

impl ChurnCursor {
    pub fn new(stride: u64, limit: u64, wrap: Wrap) -> Self {
        debug_assert!(limit > 0);
        Self {
            position: 0,
            stride,
            limit,
            wrap,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Moves the cursor forward; returns true if it wrapped around.
    pub fn advance(&mut self) -> bool {
        let next = self.position.saturating_add(self.stride);
        if next < self.limit {
            self.position = next;
            return false;
        }

        self.position = match self.wrap {
            Wrap::ToStart => 0,
            Wrap::Carry => next % self.limit,
        };
        true
    }

    pub fn reset(&mut self) {
        self.position = 0;
    }
}
