//! Per-connection delivery state.
//!
//! A connection has at most one message outstanding. Control messages are
//! outstanding until the inbound channel accepts them; stream messages until
//! the consumer finishes the body. Decoding is only legal in AwaitingFrame.
//!
//! ```text
//!   AwaitingFrame ──control──▶ DeliveredControl ──accepted──▶ AwaitingFrame
//!   AwaitingFrame ──stream───▶ AwaitingStreamAck ──acked────▶ AwaitingFrame
//! ```

/// Where the connection is in its delivery cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingFrame,
    DeliveredControl,
    AwaitingStreamAck,
}

/// An event arrived in a phase that does not allow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{event} is not valid in phase {phase:?}")]
pub struct ProtocolViolation {
    pub phase: Phase,
    pub event: &'static str,
}

/// What to do after a malformed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    Continue,
    Drop,
}

#[derive(Debug)]
pub struct ConnectionState {
    phase: Phase,
    consecutive_failures: u32,
    max_decode_failures: u32,
}

impl ConnectionState {
    /// `max_decode_failures` of 0 is treated as 1.
    pub fn new(max_decode_failures: u32) -> Self {
        Self {
            phase: Phase::AwaitingFrame,
            consecutive_failures: 0,
            max_decode_failures: max_decode_failures.max(1),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn can_decode(&self) -> bool {
        self.phase == Phase::AwaitingFrame
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn control_delivered(&mut self) -> Result<(), ProtocolViolation> {
        self.transition(Phase::AwaitingFrame, Phase::DeliveredControl, "control frame")?;
        self.consecutive_failures = 0;
        Ok(())
    }

    pub fn control_accepted(&mut self) -> Result<(), ProtocolViolation> {
        self.transition(Phase::DeliveredControl, Phase::AwaitingFrame, "control accepted")
    }

    pub fn stream_delivered(&mut self) -> Result<(), ProtocolViolation> {
        self.transition(Phase::AwaitingFrame, Phase::AwaitingStreamAck, "stream frame")?;
        self.consecutive_failures = 0;
        Ok(())
    }

    pub fn stream_acked(&mut self) -> Result<(), ProtocolViolation> {
        self.transition(Phase::AwaitingStreamAck, Phase::AwaitingFrame, "stream ack")
    }

    /// Record a malformed frame.
    pub fn decode_failed(&mut self) -> Result<FailureVerdict, ProtocolViolation> {
        if !self.can_decode() {
            return Err(self.violation("decode failure"));
        }
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.max_decode_failures {
            Ok(FailureVerdict::Drop)
        } else {
            Ok(FailureVerdict::Continue)
        }
    }

    fn transition(
        &mut self,
        from: Phase,
        to: Phase,
        event: &'static str,
    ) -> Result<(), ProtocolViolation> {
        if self.phase != from {
            return Err(self.violation(event));
        }
        self.phase = to;
        Ok(())
    }

    fn violation(&self, event: &'static str) -> ProtocolViolation {
        ProtocolViolation {
            phase: self.phase,
            event,
        }
    }
}
