//! Clock-skew correction.
//!
//! The `connected` frame carries two server timestamps: `t0` (server clock
//! when `connect` arrived) and `t1` (server clock when `connected` was
//! sent). Combined with the client's own send/receive times this yields the
//! one-way latency and the offset between the two clocks.
//!
//! `t1` becomes the shared *base time*: both sides send `meta.time` relative
//! to it, which also keeps wire timestamps small. The client additionally
//! derives *time fix*, the estimated client-minus-server clock offset, so
//! that corrected times land on a common clock.
//!
//! All arithmetic is integer milliseconds with truncating division.

/// The correction both peers apply to `meta.time` on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeFix {
    /// The shared epoch: server clock at `connected` send.
    pub base_time: i64,
    /// Estimated local-minus-server clock offset. Zero on the server and on
    /// clients that did not ask for skew correction.
    pub time_fix: i64,
}

impl TimeFix {
    /// Client-side derivation from the four handshake timestamps.
    ///
    /// `sent_at`/`received_at` are the local clocks around the handshake,
    /// `t0`/`t1` the server clocks from the `connected` payload. When
    /// `fix_time` is off only the shared base is kept.
    pub fn client(sent_at: i64, received_at: i64, t0: i64, t1: i64, fix_time: bool) -> Self {
        let time_fix = if fix_time {
            let round_trip = (received_at - sent_at - (t1 - t0)) / 2;
            sent_at + round_trip - t0
        } else {
            0
        };
        Self {
            base_time: t1,
            time_fix,
        }
    }

    /// Server-side value: the server's own clock is the reference.
    pub fn server(t1: i64) -> Self {
        Self {
            base_time: t1,
            time_fix: 0,
        }
    }

    /// Local `meta.time` to wire time.
    pub fn outgoing(&self, time: i64) -> i64 {
        time - self.time_fix - self.base_time
    }

    /// Wire time to local `meta.time`.
    pub fn incoming(&self, time: i64) -> i64 {
        time + self.base_time + self.time_fix
    }
}
