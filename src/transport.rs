//! Transport binding: a thin, blocking adapter over an opaque channel
//! (spec §3 C4, §4.4, §6 "Endpoint contract").
//!
//! Transports (USB, TCP, UART DMA) are external collaborators (spec §1);
//! this module only defines the shape every endpoint must conform to.
//! Unlike the teacher crate's `AsyncTransport` (this runtime's host side
//! is synchronous per spec §5: "each `invoke` blocks until the `Result`
//! is pulled"), `push`/`pull` here are blocking and total — they return
//! only once every requested byte has moved, or an I/O error occurred;
//! no partial transfers are surfaced to the invocation engine (spec
//! §4.4).

use core::fmt;

/// Error trait for endpoint implementations, mirroring the teacher
/// crate's `TransportError` marker.
pub trait TransportError: fmt::Debug + fmt::Display {}

/// A blocking, total byte-stream channel (spec §4.4 "Transport Binding").
///
/// Implementors provide raw byte read/write for one physical channel
/// (USB, TCP, UART DMA, or an in-memory loopback for testing); this
/// runtime handles all framing, checksums, and class dispatch above this
/// trait.
pub trait Endpoint {
    type Error: TransportError;

    /// Applies endpoint-specific configuration (e.g. selecting a USB
    /// interface or a baud rate). Devices that need no configuration can
    /// make this a no-op.
    fn configure(&mut self) -> Result<(), Self::Error>;

    /// Writes `buf` in full. Blocks until every byte is sent or an I/O
    /// error occurs; never returns a short write.
    fn push(&mut self, buf: &[u8]) -> Result<(), Self::Error>;

    /// Fills `buf` in full. Blocks until every byte is received or an
    /// I/O error occurs; never returns a short read.
    fn pull(&mut self, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Releases any endpoint-specific resources.
    fn destroy(&mut self) -> Result<(), Self::Error>;
}

pub mod loopback {
    //! An in-memory [`Endpoint`] used by this crate's own tests, and
    //! available to downstream users, to drive a full
    //! `invoke -> perform -> reply` round trip without a real transport.

    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LoopbackError;

    impl fmt::Display for LoopbackError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "loopback endpoint starved (nothing queued to pull)")
        }
    }
    impl TransportError for LoopbackError {}

    /// A FIFO byte queue standing in for a physical channel. Pushing the
    /// host's bytes and having a test harness drain/feed it on the
    /// "device side" reproduces the request/reply ordering contract (spec
    /// §5, P6) without a real transport.
    #[derive(Default)]
    pub struct LoopbackEndpoint {
        pub outbound: VecDeque<u8>,
        pub inbound: VecDeque<u8>,
    }

    impl LoopbackEndpoint {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Endpoint for LoopbackEndpoint {
        type Error = LoopbackError;

        fn configure(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }

        fn push(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
            self.outbound.extend(buf.iter().copied());
            Ok(())
        }

        fn pull(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
            if self.inbound.len() < buf.len() {
                return Err(LoopbackError);
            }
            for slot in buf.iter_mut() {
                *slot = self.inbound.pop_front().unwrap();
            }
            Ok(())
        }

        fn destroy(&mut self) -> Result<(), Self::Error> {
            self.outbound.clear();
            self.inbound.clear();
            Ok(())
        }
    }
}
