//! A reliable, connection-oriented byte stream over UDP.
//!
//! Each connection is driven by an [`Endpoint`]: the passive side binds,
//! listens and accepts; the active side connects, negotiating one of two
//! loss-recovery strategies ([`RecoveryMode`]). Both sides then exchange data
//! through [`Endpoint::send_all`] and [`Endpoint::recv`], which hide the
//! sequence numbering, windowed retransmission and cumulative
//! acknowledgements underneath.
//!
//! The [`xfer`] module layers the file-transfer framing used by the `upload`,
//! `download` and `start-server` binaries on top of that byte stream.

mod err;
pub use err::*;

mod rdt;
pub use rdt::*;

pub mod cli;
pub mod xfer;
