//! VE.Bus MK2/MK3 protocol stack
//!
//! Layered bottom-up: codec (frame marshalling and checksums), frame
//! scanner (byte stream to validated frames), client (request/response
//! dispatch on the half-duplex wire), adapter (typed operations) and the
//! ESS assistant layer on top.

pub mod adapter;
pub mod client;
pub mod codec;
pub mod constants;
pub mod ess;
pub mod frame_reader;
