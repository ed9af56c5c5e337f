//! Physical transports

pub mod serial;
