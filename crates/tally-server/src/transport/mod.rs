//! Transport: TCP listener carrying framed CBOR envelopes.

pub mod tcp;
