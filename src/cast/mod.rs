//! Protobuf types for the Cast channel envelope, generated at build time from
//! `proto/cast_channel.proto`.

#![allow(clippy::all)]

include!(concat!(env!("OUT_DIR"), "/cast/mod.rs"));
