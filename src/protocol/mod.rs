//! GOCACHEPROG protocol
//!
//! The build tool writes requests to our stdin and reads responses from our
//! stdout, one JSON value each:
//!
//! 1. We send a handshake: `{"ID":0,"KnownCommands":["get","put","close"]}`
//! 2. The tool sends requests; a `put` with `BodySize > 0` is followed by a
//!    base64 JSON string holding the body
//! 3. We answer each request by ID, possibly out of order
//!
//! Malformed framing ends the session. Everything else fails only the
//! request it belongs to.

pub mod engine;
pub mod reader;
pub mod wire;

pub use engine::Engine;
pub use wire::{Command, Request, Response, KNOWN_COMMANDS};
