//! JSON-RPC over stdio plumbing.
//!
//! The peer is a child process speaking newline-delimited JSON. This side
//! always initiates requests; the peer answers with responses and streams
//! id-less notifications in between.
//!
//! - `codec`: line framing with a length cap.
//! - `message`: the wire message model and its classification.
//! - `transport`: spawns the peer, writes lines, yields decoded messages.
//! - `router`: background task feeding the shared [`router::Inbox`].
//! - `correlator`: waits for the response to a given request id.
//! - `trace`: optional JSONL dump of every observed message.

pub mod codec;
pub mod correlator;
pub mod message;
pub mod router;
pub mod trace;
pub mod transport;
