//! These models represent the objects passed around by the agent
//!
//! A conversation is an ordered list of [`message::Message`]s. The same structs are
//! written to the message log and converted into the chat completion format when a
//! request is sent to the backend, so they are kept independent of any one wire format.
pub mod message;
pub mod role;
pub mod tool;
