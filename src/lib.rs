//! Messaging core for a group/DM chat client backed by an abstract
//! document store.
//!
//! The store owns all persistent state; this crate is the layer that
//! creates and deduplicates conversations, streams messages, resolves
//! display names, and assembles the recent-conversations preview. See
//! [`session::Session`] for the per-user entry point.

pub mod chat;
pub mod directory;
pub mod identity;
pub mod notice;
pub mod profile;
pub mod recent;
pub mod session;
pub mod stream;
