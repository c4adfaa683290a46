//! Core types, config, errors, and conversation model for voxrelay.

pub mod audio;
pub mod config;
pub mod conversation;
pub mod error;
pub mod protocol;
pub mod store;
