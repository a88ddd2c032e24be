// src/models/mod.rs
//! Data structures for the stored kinds and request payloads.

pub mod course;
pub mod user;
