#![allow(dead_code)]

pub mod fixtures;

pub use fixtures::{MemoryUploader, StubBackend, TestWorkspace};
