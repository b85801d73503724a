#![doc = include_str!("./lib.md")]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod board;
pub mod config;
pub mod jitter;
pub mod layout;
pub mod orchestrator;
pub mod rt;
pub mod sync;
pub mod tasks;
pub mod timing;
pub mod window;
pub mod workload;


pub use self::{
    board::{Board, BoardSource},
    config::{RunConfig, Variant},
    orchestrator::{run, RunError, RunReport},
    sync::{CancelToken, Cancelled, SharedCounter, SignalLatch},
    timing::{SampleBuffer, TimingRecorder},
    window::{AccessPolicy, MapError, RegisterWindow, UnmapError},
};
