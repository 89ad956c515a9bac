// src/retry/mod.rs
mod strategy;

pub use strategy::{
    ForwardError, ForwardRequest, ForwardResponse, HttpForwarder, ReselectReason, RetryDelay, RetryPolicy,
};
