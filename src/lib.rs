// src/lib.rs

pub mod config;
pub mod domain;
pub mod error;
pub mod lifecycle;
pub mod service;
pub mod storage;
pub mod workflow;
