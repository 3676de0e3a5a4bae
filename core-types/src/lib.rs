// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Core types shared across the flowscope workspace.

pub mod config;
pub mod occ;
pub mod raw;
pub mod retry;
pub mod types;
