// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Core domain types shared across the options flow pipeline.

pub mod config;
pub mod contract;
pub mod ids;
pub mod retry;
pub mod status;
pub mod types;
