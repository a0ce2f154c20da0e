// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Identifiers: GUID layout and the participant GUID generator.

mod generator;
mod guid;

pub use generator::{GuidGenerator, VENDOR_ID};
pub use guid::*;
