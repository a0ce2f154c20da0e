// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Entry tracing for hot discovery paths.
//!
//! The crate logs through the [`log`] facade with a bracketed subsystem tag
//! (`[spdp]`, `[sedp]`, `[disco]`, `[config]`, `[udp]`, `[bit]`). Installing a
//! logger is left to the application.
//!
//! `trace_fn!` marks function entry. It expands to a `log::trace!` call when the
//! `trace` feature is enabled and to nothing otherwise.
//!
//! ```ignore
//! fn handle_datagram(&mut self) {
//!     crate::trace_fn!("SpdpEngine::handle_datagram");
//!     // ...
//! }
//! ```

/// Trace function entry (enabled with the `trace` feature).
#[macro_export]
#[cfg(feature = "trace")]
macro_rules! trace_fn {
    ($fn_name:expr) => {
        log::trace!("[trace] -> {}", $fn_name);
    };
}

/// No-op trace macro (when trace feature disabled).
#[macro_export]
#[cfg(not(feature = "trace"))]
macro_rules! trace_fn {
    ($fn_name:expr) => {};
}
