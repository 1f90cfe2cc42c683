//! Test helpers for StretchRoom services.
//!
//! - [`SrRandomizer`]: seeded random strings, numbers, arrays and dates
//! - [`PortSelector`]: free localhost ports
//! - [`StopWatchElapser`]: report how long a scope took
//! - [`TestWebApplication`]: serve a built service on a free port
//! - [`TestRoutingHandler`]: point virtual service URLs at in-process hosts
//! - [`ToJson`]: compact and pretty JSON for any `Serialize`

#![deny(warnings)]

mod json;
mod port;
mod random;
mod routing;
mod stopwatch;
mod web_app;

pub use json::ToJson;
pub use port::PortSelector;
pub use random::{RandomizerError, SrRandomizer};
pub use routing::TestRoutingHandler;
pub use stopwatch::StopWatchElapser;
pub use web_app::{TestHostError, TestWebApplication};

pub use stretchroom_infrastructure::test_utils;
