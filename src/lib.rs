//! # Keg Core Library
//!
//! This crate contains the core logic of `keg` – a formula install
//! orchestrator. A formula declaratively describes a piece of software
//! (source archive and checksum, prebuilt per-platform bottles, build
//! dependencies, build steps, install targets and a smoke test); `keg`
//! turns it into a verified artifact installed under a versioned prefix.
//!
//! Per run exactly one installation path is taken: a matching bottle, or a
//! hermetic build from source when none matches. Content is checksum
//! verified before anything outside the staging area is touched, installs
//! commit through a single atomic pointer flip, and a failed smoke test
//! leaves a "degraded" install rather than rolling back.
//!
//! This library is built for the `keg` CLI, but you can also reuse it as a
//! backend in other tools.
//!
//! ## Modules Overview
//! - [`formula`] – The declarative [`formula::Formula`] record and its validation
//! - [`platform`] – Mapping the running platform to the best bottle, or to a source build
//! - [`fetch`] – Staging artifacts locally, with caching and bounded retries
//! - [`checksum`] – SHA-256 hashing and verification
//! - [`sandbox`] – Isolated build environments and build-step execution
//! - [`install`] – Versioned prefix layout and the atomic current-pointer swap
//! - [`record`] – Installation receipts persisted after success
//! - [`smoke`] – Post-install smoke tests
//! - [`preflight`] – Asserting build dependencies are present
//! - [`orchestrator`] – The forward-only pipeline tying it all together
//! - [`error`] – The failure taxonomy and per-kind exit codes

pub mod checksum;
pub mod error;
pub mod fetch;
pub mod formula;
pub mod install;
pub mod orchestrator;
pub mod platform;
pub mod preflight;
pub mod record;
pub mod sandbox;
pub mod smoke;

pub use error::*;
pub use fetch::*;
pub use formula::*;
pub use orchestrator::*;
pub use platform::*;
pub use record::*;
pub use smoke::*;
