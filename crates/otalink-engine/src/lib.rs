//! # OTA Update Engine for Embedded Agents
//!
//! `otalink-engine` is the firmware-update core of an IoT device's
//! cloud/LAN agent: it receives an update descriptor, fetches the
//! image in bounded chunks over a request/response transport,
//! optionally decrypts and authenticates it in a streaming fashion,
//! hands verified bytes to a flash-writing driver, and reports
//! terminal status back to the issuer.
//!
//! ## Core Features
//!
//! - **`no_std` & `no_alloc`:** all per-attempt state lives in
//!   fixed-capacity `heapless` buffers; untrusted length fields can
//!   never drive an allocation.
//! - **Capability seams:** the transport, the flash-write driver and
//!   the crypto primitives are consumed through traits, so the whole
//!   lifecycle can run against in-memory fakes.
//! - **Streaming LAN decryption:** ciphertext is reassembled across
//!   transport chunk boundaries, CBC-decrypted with one long-lived
//!   context, PKCS#7-trimmed and digest-checked incrementally.
//! - **Resumable chunked fetch:** offsets always restart from the
//!   current accepted byte count, so transport-level retries can never
//!   double-apply a range; retry bounding is count-based, never
//!   wall-clock based.
//! - **Fail-safe state machine:** every terminal error latches exactly
//!   one status report (first cause wins) and drives a cleanup that
//!   zeroizes crypto state.
//!
//! ## Usage
//!
//! Provide a [`ports::Transport`], a [`ports::FlashDriver`] and (for
//! LAN updates) the crypto capabilities, then drive the engine from
//! the agent's event loop:
//!
//! ```ignore
//! let mut engine: UpdateEngine<MyFlash, MyCipher, MyDigest> =
//!     UpdateEngine::new(flash, EngineConfig::default());
//!
//! engine.handle_cloud_command(body)?;
//! engine.start()?;
//! loop {
//!     match engine.run(&mut transport).await {
//!         RunOutcome::Stalled => continue, // event loop waits, then re-runs
//!         _ => break,
//!     }
//! }
//! while !engine.report_status(&mut transport).await {}
//! ```

#![no_std]

pub mod auth;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod ports;
pub mod report;

// Re-export key types for easier access at the crate root.
pub use descriptor::{ImageKind, SourceLocation, UpdateDescriptor};
pub use engine::{EngineConfig, RunOutcome, UpdateEngine, UpdatePhase};
pub use error::{AuthError, ParseError, TransferError, UpdateError};
