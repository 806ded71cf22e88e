//! Waveform engine - the facade callers talk to
//!
//! `WaveformEngine` accepts generation requests, keeps at most one worker per
//! (file, artifact kind), serves finished artifacts and relays worker events.
//!
//! ```text
//! generate(path)
//!   ├─ file missing ───────────────► Failed + Error event (no thread)
//!   ├─ in memory, same signature ──► AlreadyReady
//!   ├─ worker in flight, same sig ─► Coalesced
//!   └─ otherwise spawn worker ─────► Started
//!        ├─ valid cache entry ─────► Ready { cached: true }
//!        └─ decode + reduce ───────► Progress* → Ready { cached: false } | Error
//! ```
//!
//! A held artifact or running job made from an older version of the file is
//! evicted or cancelled before the new worker starts.

mod facade;

pub use facade::{GenerateOutcome, WaveformEngine};
