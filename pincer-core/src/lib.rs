//! Building blocks shared by every component of the Pincer worker boundary:
//! the adapter manifest model and its validator, the input-schema subset,
//! canonical JSON, crypto primitives, and the key-value storage abstraction.

pub mod canonical;
pub mod crypto;
pub mod keys;
pub mod kv;
pub mod manifest;
pub mod schema;

pub use canonical::stable_stringify;
pub use crypto::CryptoError;
pub use kv::{KvError, KvStore, MemoryKv};
pub use manifest::{
    validate_manifest, ActionAuth, ActionLimits, ActionMethod, ActionSpec, AdapterManifest,
    AuthPlacement, RequestMode,
};
pub use schema::{validate_input, InputSchema, PropertySchema};
