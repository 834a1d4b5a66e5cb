//! # Paimen Core
//!
//! Shared domain types for the Paimen consumer control plane: the persisted
//! [`ConsumerSpec`], the draft/patch request shapes, the error taxonomy and
//! environment-driven [`Settings`].
//!
//! This crate is transport- and Kafka-free on purpose; everything that talks
//! to the outside world lives in `paimen-runtime` and `paimen-server`.

pub mod config;
pub mod error;
pub mod spec;

pub use config::{Settings, SettingsError};
pub use error::{ControlError, StoreError};
pub use spec::{
    validate_draft, validate_patch, ConsumerDraft, ConsumerPatch, ConsumerSpec, ConsumerStatus,
    PatchOutcome, ProcessorConfig, ProcessorDraft,
};
