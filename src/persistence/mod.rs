//! # Persistence
//!
//! The only state this device keeps on disk is its configuration document.
//! Storage bring-up is the first bootstrap stage; a failure here aborts the
//! process before any network activity.

pub mod config_store;
