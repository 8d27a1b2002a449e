//! Data models for the service broker.
//!
//! `catalog` and `requests` are the wire documents exchanged with the
//! platform; `instance` holds the records persisted by a [`crate::store::Store`].

pub mod catalog;
pub mod instance;
pub mod requests;
