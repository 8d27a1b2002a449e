//! Outbound access to the Stardog server whose resources the broker manages.

#[cfg(test)]
pub mod fake;
pub mod stardog_client;

pub use stardog_client::{
    HttpClientFactory, HttpStardogClient, StardogClient, StardogClientFactory, StardogError,
};
