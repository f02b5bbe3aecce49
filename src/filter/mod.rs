//! Domain blocking module.
//!
//! Holds the sinkhole's blocklist: a set of domain names loaded once at
//! startup and consulted for every incoming query.

mod blocklist;

pub use blocklist::Blocklist;
