//! database entity models for sea-orm.
//!
//! these entities map to database tables and convert to and from the
//! domain types in `galadriel_types`.

pub mod bundle;
pub mod join_token;
pub mod relationship;
pub mod trust_domain;
