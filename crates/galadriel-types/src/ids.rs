//! opaque 128-bit identifiers assigned by the datastore.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// generate a fresh random id.
            pub fn new_random() -> Self {
                Self(Uuid::new_v4())
            }

            /// the nil id, used for entities that have not been stored yet.
            pub const fn nil() -> Self {
                Self(Uuid::nil())
            }

            /// true if this id was never assigned by the store.
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::nil()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(
    /// trust domain identifier.
    TrustDomainId
);
uuid_id!(
    /// federation relationship identifier.
    RelationshipId
);
uuid_id!(
    /// bundle identifier.
    BundleId
);
uuid_id!(
    /// join token identifier.
    JoinTokenId
);
