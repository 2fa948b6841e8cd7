//! Identifier types
//!
//! - ObjectId: opaque id of any stored record
//! - TagId: id of a tag referenced by tag associations
//! - generate_id: collision-resistant fixed-length id generator
//!
//! Entity crates declare their own id newtypes with [`id_type!`](crate::id_type).

use rand::Rng;

/// Length of generated ids
pub const ID_LENGTH: usize = 10;

const ID_ALPHABET: &[u8] = b"_-0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Declare a string-backed identifier newtype
///
/// The generated type is transparent on the wire (serializes as a plain
/// string) and converts from `&str` / `String`.
#[macro_export]
macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash,
            ::serde::Serialize, ::serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing id
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw id
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Take the raw id
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

id_type!(
    /// Opaque identifier of a stored record
    ObjectId
);

id_type!(
    /// Identifier of a tag
    TagId
);

impl ObjectId {
    /// Fresh random id
    pub fn generate() -> Self {
        Self(generate_id())
    }
}

/// Generate a fresh unique id
///
/// Ids are [`ID_LENGTH`] characters from a URL-safe alphabet. `_` never
/// appears and `-` never starts or ends an id, so either can serve as a
/// separator when ids are composed (e.g. `agent:<id>` tags).
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    loop {
        let id: String = (0..ID_LENGTH)
            .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
            .collect();
        if !id.starts_with('-') && !id.ends_with('-') && !id.contains('_') {
            return id;
        }
    }
}
