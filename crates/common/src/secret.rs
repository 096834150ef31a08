//! Secret types for credentials that must never reach logs.
//!
//! Re-exports the [`secrecy`] crate. Identity proofs handed over by the
//! identity authority and channel tokens issued by the credential endpoint are
//! both carried as [`SecretString`], so any struct deriving `Debug` around
//! them prints a redacted placeholder instead of the value.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct JoinCredential {
//!     channel: String,
//!     token: SecretString,
//! }
//!
//! let cred = JoinCredential {
//!     channel: "appt_42".to_string(),
//!     token: SecretString::from("006abc"),
//! };
//!
//! assert!(!format!("{cred:?}").contains("006abc"));
//! assert_eq!(cred.token.expose_secret(), "006abc");
//! ```
//!
//! Use `SecretString` for identity proofs (bearer tokens from the identity
//! authority), channel tokens, and any override credential a caller passes in.

pub use secrecy::{ExposeSecret, SecretString};
