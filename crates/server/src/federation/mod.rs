//! Server-to-server plumbing.
//! Modules:
//! - keys: private key material and the key provider
//! - signer: HTTP message signatures (sign + verify)
//! - transport: pluggable outbound transport and its signing wrapper

pub mod keys;
pub mod signer;
pub mod transport;

pub use keys::{KeyKind, KeyProvider, PrivateKey};
pub use signer::{Algorithm, MessageSigner, SignatureContext, sign_request, verify};
pub use transport::{SignedTransport, Transport, fetch_json};
