pub mod address;
pub mod cipher;
pub mod codec;
pub mod error;
pub mod instance;
mod tcp;
mod udp;

pub use address::Address;
pub use cipher::{CipherKind, MasterKey, SessionCipher, list_ciphers};
pub use codec::AeadCodec;
pub use error::{RelayError, Result};
pub use instance::RelayInstance;
