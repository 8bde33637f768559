//! Message signing
//!
//! Outbound mesh traffic is passed through a [`Signer`] before transmission
//! and inbound traffic is verified before the gateway acts on it. A message
//! that fails verification is dropped.
//!
//! [`NoSigning`] is the default and accepts everything. [`KeyedHashSigner`]
//! (feature `signing`) authenticates with a BLAKE3 keyed hash over the
//! fields that do not change from hop to hop.

use crate::message::Message;

/// Trait for message signing back-ends
pub trait Signer {
    /// Attach authentication data to an outbound message
    fn sign(&mut self, message: Message) -> Message;

    /// Check an inbound message
    fn verify(&self, message: &Message) -> bool;

    /// Back-end name (for logging)
    fn name(&self) -> &str;
}

impl<S: Signer + ?Sized> Signer for Box<S> {
    fn sign(&mut self, message: Message) -> Message {
        (**self).sign(message)
    }

    fn verify(&self, message: &Message) -> bool {
        (**self).verify(message)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Pass-through signer
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSigning;

impl Signer for NoSigning {
    fn sign(&mut self, message: Message) -> Message {
        message
    }

    fn verify(&self, _message: &Message) -> bool {
        true
    }

    fn name(&self) -> &str {
        "none"
    }
}

#[cfg(feature = "signing")]
pub use keyed::KeyedHashSigner;

#[cfg(feature = "signing")]
mod keyed {
    use tracing::{debug, trace};

    use super::Signer;
    use crate::config::PSK_LEN;
    use crate::message::Message;

    /// Length of the attached signature
    pub const SIGNATURE_LEN: usize = blake3::OUT_LEN;

    /// Signer using a BLAKE3 keyed hash and a pre-shared key
    pub struct KeyedHashSigner {
        key: [u8; PSK_LEN],
        require_signed: bool,
    }

    impl KeyedHashSigner {
        /// Create a signer from a pre-shared key
        pub fn new(key: [u8; PSK_LEN]) -> Self {
            Self {
                key,
                require_signed: false,
            }
        }

        /// Reject inbound messages that carry no signature
        pub fn require_signed(mut self, required: bool) -> Self {
            self.require_signed = required;
            self
        }

        fn digest(&self, message: &Message) -> blake3::Hash {
            let mut hasher = blake3::Hasher::new_keyed(&self.key);
            hasher.update(&[
                message.sender,
                message.destination,
                message.child,
                message.command as u8,
                message.msg_type,
                u8::from(message.request_ack),
                u8::from(message.echo),
            ]);
            hasher.update(message.payload().as_bytes());
            hasher.finalize()
        }
    }

    impl std::fmt::Debug for KeyedHashSigner {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("KeyedHashSigner")
                .field("require_signed", &self.require_signed)
                .finish_non_exhaustive()
        }
    }

    impl Signer for KeyedHashSigner {
        fn sign(&mut self, mut message: Message) -> Message {
            message.signature = Some(self.digest(&message).as_bytes().to_vec());
            message
        }

        fn verify(&self, message: &Message) -> bool {
            let Some(signature) = &message.signature else {
                trace!(sender = message.sender, "Unsigned message");
                return !self.require_signed;
            };

            let Ok(bytes) = <[u8; SIGNATURE_LEN]>::try_from(signature.as_slice()) else {
                debug!(len = signature.len(), "Signature has wrong length");
                return false;
            };

            // Hash equality is constant-time
            self.digest(message) == blake3::Hash::from(bytes)
        }

        fn name(&self) -> &str {
            "blake3-keyed"
        }
    }
}
