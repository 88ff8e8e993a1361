//! Keys and signatures used by validators to identify themselves and sign
//! consensus messages.

mod aggregate_signature;
mod public_key;
mod secret_key;
mod signature;

pub use self::{
    aggregate_signature::AggregateSignature,
    public_key::PublicKey,
    secret_key::SecretKey,
    signature::{InvalidSignatureError, Signature},
};
