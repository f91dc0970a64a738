mod crypto;
mod serialization;

pub use crypto::{
    base58_decode, base58_encode, current_timestamp, ecdsa_sign_digest, ecdsa_verify_digest,
    new_keypair, ripemd160_digest, sha256_digest, sha256d_digest,
};
pub use serialization::{deserialize, serialize};
