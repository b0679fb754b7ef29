pub mod error;
pub mod identity;
pub mod prekeys;

pub use error::CryptoError;
pub use identity::IdentityKeyPair;
pub use prekeys::{
    generate_one_time_prekeys, generate_signed_prekey, next_prekey_id, random_prekey_id,
    OneTimePreKeyRecord, PreKeyBatch, PublicPreKey, PublicSignedPreKey, SignedPreKeyRecord,
    MAX_PREKEY_ID,
};
