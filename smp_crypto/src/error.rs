use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Signature verification failed")]
    SignatureVerification,

    #[error("AEAD encryption failed")]
    AeadEncrypt,

    #[error("AEAD decryption failed (authentication tag mismatch — possible tampering)")]
    AeadDecrypt,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Ratchet step failed: {0}")]
    RatchetStep(String),

    #[error("Too many skipped messages: {0} exceeds the configured limit")]
    TooManySkipped(u64),

    #[error("Message key for an earlier ratchet chain was requested ({0} steps back)")]
    Earlier(u64),

    #[error("Ratchet header could not be decrypted with the current or next header key")]
    HeaderDecrypt,

    #[error("Illegal hybrid-KEM state transition: {0}")]
    KemState(String),

    #[error("Nonce generation failed")]
    NonceGeneration,

    #[error("Hash chain integrity error: {0}")]
    HashChainIntegrity(String),

    #[error("Prekey error: {0}")]
    PrekeyError(String),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
