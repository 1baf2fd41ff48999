//! Crypt4GH-style envelope decryption, grounded in
//! `original_source/services/fis/src/fis/core/ingest.py`'s use of
//! `crypt4gh.keys.get_private_key` + `ghga_service_commons.utils.crypt.decrypt`:
//! an X25519 key exchange followed by ChaCha20-Poly1305 AEAD decryption of
//! the envelope payload. This workspace never issues or re-encrypts
//! envelopes (spec.md Non-goals); it only unwraps ones addressed to it.

use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::IngestError as Error;

const NONCE_LEN: usize = 12;

/// This service's long-lived Crypt4GH keypair, loaded once at startup from
/// the configured private key file.
pub struct ServiceKeypair {
    secret: StaticSecret,
}

impl ServiceKeypair {
    pub fn from_bytes(raw: [u8; 32]) -> Self {
        Self {
            secret: StaticSecret::from(raw),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(&self.secret)
    }

    /// Decrypt a base64-encoded envelope of the form
    /// `sender_pubkey(32) || nonce(12) || ciphertext+tag`, the wire shape
    /// `decrypt()` expects in the original Python sender.
    pub fn decrypt_envelope(&self, encoded: &str) -> Result<Vec<u8>, Error> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| Error::Decryption(e.to_string()))?;

        if raw.len() < 32 + NONCE_LEN {
            return Err(Error::Decryption("envelope too short".into()));
        }
        let (sender_pub_bytes, rest) = raw.split_at(32);
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

        let mut sender_pub = [0u8; 32];
        sender_pub.copy_from_slice(sender_pub_bytes);
        let sender_public = PublicKey::from(sender_pub);

        let shared = self.secret.diffie_hellman(&sender_public);
        let cipher = ChaCha20Poly1305::new_from_slice(shared.as_bytes())
            .map_err(|e| Error::Decryption(e.to_string()))?;
        let nonce = Nonce::from_slice(nonce_bytes);

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| Error::Decryption("AEAD authentication failed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seal(recipient_public: &PublicKey, plaintext: &[u8]) -> String {
        let sender_secret = StaticSecret::from([9u8; 32]);
        let sender_public = PublicKey::from(&sender_secret);
        let shared = sender_secret.diffie_hellman(recipient_public);
        let cipher = ChaCha20Poly1305::new_from_slice(shared.as_bytes()).unwrap();
        let nonce_bytes = [7u8; NONCE_LEN];
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher.encrypt(nonce, plaintext).unwrap();

        let mut envelope = Vec::with_capacity(32 + NONCE_LEN + ciphertext.len());
        envelope.extend_from_slice(sender_public.as_bytes());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&ciphertext);
        base64::engine::general_purpose::STANDARD.encode(envelope)
    }

    #[test]
    fn decrypts_an_envelope_addressed_to_this_keypair() {
        let keypair = ServiceKeypair::from_bytes([3u8; 32]);
        let envelope = seal(&keypair.public_key(), b"{\"file_id\":\"abc\"}");
        let decrypted = keypair.decrypt_envelope(&envelope).unwrap();
        assert_eq!(decrypted, b"{\"file_id\":\"abc\"}");
    }

    #[test]
    fn rejects_a_tampered_ciphertext() {
        let keypair = ServiceKeypair::from_bytes([3u8; 32]);
        let mut envelope = base64::engine::general_purpose::STANDARD
            .decode(seal(&keypair.public_key(), b"payload"))
            .unwrap();
        let last = envelope.len() - 1;
        envelope[last] ^= 0xff;
        let tampered = base64::engine::general_purpose::STANDARD.encode(envelope);
        assert!(keypair.decrypt_envelope(&tampered).is_err());
    }

    #[test]
    fn rejects_an_envelope_shorter_than_the_header() {
        let keypair = ServiceKeypair::from_bytes([3u8; 32]);
        let short = base64::engine::general_purpose::STANDARD.encode([0u8; 10]);
        assert!(keypair.decrypt_envelope(&short).is_err());
    }
}
