//! AES-128-ECB with PKCS#7 padding, keyed by the device local key.

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};

use super::error::ProtocolError;

const BLOCK: usize = 16;

pub struct EcbCipher {
    cipher: Aes128,
}

impl EcbCipher {
    /// # Errors
    ///
    /// Returns [`ProtocolError::BadKeyLength`] unless `key` is 16 bytes.
    pub fn new(key: &[u8]) -> Result<Self, ProtocolError> {
        let cipher =
            Aes128::new_from_slice(key).map_err(|_| ProtocolError::BadKeyLength(key.len()))?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let pad = BLOCK - plaintext.len() % BLOCK;
        let mut buf = Vec::with_capacity(plaintext.len() + pad);
        buf.extend_from_slice(plaintext);
        buf.resize(plaintext.len() + pad, pad as u8);
        for chunk in buf.chunks_exact_mut(BLOCK) {
            self.cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
        }
        buf
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK != 0 {
            return Err(ProtocolError::BadCiphertextLength(ciphertext.len()));
        }
        let mut buf = ciphertext.to_vec();
        for chunk in buf.chunks_exact_mut(BLOCK) {
            self.cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
        }

        let pad = *buf.last().ok_or(ProtocolError::BadPadding)? as usize;
        if pad == 0 || pad > BLOCK || buf[buf.len() - pad..].iter().any(|b| *b as usize != pad) {
            return Err(ProtocolError::BadPadding);
        }
        buf.truncate(buf.len() - pad);
        Ok(buf)
    }
}
