//! Módulo de criptografia para credenciais sensíveis
//!
//! Os tokens OAuth das agendas externas são gravados cifrados com
//! AES-256-GCM. A chave é derivada da frase-senha do banco com Argon2id.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use argon2::Argon2;
use rand::{rngs::OsRng as RandOsRng, RngCore};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Erros específicos para operações de criptografia
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Falha na criptografia: {0}")]
    EncryptionFailed(String),

    #[error("Falha na descriptografia: {0}")]
    DecryptionFailed(String),

    #[error("Dados inválidos: {0}")]
    InvalidData(String),

    #[error("Configuração de criptografia inválida: {0}")]
    InvalidConfiguration(String),
}

/// Tamanho do nonce em bytes para AES-GCM
const AES_GCM_NONCE_SIZE: usize = 12;

/// Tamanho mínimo do salt aceito pelo Argon2
const MIN_SALT_LEN: usize = 8;

/// Chave AES-256 para criptografia (com zeroização automática)
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Cria uma nova chave aleatória
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        RandOsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Deriva a chave a partir da frase-senha usando Argon2id
    pub fn derive(passphrase: &str, salt: &str) -> Result<Self, CryptoError> {
        if passphrase.is_empty() {
            return Err(CryptoError::InvalidConfiguration(
                "A frase-senha não pode ser vazia".to_string(),
            ));
        }
        if salt.len() < MIN_SALT_LEN {
            return Err(CryptoError::InvalidConfiguration(format!(
                "O salt deve ter pelo menos {} bytes",
                MIN_SALT_LEN
            )));
        }

        let mut key = [0u8; 32];
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), salt.as_bytes(), &mut key)
            .map_err(|e| CryptoError::InvalidConfiguration(e.to_string()))?;
        Ok(Self(key))
    }

    /// Converte para bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(**)")
    }
}

/// Estrutura que armazena dados criptografados e seu nonce
#[derive(Debug, Clone)]
pub struct EncryptedData {
    /// Dados criptografados
    pub ciphertext: Vec<u8>,
    /// Nonce usado na criptografia
    pub nonce: Vec<u8>,
}

/// Criptografa dados usando AES-256-GCM
pub fn encrypt(data: &[u8], key: &EncryptionKey) -> Result<EncryptedData, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, data)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    Ok(EncryptedData {
        ciphertext,
        nonce: nonce.to_vec(),
    })
}

/// Descriptografa dados usando AES-256-GCM
pub fn decrypt(encrypted: &EncryptedData, key: &EncryptionKey) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    if encrypted.nonce.len() != AES_GCM_NONCE_SIZE {
        return Err(CryptoError::InvalidData(format!(
            "Nonce inválido: esperado {} bytes, recebido {}",
            AES_GCM_NONCE_SIZE,
            encrypted.nonce.len()
        )));
    }

    let nonce = Nonce::from_slice(&encrypted.nonce);

    cipher
        .decrypt(nonce, encrypted.ciphertext.as_ref())
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

/// Criptografa um texto (token) em UTF-8
pub fn encrypt_str(value: &str, key: &EncryptionKey) -> Result<EncryptedData, CryptoError> {
    encrypt(value.as_bytes(), key)
}

/// Descriptografa um texto (token) gravado com [`encrypt_str`]
pub fn decrypt_str(encrypted: &EncryptedData, key: &EncryptionKey) -> Result<String, CryptoError> {
    let plaintext = decrypt(encrypted, key)?;
    String::from_utf8(plaintext).map_err(|e| CryptoError::InvalidData(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encryption_decryption() -> Result<(), CryptoError> {
        let data = b"ya29.token-de-acesso";
        let key = EncryptionKey::generate();

        let encrypted = encrypt(data, &key)?;
        assert_ne!(&encrypted.ciphertext, data);

        let decrypted = decrypt(&encrypted, &key)?;
        assert_eq!(&decrypted, data);

        Ok(())
    }

    #[test]
    fn test_derived_key_is_deterministic() -> Result<(), CryptoError> {
        let first = EncryptionKey::derive("senha-forte-do-admin", "clinic-scheduler")?;
        let second = EncryptionKey::derive("senha-forte-do-admin", "clinic-scheduler")?;
        assert_eq!(first.as_bytes(), second.as_bytes());

        let other = EncryptionKey::derive("senha-errada", "clinic-scheduler")?;
        assert_ne!(first.as_bytes(), other.as_bytes());

        let token = encrypt_str("1//refresh-token", &first)?;
        assert_eq!(decrypt_str(&token, &second)?, "1//refresh-token");
        assert!(decrypt_str(&token, &other).is_err());

        Ok(())
    }

    #[test]
    fn test_derive_rejects_bad_configuration() {
        assert!(EncryptionKey::derive("", "clinic-scheduler").is_err());
        assert!(EncryptionKey::derive("senha", "curto").is_err());
    }

    #[test]
    fn test_rejects_truncated_nonce() {
        let key = EncryptionKey::generate();
        let mut encrypted = encrypt(b"dados", &key).unwrap();
        encrypted.nonce.truncate(4);
        assert!(matches!(decrypt(&encrypted, &key), Err(CryptoError::InvalidData(_))));
    }
}
