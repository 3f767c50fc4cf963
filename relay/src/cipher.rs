use crate::error::{RelayError, Result};
use aes_gcm::{
    Aes128Gcm, Aes256Gcm, AesGcm,
    aead::{
        Aead, KeyInit, OsRng,
        consts::U12,
        generic_array::GenericArray,
        rand_core::RngCore,
    },
    aes::Aes192,
};
use chacha20poly1305::ChaCha20Poly1305;
use hkdf::Hkdf;
use md5::{Digest, Md5};
use sha1::Sha1;
use std::fmt;
use std::str::FromStr;

pub const TAG_SIZE: usize = 16;
pub const NONCE_SIZE: usize = 12;

const SUBKEY_INFO: &[u8] = b"ss-subkey";

type Aes192Gcm = AesGcm<Aes192, U12>;

/// AEAD methods a user can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherKind {
    Aes128Gcm,
    Aes192Gcm,
    Aes256Gcm,
    ChaCha20IetfPoly1305,
}

impl CipherKind {
    pub const ALL: [CipherKind; 4] = [
        CipherKind::Aes128Gcm,
        CipherKind::Aes192Gcm,
        CipherKind::Aes256Gcm,
        CipherKind::ChaCha20IetfPoly1305,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CipherKind::Aes128Gcm => "aes-128-gcm",
            CipherKind::Aes192Gcm => "aes-192-gcm",
            CipherKind::Aes256Gcm => "aes-256-gcm",
            CipherKind::ChaCha20IetfPoly1305 => "chacha20-ietf-poly1305",
        }
    }

    /// Upper-case name some panels store instead of [`CipherKind::name`].
    pub fn alias(&self) -> &'static str {
        match self {
            CipherKind::Aes128Gcm => "AEAD_AES_128_GCM",
            CipherKind::Aes192Gcm => "AEAD_AES_192_GCM",
            CipherKind::Aes256Gcm => "AEAD_AES_256_GCM",
            CipherKind::ChaCha20IetfPoly1305 => "AEAD_CHACHA20_POLY1305",
        }
    }

    pub fn key_size(&self) -> usize {
        match self {
            CipherKind::Aes128Gcm => 16,
            CipherKind::Aes192Gcm => 24,
            CipherKind::Aes256Gcm | CipherKind::ChaCha20IetfPoly1305 => 32,
        }
    }

    /// Salts are as long as the key.
    pub fn salt_size(&self) -> usize {
        self.key_size()
    }
}

impl fmt::Display for CipherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        CipherKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s) || kind.alias().eq_ignore_ascii_case(s))
            .ok_or_else(|| RelayError::UnsupportedCipher(s.to_string()))
    }
}

/// Names of every method an instance can be configured with.
pub fn list_ciphers() -> Vec<&'static str> {
    CipherKind::ALL.iter().map(CipherKind::name).collect()
}

/// Long-lived key derived from a user's password with `EVP_BytesToKey`
/// (MD5, one round, no salt).
#[derive(Clone)]
pub struct MasterKey {
    kind: CipherKind,
    key: Vec<u8>,
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("kind", &self.kind)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl MasterKey {
    pub fn derive(kind: CipherKind, password: &str) -> Self {
        let size = kind.key_size();
        let mut key = Vec::with_capacity(size + 16);
        let mut block: Vec<u8> = Vec::new();
        while key.len() < size {
            let mut hasher = Md5::new();
            hasher.update(&block);
            hasher.update(password.as_bytes());
            block = hasher.finalize().to_vec();
            key.extend_from_slice(&block);
        }
        key.truncate(size);
        Self { kind, key }
    }

    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    /// Cipher for one direction of one session, keyed by
    /// HKDF-SHA1(salt, master, "ss-subkey").
    pub fn session(&self, salt: &[u8]) -> Result<SessionCipher> {
        let mut subkey = vec![0u8; self.kind.key_size()];
        Hkdf::<Sha1>::new(Some(salt), &self.key)
            .expand(SUBKEY_INFO, &mut subkey)
            .map_err(key_error)?;

        let aead = match self.kind {
            CipherKind::Aes128Gcm => {
                SessionAead::Aes128(Aes128Gcm::new_from_slice(&subkey).map_err(key_error)?)
            }
            CipherKind::Aes192Gcm => {
                SessionAead::Aes192(Aes192Gcm::new_from_slice(&subkey).map_err(key_error)?)
            }
            CipherKind::Aes256Gcm => {
                SessionAead::Aes256(Aes256Gcm::new_from_slice(&subkey).map_err(key_error)?)
            }
            CipherKind::ChaCha20IetfPoly1305 => SessionAead::ChaCha20(
                ChaCha20Poly1305::new_from_slice(&subkey).map_err(key_error)?,
            ),
        };

        Ok(SessionCipher {
            aead,
            nonce: [0u8; NONCE_SIZE],
        })
    }

    /// Seal a standalone datagram: `salt || AEAD(plaintext)` under the zero
    /// nonce.
    pub fn seal_packet(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let salt = random_salt(self.kind);
        let sealed = self.session(&salt)?.seal(plaintext)?;

        let mut packet = Vec::with_capacity(salt.len() + sealed.len());
        packet.extend_from_slice(&salt);
        packet.extend_from_slice(&sealed);
        Ok(packet)
    }

    pub fn open_packet(&self, packet: &[u8]) -> Result<Vec<u8>> {
        let salt_size = self.kind.salt_size();
        if packet.len() < salt_size + TAG_SIZE {
            return Err(RelayError::Decryption("Packet too short".to_string()));
        }
        let (salt, sealed) = packet.split_at(salt_size);
        self.session(salt)?.open(sealed)
    }
}

enum SessionAead {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
    ChaCha20(ChaCha20Poly1305),
}

/// AEAD state for one direction of a stream; the little-endian nonce
/// advances after every seal or open.
pub struct SessionCipher {
    aead: SessionAead,
    nonce: [u8; NONCE_SIZE],
}

impl SessionCipher {
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = GenericArray::<u8, U12>::from_slice(&self.nonce);
        let sealed = match &self.aead {
            SessionAead::Aes128(cipher) => cipher.encrypt(nonce, plaintext),
            SessionAead::Aes192(cipher) => cipher.encrypt(nonce, plaintext),
            SessionAead::Aes256(cipher) => cipher.encrypt(nonce, plaintext),
            SessionAead::ChaCha20(cipher) => cipher.encrypt(nonce, plaintext),
        }
        .map_err(|e| RelayError::Encryption(e.to_string()))?;
        self.advance_nonce();
        Ok(sealed)
    }

    pub fn open(&mut self, sealed: &[u8]) -> Result<Vec<u8>> {
        let nonce = GenericArray::<u8, U12>::from_slice(&self.nonce);
        let plain = match &self.aead {
            SessionAead::Aes128(cipher) => cipher.decrypt(nonce, sealed),
            SessionAead::Aes192(cipher) => cipher.decrypt(nonce, sealed),
            SessionAead::Aes256(cipher) => cipher.decrypt(nonce, sealed),
            SessionAead::ChaCha20(cipher) => cipher.decrypt(nonce, sealed),
        }
        .map_err(|e| RelayError::Decryption(e.to_string()))?;
        self.advance_nonce();
        Ok(plain)
    }

    fn advance_nonce(&mut self) {
        for byte in self.nonce.iter_mut() {
            let (next, carry) = byte.overflowing_add(1);
            *byte = next;
            if !carry {
                break;
            }
        }
    }
}

fn key_error(e: impl fmt::Display) -> RelayError {
    RelayError::Encryption(e.to_string())
}

pub fn random_salt(kind: CipherKind) -> Vec<u8> {
    let mut salt = vec![0u8; kind.salt_size()];
    OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cipher_names() {
        assert_eq!(
            "aes-256-gcm".parse::<CipherKind>().unwrap(),
            CipherKind::Aes256Gcm
        );
        assert_eq!(
            "AES-192-GCM".parse::<CipherKind>().unwrap(),
            CipherKind::Aes192Gcm
        );
        assert_eq!(
            "AEAD_CHACHA20_POLY1305".parse::<CipherKind>().unwrap(),
            CipherKind::ChaCha20IetfPoly1305
        );
        assert!(matches!(
            "rc4-md5".parse::<CipherKind>(),
            Err(RelayError::UnsupportedCipher(_))
        ));
    }

    #[test]
    fn test_list_ciphers() {
        assert_eq!(
            list_ciphers(),
            vec![
                "aes-128-gcm",
                "aes-192-gcm",
                "aes-256-gcm",
                "chacha20-ietf-poly1305"
            ]
        );
    }

    #[test]
    fn test_master_key_matches_evp_bytes_to_key() {
        let key = |kind| hex::encode(&MasterKey::derive(kind, "foobar").key);
        assert_eq!(key(CipherKind::Aes128Gcm), "3858f62230ac3c915f300c664312c63f");
        assert_eq!(
            key(CipherKind::Aes192Gcm),
            "3858f62230ac3c915f300c664312c63f568378529614d22d"
        );
        assert_eq!(
            key(CipherKind::ChaCha20IetfPoly1305),
            "3858f62230ac3c915f300c664312c63f568378529614d22ddb49237d2f60bfdf"
        );
    }

    #[test]
    fn test_first_chunk_matches_reference_ciphertext() {
        let salt: Vec<u8> = (0u8..32).collect();

        let master = MasterKey::derive(CipherKind::Aes256Gcm, "foobar");
        let sealed = master.session(&salt).unwrap().seal(b"hello").unwrap();
        assert_eq!(hex::encode(sealed), "4e992758f11203e171f05b7ec0dbf64b7327ed0954");

        let master = MasterKey::derive(CipherKind::ChaCha20IetfPoly1305, "foobar");
        let sealed = master.session(&salt).unwrap().seal(b"hello").unwrap();
        assert_eq!(hex::encode(sealed), "35f248992c7906e4afd8e6803b175af9d072c071f9");
    }

    #[test]
    fn test_session_nonce_sequence() {
        for kind in CipherKind::ALL {
            let master = MasterKey::derive(kind, "pw");
            let salt = random_salt(kind);
            assert_eq!(salt.len(), kind.salt_size());
            let mut sealer = master.session(&salt).unwrap();

            let first = sealer.seal(b"first").unwrap();
            let second = sealer.seal(b"second").unwrap();

            let mut opener = master.session(&salt).unwrap();
            assert!(opener.open(&second).is_err());
            let mut opener = master.session(&salt).unwrap();
            assert_eq!(opener.open(&first).unwrap(), b"first");
            assert_eq!(opener.open(&second).unwrap(), b"second");
        }
    }

    #[test]
    fn test_packet_rejects_wrong_password() {
        let sealed = MasterKey::derive(CipherKind::Aes128Gcm, "right")
            .seal_packet(b"payload")
            .unwrap();
        assert_eq!(sealed.len(), 16 + 7 + TAG_SIZE);
        assert!(
            MasterKey::derive(CipherKind::Aes128Gcm, "wrong")
                .open_packet(&sealed)
                .is_err()
        );
        assert_eq!(
            MasterKey::derive(CipherKind::Aes128Gcm, "right")
                .open_packet(&sealed)
                .unwrap(),
            b"payload"
        );
    }

    #[test]
    fn test_nonce_carries() {
        let master = MasterKey::derive(CipherKind::Aes128Gcm, "pw");
        let mut cipher = master.session(&[0u8; 16]).unwrap();
        cipher.nonce[0] = 0xff;
        cipher.advance_nonce();
        assert_eq!(cipher.nonce[0], 0);
        assert_eq!(cipher.nonce[1], 1);
    }
}
