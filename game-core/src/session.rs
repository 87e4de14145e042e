//! Session cookie codec.
//!
//! A session is carried entirely by the client. The payload is
//! `version ‖ [flags ‖ uvarint(len) ‖ player_id]`, signed with
//! HMAC-SHA256, sealed with XChaCha20-Poly1305 and URL-safe base64 encoded:
//!
//! ```text
//! base64url( nonce ‖ seal( payload ‖ hmac(payload) ) )
//! ```

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The only payload layout this codec reads or writes.
pub const SESSION_VERSION: u8 = 1;

pub const KEY_LEN: usize = 32;
const MAC_LEN: usize = 32;
const NONCE_LEN: usize = 24;
// A u64 never needs more than ten LEB128 groups.
const MAX_VARINT_LEN: usize = 10;

const PLAYER_FLAG: u8 = 0x01;
const SUPER_USER_FLAG: u8 = 0x02;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub is_player: bool,
    pub is_super_user: bool,
    pub player_id: String,
}

impl SessionState {
    pub fn player(player_id: impl Into<String>) -> Self {
        Self {
            is_player: true,
            is_super_user: false,
            player_id: player_id.into(),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.is_player {
            flags |= PLAYER_FLAG;
        }
        if self.is_super_user {
            flags |= SUPER_USER_FLAG;
        }
        flags
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("failed to seal session: {0}")]
    Encryption(String),
    #[error("session is not valid base64")]
    Decode,
    #[error("session could not be decrypted")]
    Decryption,
    #[error("session signature mismatch")]
    Signature,
    #[error("unsupported session version {0}")]
    Version(u8),
    #[error("malformed session payload: {0}")]
    Malformed(&'static str),
    #[error("session keys must be 32 bytes, got {0}")]
    KeyLength(usize),
}

/// The two independent secrets behind a session cookie.
#[derive(Clone)]
pub struct SessionKeys {
    signature: [u8; KEY_LEN],
    encryption: [u8; KEY_LEN],
}

impl SessionKeys {
    pub fn new(signature: [u8; KEY_LEN], encryption: [u8; KEY_LEN]) -> Self {
        Self {
            signature,
            encryption,
        }
    }

    pub fn from_slices(signature: &[u8], encryption: &[u8]) -> Result<Self, SessionError> {
        let signature: [u8; KEY_LEN] = signature
            .try_into()
            .map_err(|_| SessionError::KeyLength(signature.len()))?;
        let encryption: [u8; KEY_LEN] = encryption
            .try_into()
            .map_err(|_| SessionError::KeyLength(encryption.len()))?;
        Ok(Self::new(signature, encryption))
    }

    /// Fresh random keys. Cookies sealed with them die with the process.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let mut signature = [0u8; KEY_LEN];
        let mut encryption = [0u8; KEY_LEN];
        rng.fill(&mut signature);
        rng.fill(&mut encryption);
        Self::new(signature, encryption)
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct SessionCodec {
    keys: SessionKeys,
}

impl SessionCodec {
    pub fn new(keys: SessionKeys) -> Self {
        Self { keys }
    }

    pub fn serialize(&self, state: &SessionState) -> Result<String, SessionError> {
        let mut payload = Vec::with_capacity(2 + MAX_VARINT_LEN + state.player_id.len());
        payload.push(SESSION_VERSION);

        let flags = state.flags();
        if flags != 0 {
            payload.push(flags);
            if state.is_player {
                write_uvarint(&mut payload, state.player_id.len() as u64);
                payload.extend_from_slice(state.player_id.as_bytes());
            }
        }

        self.sign_and_encode(&payload)
    }

    pub fn deserialize(&self, raw: &str) -> Result<SessionState, SessionError> {
        let payload = self.decode_and_check(raw)?;
        let mut reader = Reader::new(&payload);

        let version = reader.byte().ok_or(SessionError::Malformed("missing version"))?;
        if version != SESSION_VERSION {
            return Err(SessionError::Version(version));
        }

        let Some(flags) = reader.byte() else {
            return Ok(SessionState::anonymous());
        };

        let mut state = SessionState {
            is_super_user: flags & SUPER_USER_FLAG != 0,
            ..SessionState::default()
        };

        if flags & PLAYER_FLAG != 0 {
            let len = reader.uvarint()?;
            let len = usize::try_from(len)
                .map_err(|_| SessionError::Malformed("player id length overflow"))?;
            let id = reader
                .take(len)
                .ok_or(SessionError::Malformed("truncated player id"))?;
            state.player_id = std::str::from_utf8(id)
                .map_err(|_| SessionError::Malformed("player id is not utf-8"))?
                .to_string();
            state.is_player = true;
        }

        Ok(state)
    }

    /// Signs, seals and encodes an arbitrary payload.
    pub fn sign_and_encode(&self, payload: &[u8]) -> Result<String, SessionError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.keys.signature)
            .map_err(|e| SessionError::Encryption(e.to_string()))?;
        mac.update(payload);
        let tag = mac.finalize().into_bytes();

        let mut signed = Vec::with_capacity(payload.len() + MAC_LEN);
        signed.extend_from_slice(payload);
        signed.extend_from_slice(&tag);

        let cipher = XChaCha20Poly1305::new((&self.keys.encryption).into());
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let sealed = cipher
            .encrypt(nonce, signed.as_ref())
            .map_err(|e| SessionError::Encryption(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);

        Ok(URL_SAFE.encode(out))
    }

    /// Inverse of [`SessionCodec::sign_and_encode`]. Returns the payload
    /// only once the signature has been checked.
    pub fn decode_and_check(&self, raw: &str) -> Result<Vec<u8>, SessionError> {
        let bytes = URL_SAFE.decode(raw).map_err(|_| SessionError::Decode)?;
        if bytes.len() < NONCE_LEN {
            return Err(SessionError::Decryption);
        }

        let (nonce_bytes, sealed) = bytes.split_at(NONCE_LEN);
        let cipher = XChaCha20Poly1305::new((&self.keys.encryption).into());
        let signed = cipher
            .decrypt(XNonce::from_slice(nonce_bytes), sealed)
            .map_err(|_| SessionError::Decryption)?;

        if signed.len() < MAC_LEN {
            return Err(SessionError::Signature);
        }
        let (payload, tag) = signed.split_at(signed.len() - MAC_LEN);

        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.keys.signature)
            .map_err(|_| SessionError::Signature)?;
        mac.update(payload);
        mac.verify_slice(tag).map_err(|_| SessionError::Signature)?;

        Ok(payload.to_vec())
    }
}

fn write_uvarint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn byte(&mut self) -> Option<u8> {
        let b = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn uvarint(&mut self) -> Result<u64, SessionError> {
        let mut value: u64 = 0;
        for i in 0..MAX_VARINT_LEN {
            let b = self
                .byte()
                .ok_or(SessionError::Malformed("truncated length"))?;
            if i == MAX_VARINT_LEN - 1 && b > 1 {
                return Err(SessionError::Malformed("length overflow"));
            }
            value |= u64::from(b & 0x7f) << (7 * i);
            if b < 0x80 {
                return Ok(value);
            }
        }
        Err(SessionError::Malformed("length overflow"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIG_KEY: &[u8; 32] = b"fake_sig_key_1_2_3_4_5_6_7_8_9_0";
    const CRYPT_KEY: &[u8; 32] = b"fake_crypt_key_1_2_3_4_5_6_7_8_9";

    fn codec() -> SessionCodec {
        SessionCodec::new(SessionKeys::new(*SIG_KEY, *CRYPT_KEY))
    }

    #[test]
    fn test_encode_decode_raw_payload() {
        let codec = codec();
        let msg: Vec<u8> = (0..50u8).map(|i| b'a' + i % 26).collect();

        let out = codec.sign_and_encode(&msg).unwrap();
        let back = codec.decode_and_check(&out).unwrap();

        assert_eq!(back, msg);
    }

    #[test]
    fn test_player_round_trip() {
        let codec = codec();
        let encoded = codec.serialize(&SessionState::player("xyz")).unwrap();
        assert!(!encoded.is_empty());

        let decoded = codec.deserialize(&encoded).unwrap();
        assert_eq!(
            decoded,
            SessionState {
                is_player: true,
                is_super_user: false,
                player_id: "xyz".to_string(),
            }
        );
    }

    #[test]
    fn test_round_trip_for_every_shape() {
        let codec = codec();
        let long_id: String = std::iter::repeat('k').take(1025).collect();
        let states = vec![
            SessionState::anonymous(),
            SessionState::player(""),
            SessionState::player("550e8400-e29b-41d4-a716-446655440001"),
            SessionState::player(long_id),
            SessionState::player("ünïcødé"),
            SessionState {
                is_player: true,
                is_super_user: true,
                player_id: "admin".to_string(),
            },
            SessionState {
                is_player: false,
                is_super_user: true,
                player_id: String::new(),
            },
        ];

        for state in states {
            let encoded = codec.serialize(&state).unwrap();
            assert_eq!(codec.deserialize(&encoded).unwrap(), state);
        }
    }

    #[test]
    fn test_anonymous_payload_is_version_byte_only() {
        let codec = codec();
        let encoded = codec.serialize(&SessionState::anonymous()).unwrap();
        let payload = codec.decode_and_check(&encoded).unwrap();
        assert_eq!(payload, vec![SESSION_VERSION]);
    }

    #[test]
    fn test_player_payload_layout() {
        let codec = codec();
        let encoded = codec.serialize(&SessionState::player("abc")).unwrap();
        let payload = codec.decode_and_check(&encoded).unwrap();
        assert_eq!(payload, vec![SESSION_VERSION, PLAYER_FLAG, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_serialization_is_randomized() {
        let codec = codec();
        let state = SessionState::player("xyz");
        let a = codec.serialize(&state).unwrap();
        let b = codec.serialize(&state).unwrap();
        assert_ne!(a, b);
        assert_eq!(codec.deserialize(&a).unwrap(), codec.deserialize(&b).unwrap());
    }

    #[test]
    fn test_any_bit_flip_is_rejected() {
        let codec = codec();
        let encoded = codec.serialize(&SessionState::player("xyz")).unwrap();
        let raw = URL_SAFE.decode(&encoded).unwrap();

        for byte in 0..raw.len() {
            for bit in 0..8 {
                let mut tampered = raw.clone();
                tampered[byte] ^= 1 << bit;
                let result = codec.deserialize(&URL_SAFE.encode(&tampered));
                assert!(
                    matches!(
                        result,
                        Err(SessionError::Decryption) | Err(SessionError::Signature)
                    ),
                    "flip at byte {byte} bit {bit} gave {result:?}"
                );
            }
        }
    }

    #[test]
    fn test_tampered_string_never_decodes_to_state() {
        let codec = codec();
        let encoded = codec.serialize(&SessionState::player("xyz")).unwrap();
        let mut chars: Vec<char> = encoded.chars().collect();
        chars[10] = if chars[10] == 'A' { 'B' } else { 'A' };
        let tampered: String = chars.into_iter().collect();

        assert!(codec.deserialize(&tampered).is_err());
    }

    #[test]
    fn test_malformed_base64() {
        assert_eq!(
            codec().deserialize("not*valid*base64").unwrap_err(),
            SessionError::Decode
        );
    }

    #[test]
    fn test_short_ciphertext() {
        let short = URL_SAFE.encode([0u8; 8]);
        assert_eq!(
            codec().deserialize(&short).unwrap_err(),
            SessionError::Decryption
        );
    }

    #[test]
    fn test_wrong_encryption_key() {
        let encoded = codec().serialize(&SessionState::player("xyz")).unwrap();
        let other = SessionCodec::new(SessionKeys::new(*SIG_KEY, [7u8; 32]));
        assert_eq!(
            other.deserialize(&encoded).unwrap_err(),
            SessionError::Decryption
        );
    }

    #[test]
    fn test_wrong_signature_key() {
        let encoded = codec().serialize(&SessionState::player("xyz")).unwrap();
        let other = SessionCodec::new(SessionKeys::new([7u8; 32], *CRYPT_KEY));
        assert_eq!(
            other.deserialize(&encoded).unwrap_err(),
            SessionError::Signature
        );
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let codec = codec();
        let encoded = codec.sign_and_encode(&[2, PLAYER_FLAG, 1, b'x']).unwrap();
        assert_eq!(
            codec.deserialize(&encoded).unwrap_err(),
            SessionError::Version(2)
        );
    }

    #[test]
    fn test_truncated_player_id_is_rejected() {
        let codec = codec();
        let encoded = codec
            .sign_and_encode(&[SESSION_VERSION, PLAYER_FLAG, 5, b'a', b'b'])
            .unwrap();
        assert!(matches!(
            codec.deserialize(&encoded),
            Err(SessionError::Malformed(_))
        ));
    }

    #[test]
    fn test_unterminated_length_is_rejected() {
        let codec = codec();
        let encoded = codec
            .sign_and_encode(&[SESSION_VERSION, PLAYER_FLAG, 0x80, 0x80])
            .unwrap();
        assert!(matches!(
            codec.deserialize(&encoded),
            Err(SessionError::Malformed(_))
        ));
    }

    #[test]
    fn test_empty_payload_is_rejected() {
        let codec = codec();
        let encoded = codec.sign_and_encode(&[]).unwrap();
        assert!(matches!(
            codec.deserialize(&encoded),
            Err(SessionError::Malformed(_))
        ));
    }

    #[test]
    fn test_uvarint_matches_leb128() {
        let mut buf = Vec::new();
        write_uvarint(&mut buf, 1025);
        assert_eq!(buf, vec![0x81, 0x08]);

        let mut reader = Reader::new(&buf);
        assert_eq!(reader.uvarint().unwrap(), 1025);

        let mut buf = Vec::new();
        write_uvarint(&mut buf, u64::MAX);
        assert_eq!(buf.len(), MAX_VARINT_LEN);
        assert_eq!(Reader::new(&buf).uvarint().unwrap(), u64::MAX);
    }

    #[test]
    fn test_key_length_checked() {
        assert_eq!(
            SessionKeys::from_slices(&[0u8; 16], &[0u8; 32]).unwrap_err(),
            SessionError::KeyLength(16)
        );
        assert!(SessionKeys::from_slices(&[0u8; 32], &[0u8; 32]).is_ok());
    }

    #[test]
    fn test_generated_keys_are_distinct() {
        let a = SessionCodec::new(SessionKeys::generate());
        let b = SessionCodec::new(SessionKeys::generate());
        let encoded = a.serialize(&SessionState::player("xyz")).unwrap();
        assert!(b.deserialize(&encoded).is_err());
    }
}
