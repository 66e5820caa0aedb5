//! RSA key handling for v2 onion services.
//!
//! A v2 onion service is identified by an RSA-1024 key pair. The
//! service's "permanent ID" is the first 10 bytes of the SHA1 digest of
//! the DER-encoded `(n, e)` sequence of its public key, and its
//! `.onion` address is the lowercase base32 encoding of that ID.
//!
//! Descriptor signatures use unprefixed PKCS#1 v1.5: the bare SHA1
//! digest is padded (no algorithm identifier) and run through the raw
//! RSA private-key operation.

use std::fmt;
use std::path::Path;

use digest::Digest;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;

use crate::KeyError;

/// Length of a permanent ID, in bytes.
pub const PERMANENT_ID_LEN: usize = 10;

/// Modulus length (in bytes) of the only key size the v2 descriptor
/// format supports.
pub const RSA1024_MODULUS_LEN: usize = 128;

/// A validated service key pair.
///
/// Can only be obtained from [`ServiceKey::load_pem_file`] or
/// [`ServiceKey::from_pem`], both of which reject keys that are not
/// usable for a v2 onion service. Holding a `ServiceKey` therefore
/// implies a well-formed RSA-1024 private key.
#[derive(Clone)]
pub struct ServiceKey {
    /// The private key.
    key: RsaPrivateKey,
    /// The corresponding public key, precomputed at load time.
    public: ServicePublicKey,
}

/// The public half of a service key.
#[derive(Clone, Debug)]
pub struct ServicePublicKey(RsaPublicKey);

/// The 10-byte truncated key digest identifying a v2 onion service.
///
/// Displays as the service's `.onion` address label (lowercase base32,
/// no padding).
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct PermanentId([u8; PERMANENT_ID_LEN]);

impl ServiceKey {
    /// Load a PEM-encoded PKCS#1 RSA private key from `path`.
    pub fn load_pem_file(path: impl AsRef<Path>) -> Result<Self, KeyError> {
        let pem = std::fs::read_to_string(path.as_ref()).map_err(|e| KeyError::Io {
            path: path.as_ref().to_owned(),
            error: e.to_string(),
        })?;
        Self::from_pem(&pem)
    }

    /// Construct a `ServiceKey` from a PEM-encoded PKCS#1 RSA private key.
    ///
    /// Fails if the PEM cannot be decoded, or if the key is not 1024
    /// bits long.
    pub fn from_pem(pem: &str) -> Result<Self, KeyError> {
        let key = RsaPrivateKey::from_pkcs1_pem(pem).map_err(|_| KeyError::InvalidKey)?;
        if key.size() != RSA1024_MODULUS_LEN {
            return Err(KeyError::WrongKeySize {
                bits: key.size() * 8,
            });
        }
        let public = ServicePublicKey(key.to_public_key());
        Ok(ServiceKey { key, public })
    }

    /// Return the public half of this key.
    pub fn public(&self) -> &ServicePublicKey {
        &self.public
    }

    /// Return the permanent ID derived from this key.
    pub fn permanent_id(&self) -> PermanentId {
        self.public.permanent_id()
    }

    /// Return the `.onion` address label derived from this key.
    pub fn onion_address(&self) -> String {
        self.public.onion_address()
    }

    /// Sign a message digest with unprefixed PKCS#1 v1.5.
    ///
    /// The digest is padded as `0x00 0x01 0xFF... 0x00 || digest` to
    /// the modulus length (see [`pkcs1_pad`](crate::pkcs1_pad)) and run
    /// through the private-key operation. The digest must leave room
    /// for the 11 bytes of fixed padding.
    pub fn sign_digest(&self, digest: &[u8]) -> Result<Vec<u8>, KeyError> {
        self.key
            .sign(Pkcs1v15Sign::new_unprefixed(), digest)
            .map_err(|_| KeyError::SignatureFailed)
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never expose private key material, even in debug output.
        write!(f, "ServiceKey({}.onion)", self.onion_address())
    }
}

impl ServicePublicKey {
    /// Decode a public key from the DER `(n, e)` sequence used in
    /// descriptors.
    pub fn from_der(der: &[u8]) -> Result<Self, KeyError> {
        use rsa::pkcs1::DecodeRsaPublicKey;
        let key = RsaPublicKey::from_pkcs1_der(der).map_err(|_| KeyError::InvalidKey)?;
        Ok(ServicePublicKey(key))
    }

    /// Encode this key as the DER `(n, e)` sequence used in descriptors.
    ///
    /// (This is a PKCS#1 `RSAPublicKey`, not a `SubjectPublicKeyInfo`.)
    pub fn to_der(&self) -> Vec<u8> {
        // Encoding a validated key cannot fail; the Err arm is dead.
        self.0
            .to_pkcs1_der()
            .map(|doc| doc.as_bytes().to_vec())
            .unwrap_or_default()
    }

    /// Compute the permanent ID for this key:
    /// `SHA1(DER(n, e))[0..10]`.
    pub fn permanent_id(&self) -> PermanentId {
        let digest = Sha1::digest(self.to_der());
        let mut id = [0_u8; PERMANENT_ID_LEN];
        id.copy_from_slice(&digest[..PERMANENT_ID_LEN]);
        PermanentId(id)
    }

    /// Return the `.onion` address label for this key.
    pub fn onion_address(&self) -> String {
        self.permanent_id().to_string()
    }

    /// Check an unprefixed PKCS#1 v1.5 signature over `digest`.
    pub fn verify_digest(&self, digest: &[u8], signature: &[u8]) -> Result<(), KeyError> {
        self.0
            .verify(Pkcs1v15Sign::new_unprefixed(), digest, signature)
            .map_err(|_| KeyError::BadSignature)
    }
}

impl PermanentId {
    /// Construct a `PermanentId` from raw bytes.
    pub fn from_bytes(bytes: [u8; PERMANENT_ID_LEN]) -> Self {
        PermanentId(bytes)
    }

    /// Expose the ID as a slice of bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }

    /// Return the first byte of the ID.
    ///
    /// This byte skews the service's time-period boundary so that
    /// different services roll their descriptor IDs over at different
    /// times of day.
    pub fn skew_byte(&self) -> u8 {
        self.0[0]
    }
}

impl fmt::Display for PermanentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut b32 = data_encoding::BASE32_NOPAD.encode(&self.0);
        b32.make_ascii_lowercase();
        write!(f, "{}", b32)
    }
}

impl fmt::Debug for PermanentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PermanentId({})", self)
    }
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::dbg_macro)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::single_char_pattern)]
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::unchecked_duration_subtraction)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->
    use super::*;
    use crate::testing::TEST_KEY_PEM;
    use hex_literal::hex;

    #[test]
    fn der_sequence() {
        let key = ServiceKey::from_pem(TEST_KEY_PEM).unwrap();
        assert_eq!(
            key.public().to_der(),
            hex!(
                "30818902818100d7ccfe871ad8cf4b2eee17d3a563b66679f4d529c14bb2ad26"
                "484cd0ad6e704a236e61cf9da12576396c4f83ed5f55ed7d112e3701492afdb4"
                "bf82300c2ceba73fabbd15b3c3a23ca1d55b3fe9356a7ed4b7b0f92543422dae"
                "b67003086d1c2d16684cabc1824d392081ab7c29ba975086947258916a3309bd"
                "fa20421b541c250203010001"
            )
        );
    }

    #[test]
    fn permanent_id() {
        let key = ServiceKey::from_pem(TEST_KEY_PEM).unwrap();
        assert_eq!(key.permanent_id().as_bytes(), hex!("4e2a58768ccb6aa06f95"));
    }

    #[test]
    fn onion_address() {
        let key = ServiceKey::from_pem(TEST_KEY_PEM).unwrap();
        assert_eq!(key.onion_address(), "jyvfq5umznvka34v");
    }

    #[test]
    fn sign_and_verify() {
        let key = ServiceKey::from_pem(TEST_KEY_PEM).unwrap();
        let digest = hex!("2a447f044d2f8d8127e8133b2d545450bc58760e");
        let sig = key.sign_digest(&digest).unwrap();
        assert_eq!(sig.len(), RSA1024_MODULUS_LEN);
        key.public().verify_digest(&digest, &sig).unwrap();
        assert!(key.public().verify_digest(&digest, &sig[1..]).is_err());
    }

    #[test]
    fn reject_garbage_pem() {
        assert!(matches!(
            ServiceKey::from_pem("not a key"),
            Err(KeyError::InvalidKey)
        ));
    }

    #[test]
    fn roundtrip_public_der() {
        let key = ServiceKey::from_pem(TEST_KEY_PEM).unwrap();
        let der = key.public().to_der();
        let decoded = ServicePublicKey::from_der(&der).unwrap();
        assert_eq!(decoded.onion_address(), "jyvfq5umznvka34v");
    }
}
