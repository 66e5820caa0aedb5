//! Descriptor ID derivation.
//!
//! Clients and services both derive, for each replica and time period,
//! a 20-byte descriptor ID. The ID doubles as the descriptor's name
//! and as the lookup key into the directory ring.

use std::fmt;

use digest::Digest;
use sha1::Sha1;

use crate::pk::PermanentId;

/// The secret ID part for one (time period, cookie, replica) triple:
/// `SHA1(be32(period) || cookie? || byte(replica))`.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct SecretIdPart([u8; 20]);

/// A v2 descriptor ID: `SHA1(permanent_id || secret_id_part)`.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct DescriptorId([u8; 20]);

/// Compute the secret ID part for a given time period and replica.
///
/// The optional descriptor cookie participates in the hash when the
/// service uses client authorization; we treat it as opaque bytes.
pub fn secret_id_part(period: u64, cookie: Option<&[u8]>, replica: u8) -> SecretIdPart {
    let mut h = Sha1::new();
    // The wire encoding of the period is a 32-bit counter.
    h.update(((period & 0xffff_ffff) as u32).to_be_bytes());
    if let Some(cookie) = cookie {
        h.update(cookie);
    }
    h.update([replica]);
    SecretIdPart(h.finalize().into())
}

/// Compute the descriptor ID for a service and secret ID part.
pub fn descriptor_id(id: &PermanentId, secret: &SecretIdPart) -> DescriptorId {
    let mut h = Sha1::new();
    h.update(id.as_bytes());
    h.update(secret.as_bytes());
    DescriptorId(h.finalize().into())
}

impl SecretIdPart {
    /// Expose the secret ID part as a slice of bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

impl DescriptorId {
    /// Construct a `DescriptorId` from raw bytes.
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        DescriptorId(bytes)
    }

    /// Expose the descriptor ID as a slice of bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }

    /// Return the uppercase-hex form used to compare a descriptor ID
    /// against directory fingerprints.
    pub fn to_fingerprint(self) -> String {
        hex::encode_upper(self.0)
    }
}

/// Both IDs display as lowercase unpadded base32, the encoding the
/// descriptor format uses for them.
macro_rules! impl_base32_display {
    ($t:ident) => {
        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut b32 = data_encoding::BASE32_NOPAD.encode(&self.0);
                b32.make_ascii_lowercase();
                write!(f, "{}", b32)
            }
        }
        impl fmt::Debug for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($t), "({})"), self)
            }
        }
    };
}
impl_base32_display! {SecretIdPart}
impl_base32_display! {DescriptorId}

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
    use hex_literal::hex;

    #[test]
    fn secret_id_part_no_cookie() {
        let secret = secret_id_part(16611, None, 0);
        assert_eq!(
            secret.as_bytes(),
            hex!("a0d8e4ec9ac28affed4fa828e8727c7fd4ab4930")
        );
    }

    #[test]
    fn secret_id_part_with_cookie() {
        // base64 "dCmx3qIvArbil8A0KM4KgQ==".
        let cookie = hex!("7429b1dea22f02b6e297c03428ce0a81");
        let secret = secret_id_part(16611, Some(&cookie), 0);
        assert_eq!(
            secret.as_bytes(),
            hex!("ea4e24b1a832f1da687f874b40fa9ecfe5221dd9")
        );
    }

    #[test]
    fn replica_changes_the_secret() {
        assert_ne!(
            secret_id_part(16611, None, 0).as_bytes(),
            secret_id_part(16611, None, 1).as_bytes()
        );
    }

    #[test]
    fn descriptor_id_derivation() {
        let id = PermanentId::from_bytes(hex!("4e2a58768ccb6aa06f95"));
        let secret = secret_id_part(16611, None, 0);
        let desc_id = descriptor_id(&id, &secret);
        assert_eq!(
            desc_id.as_bytes(),
            hex!("f58ce3c63ee634e1ffaf936251a822ff06385f55")
        );
        assert_eq!(
            desc_id.to_fingerprint(),
            "F58CE3C63EE634E1FFAF936251A822FF06385F55"
        );
    }

    #[test]
    fn base32_display() {
        let id = PermanentId::from_bytes(hex!("4e2a58768ccb6aa06f95"));
        let secret = secret_id_part(16611, None, 0);
        assert_eq!(secret.to_string(), "udmoj3e2ykfp73kpvauoq4t4p7kkwsjq");
        assert_eq!(
            descriptor_id(&id, &secret).to_string(),
            "6wgohrr64y2od75psnrfdkbc74ddqx2v"
        );
    }
}
