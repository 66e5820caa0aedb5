//! Building and signing v2 rendezvous service descriptors.

use std::net::IpAddr;
use std::time::SystemTime;

use digest::Digest;
use sha1::Sha1;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

use obalance_crypto::pk::PermanentId;
use obalance_crypto::{
    descriptor_id, secret_id_part, DescriptorId, SecretIdPart, ServiceKey, ServicePublicKey,
};

use crate::encode::{pem_object, DocEncoder};
use crate::Error;

/// The bare keyword line that separates the signed portion of a
/// descriptor from its signature object.
const SIGNATURE_TOKEN: &str = "\nsignature\n";

/// Wall-clock format of the `publication-time` item.
pub(crate) const PUBLICATION_TIME_FORMAT: &[FormatItem<'_>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// One introduction point, as carried between a backend instance's
/// descriptor and the master descriptor.
///
/// The key blocks are opaque PEM text; we re-emit them verbatim and
/// never interpret them.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct IntroPoint {
    /// Identifier (base32 fingerprint of the introduction point's
    /// service key).
    pub identifier: String,
    /// IP address of the relay acting as introduction point.
    pub address: IpAddr,
    /// OR port of the relay.
    pub port: u16,
    /// PEM block of the relay's onion key.
    pub onion_key: String,
    /// PEM block of the per-circuit service key.
    pub service_key: String,
}

impl IntroPoint {
    /// Construct an introduction point from its parts.
    pub fn new(
        identifier: impl Into<String>,
        address: IpAddr,
        port: u16,
        onion_key: impl Into<String>,
        service_key: impl Into<String>,
    ) -> Self {
        IntroPoint {
            identifier: identifier.into(),
            address,
            port,
            onion_key: onion_key.into(),
            service_key: service_key.into(),
        }
    }
}

/// Compute the descriptor ID a service will use at `now` for a given
/// replica, optionally some number of whole time periods ahead.
pub fn descriptor_id_at(
    id: &PermanentId,
    now: SystemTime,
    cookie: Option<&[u8]>,
    replica: u8,
    periods_ahead: u64,
) -> DescriptorId {
    let period = obalance_crypto::time::time_period(now, id) + periods_ahead;
    let secret = secret_id_part(period, cookie, replica);
    descriptor_id(id, &secret)
}

/// Render `when` as an hour-truncated UTC `publication-time` value.
pub fn publication_time(when: SystemTime) -> Result<String, Error> {
    let dt = OffsetDateTime::from(when);
    let dt = dt
        .replace_minute(0)
        .and_then(|dt| dt.replace_second(0))
        .and_then(|dt| dt.replace_nanosecond(0))
        .map_err(|_| Error::TimeFormat)?;
    dt.format(PUBLICATION_TIME_FORMAT)
        .map_err(|_| Error::TimeFormat)
}

/// Build the plaintext introduction-point section for `points`.
///
/// Six lines per introduction point; the key blocks supply their own
/// internal newlines.
fn intro_points_text(points: &[IntroPoint]) -> String {
    let mut lines = Vec::new();
    for point in points {
        lines.push(format!("introduction-point {}", point.identifier));
        lines.push(format!("ip-address {}", point.address));
        lines.push(format!("onion-port {}", point.port));
        lines.push("onion-key".to_owned());
        lines.push(point.onion_key.clone());
        lines.push("service-key".to_owned());
        lines.push(point.service_key.clone());
    }
    lines.join("\n")
}

/// Build the framed `MESSAGE` object holding the introduction-point
/// section.
///
/// An empty list yields an empty (but still framed) object.
pub fn build_intro_points_block(points: &[IntroPoint]) -> String {
    pem_object("MESSAGE", intro_points_text(points).as_bytes())
}

/// Build the framed `RSA PUBLIC KEY` object for a service key.
pub fn build_key_block(key: &ServicePublicKey) -> String {
    pem_object("RSA PUBLIC KEY", &key.to_der())
}

/// Emit the unsigned descriptor document, ending with a bare
/// `signature` line.
///
/// The key and introduction-point objects arrive pre-framed; this
/// function only knows the document's fixed shape.
pub fn encode_unsigned(
    desc_id: &DescriptorId,
    key_block: &str,
    secret: &SecretIdPart,
    publication_time: &str,
    intro_points_block: &str,
) -> String {
    let mut enc = DocEncoder::new();
    enc.item("rendezvous-service-descriptor")
        .arg(&desc_id)
        .finish();
    enc.item("version").arg(&2).finish();
    enc.item("permanent-key").object_raw(key_block);
    enc.item("secret-id-part").arg(&secret).finish();
    enc.item("publication-time").arg(&publication_time).finish();
    enc.item("protocol-versions").arg(&"2,3").finish();
    enc.item("introduction-points").object_raw(intro_points_block);
    enc.item("signature").finish();
    enc.finish()
}

/// Sign `descriptor`, or re-sign it if it already carries a signature.
///
/// The text is truncated just after the bare `signature` line (throwing
/// away any previous signature object), hashed with SHA1, signed with
/// unprefixed PKCS#1 v1.5, and the framed `SIGNATURE` object appended.
/// Signing an already-signed descriptor therefore reproduces, byte for
/// byte, the result of signing the unsigned text.
pub fn sign(descriptor: &str, key: &ServiceKey) -> Result<String, Error> {
    let body = match descriptor.find(SIGNATURE_TOKEN) {
        Some(pos) => descriptor[..pos + SIGNATURE_TOKEN.len()].to_owned(),
        None => {
            let mut body = descriptor.trim().to_owned();
            body.push_str(SIGNATURE_TOKEN);
            body
        }
    };
    let digest = Sha1::digest(body.as_bytes());
    let signature = key.sign_digest(&digest)?;
    Ok(body + &pem_object("SIGNATURE", &signature))
}

/// Check the signature on a signed descriptor against `key`.
pub fn verify(descriptor: &str, key: &ServicePublicKey) -> Result<(), Error> {
    let pos = descriptor
        .find(SIGNATURE_TOKEN)
        .ok_or(Error::MissingSignature)?;
    let body = &descriptor[..pos + SIGNATURE_TOKEN.len()];
    let sig_block = &descriptor[pos + SIGNATURE_TOKEN.len()..];
    let signature = crate::parse::decode_pem_object(sig_block, "SIGNATURE")?;
    let digest = Sha1::digest(body.as_bytes());
    key.verify_digest(&digest, &signature)?;
    Ok(())
}

/// Generate a complete signed master descriptor.
///
/// `periods_ahead` shifts the descriptor ID by whole time periods; the
/// publish machinery passes `1` shortly before a rollover so that
/// clients holding the next period's ID can still find the service.
///
/// Fails with [`Error::NoIntroPoints`] when `points` is empty; an empty
/// descriptor must never be uploaded.
pub fn generate(
    key: &ServiceKey,
    points: &[IntroPoint],
    replica: u8,
    periods_ahead: u64,
    now: SystemTime,
) -> Result<String, Error> {
    if points.is_empty() {
        return Err(Error::NoIntroPoints {
            address: key.onion_address(),
        });
    }

    let id = key.permanent_id();
    let period = obalance_crypto::time::time_period(now, &id) + periods_ahead;
    let secret = secret_id_part(period, None, replica);
    let desc_id = descriptor_id(&id, &secret);

    let unsigned = encode_unsigned(
        &desc_id,
        &build_key_block(key.public()),
        &secret,
        &publication_time(now)?,
        &build_intro_points_block(points),
    );
    sign(&unsigned, key)
}
