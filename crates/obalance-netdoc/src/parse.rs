//! Parsing the fields of a received v2 descriptor.
//!
//! A balancer only needs a few things out of a backend instance's
//! descriptor: whose it is, when it was published, and which
//! introduction points it lists. This is a field extractor for exactly
//! those, not a general-purpose document parser.

use std::net::IpAddr;
use std::time::SystemTime;

use base64ct::{Base64, Encoding};
use time::PrimitiveDateTime;

use obalance_crypto::ServicePublicKey;

use crate::desc::{IntroPoint, PUBLICATION_TIME_FORMAT};
use crate::Error;

/// The fields of a backend instance's descriptor that the balancer
/// acts on.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct InstanceDescriptor {
    /// Onion address derived from the embedded permanent key, without
    /// the `.onion` suffix.
    pub onion_address: String,
    /// The instance's public permanent key.
    pub permanent_key: ServicePublicKey,
    /// Hour-truncated publication time claimed by the descriptor.
    pub published: SystemTime,
    /// Introduction points listed in the descriptor.
    pub intro_points: Vec<IntroPoint>,
}

impl InstanceDescriptor {
    /// Assemble an `InstanceDescriptor` from its parts.
    ///
    /// Mostly useful for tests; real descriptors come from
    /// [`parse_instance_descriptor`].
    pub fn new(
        permanent_key: ServicePublicKey,
        published: SystemTime,
        intro_points: Vec<IntroPoint>,
    ) -> Self {
        InstanceDescriptor {
            onion_address: permanent_key.permanent_id().to_string(),
            permanent_key,
            published,
            intro_points,
        }
    }
}

/// Parse and validate a received instance descriptor.
///
/// The signature is checked against the descriptor's own embedded
/// permanent key; whether that key belongs to a configured instance is
/// the caller's problem.
///
/// Descriptors whose introduction-point list is encrypted (client
/// authorization) are rejected with [`Error::EncryptedIntroPoints`].
pub fn parse_instance_descriptor(text: &str) -> Result<InstanceDescriptor, Error> {
    let key_block = extract_object(text, "permanent-key", "RSA PUBLIC KEY")?;
    let der = decode_pem_object(&key_block, "RSA PUBLIC KEY")?;
    let permanent_key = ServicePublicKey::from_der(&der)?;
    let onion_address = permanent_key.permanent_id().to_string();

    crate::desc::verify(text, &permanent_key)?;

    let published_arg = item_arg(text, "publication-time")?;
    let published = PrimitiveDateTime::parse(published_arg, PUBLICATION_TIME_FORMAT)
        .map_err(|_| Error::BadItem {
            keyword: "publication-time",
        })?
        .assume_utc()
        .into();

    let message = extract_object(text, "introduction-points", "MESSAGE")?;
    let payload = decode_pem_object(&message, "MESSAGE")?;
    let intro_points = parse_intro_points(&payload)?;

    Ok(InstanceDescriptor {
        onion_address,
        permanent_key,
        published,
        intro_points,
    })
}

/// Return the (single) argument of the first `keyword` line in `text`.
fn item_arg<'a>(text: &'a str, keyword: &'static str) -> Result<&'a str, Error> {
    text.lines()
        .find_map(|line| line.strip_prefix(keyword).and_then(|l| l.strip_prefix(' ')))
        .map(str::trim)
        .ok_or(Error::MissingItem { keyword })
}

/// Extract the framed object that follows a bare `keyword` line.
///
/// Returns the object text including its `BEGIN`/`END` lines, without a
/// trailing newline.
fn extract_object(text: &str, keyword: &'static str, label: &'static str) -> Result<String, Error> {
    let begin = format!("-----BEGIN {}-----", label);
    let end = format!("-----END {}-----", label);

    let mut lines = text.lines();
    for line in lines.by_ref() {
        if line == keyword {
            break;
        }
    }
    let mut object = Vec::new();
    match lines.next() {
        Some(line) if line == begin => object.push(line),
        _ => return Err(Error::MissingItem { keyword }),
    }
    for line in lines {
        object.push(line);
        if line == end {
            return Ok(object.join("\n"));
        }
    }
    Err(Error::BadObject { label })
}

/// Decode the base64 body of a framed object.
pub(crate) fn decode_pem_object(block: &str, label: &'static str) -> Result<Vec<u8>, Error> {
    let begin = format!("-----BEGIN {}-----", label);
    let end = format!("-----END {}-----", label);

    let mut lines = block.trim().lines();
    if lines.next() != Some(begin.as_str()) {
        return Err(Error::BadObject { label });
    }
    let mut b64 = String::new();
    for line in lines {
        if line == end {
            return Base64::decode_vec(&b64).map_err(|_| Error::BadObject { label });
        }
        b64.push_str(line.trim());
    }
    Err(Error::BadObject { label })
}

/// Parse the decoded payload of the `introduction-points` object.
///
/// The payload is the plaintext section when the service does not use
/// client authorization; anything else (it starts with a format byte
/// rather than a keyword) is an encrypted list we cannot read.
fn parse_intro_points(payload: &[u8]) -> Result<Vec<IntroPoint>, Error> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    let text = std::str::from_utf8(payload).map_err(|_| Error::EncryptedIntroPoints)?;
    if !text.starts_with("introduction-point ") {
        return Err(Error::EncryptedIntroPoints);
    }

    let mut points = Vec::new();
    let mut lines = text.lines().peekable();
    while let Some(line) = lines.next() {
        let identifier = line
            .strip_prefix("introduction-point ")
            .ok_or(Error::BadItem {
                keyword: "introduction-point",
            })?;
        let address: IpAddr = expect_arg(lines.next(), "ip-address")?
            .parse()
            .map_err(|_| Error::BadItem {
                keyword: "ip-address",
            })?;
        let port: u16 = expect_arg(lines.next(), "onion-port")?
            .parse()
            .map_err(|_| Error::BadItem {
                keyword: "onion-port",
            })?;
        expect_bare(lines.next(), "onion-key")?;
        let onion_key = take_object(&mut lines, "RSA PUBLIC KEY")?;
        expect_bare(lines.next(), "service-key")?;
        let service_key = take_object(&mut lines, "RSA PUBLIC KEY")?;

        points.push(IntroPoint::new(
            identifier, address, port, onion_key, service_key,
        ));
    }
    Ok(points)
}

/// Require `line` to be `keyword <arg>` and return the argument.
fn expect_arg<'a>(line: Option<&'a str>, keyword: &'static str) -> Result<&'a str, Error> {
    line.and_then(|l| l.strip_prefix(keyword))
        .and_then(|l| l.strip_prefix(' '))
        .map(str::trim)
        .ok_or(Error::MissingItem { keyword })
}

/// Require `line` to be exactly the bare `keyword`.
fn expect_bare(line: Option<&str>, keyword: &'static str) -> Result<(), Error> {
    if line == Some(keyword) {
        Ok(())
    } else {
        Err(Error::MissingItem { keyword })
    }
}

/// Consume a framed object from a line iterator and return it verbatim.
fn take_object<'a>(
    lines: &mut std::iter::Peekable<std::str::Lines<'a>>,
    label: &'static str,
) -> Result<String, Error> {
    let begin = format!("-----BEGIN {}-----", label);
    let end = format!("-----END {}-----", label);

    let mut object = Vec::new();
    match lines.next() {
        Some(line) if line == begin => object.push(line),
        _ => return Err(Error::BadObject { label }),
    }
    for line in lines.by_ref() {
        object.push(line);
        if line == end {
            return Ok(object.join("\n"));
        }
    }
    Err(Error::BadObject { label })
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

    use std::time::{Duration, UNIX_EPOCH};

    use obalance_crypto::testing::TEST_KEY_PEM;
    use obalance_crypto::ServiceKey;

    use crate::desc::{encode_unsigned, generate, sign};
    use crate::encode::pem_object;
    use obalance_crypto::{descriptor_id, secret_id_part};

    const FAKE_KEY_BLOCK: &str =
        "-----BEGIN RSA PUBLIC KEY-----\nAA==\n-----END RSA PUBLIC KEY-----";

    fn test_key() -> ServiceKey {
        ServiceKey::from_pem(TEST_KEY_PEM).unwrap()
    }

    fn when() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_435_233_021)
    }

    fn sample_points() -> Vec<IntroPoint> {
        vec![
            IntroPoint::new(
                "b5y6stg62yjy5a6ohqwn55lndmzjv2nf",
                "203.0.113.7".parse::<IpAddr>().unwrap(),
                9001,
                FAKE_KEY_BLOCK,
                FAKE_KEY_BLOCK,
            ),
            IntroPoint::new(
                "dkffbyg3nuysjzvxzdmfrayjbbpmodjq",
                "2001:db8::7".parse::<IpAddr>().unwrap(),
                443,
                FAKE_KEY_BLOCK,
                FAKE_KEY_BLOCK,
            ),
        ]
    }

    #[test]
    fn roundtrip_generated_descriptor() {
        let key = test_key();
        let points = sample_points();
        let signed = generate(&key, &points, 0, 0, when()).unwrap();

        let parsed = parse_instance_descriptor(&signed).unwrap();
        assert_eq!(parsed.onion_address, "jyvfq5umznvka34v");
        assert_eq!(parsed.intro_points, points);
        // publication-time was truncated to 11:00:00.
        assert_eq!(
            parsed.published,
            UNIX_EPOCH + Duration::from_secs(1_435_230_000)
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_instance_descriptor("not-a-valid-descriptor-input").is_err());
    }

    #[test]
    fn rejects_encrypted_intro_points() {
        let key = test_key();
        let id = key.permanent_id();
        let secret = secret_id_part(obalance_crypto::time::time_period(when(), &id), None, 0);
        let desc_id = descriptor_id(&id, &secret);
        // A client-authorization list starts with a binary format byte.
        let encrypted = pem_object("MESSAGE", &[0x01, 0x42, 0x42, 0x42, 0x42]);
        let unsigned = encode_unsigned(
            &desc_id,
            &crate::desc::build_key_block(key.public()),
            &secret,
            "2015-06-25 11:00:00",
            &encrypted,
        );
        let signed = sign(&unsigned, &key).unwrap();

        assert!(matches!(
            parse_instance_descriptor(&signed),
            Err(Error::EncryptedIntroPoints)
        ));
    }

    #[test]
    fn rejects_bad_signature() {
        let key = test_key();
        let signed = generate(&key, &sample_points(), 0, 0, when()).unwrap();
        let tampered = signed.replace("2015-06-25 11:00:00", "2015-06-25 12:00:00");
        assert!(parse_instance_descriptor(&tampered).is_err());
    }

    #[test]
    fn empty_message_payload_gives_no_points() {
        assert_eq!(parse_intro_points(b"").unwrap(), Vec::new());
    }
}
