//! AWS Signature Version 4.
//!
//! Produces the `Authorization` header for a request from its canonical
//! parts; the caller supplies the headers it will send (at least `host`
//! and `x-amz-date`) and the hex SHA-256 of the body.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Credentials and scope a request is signed for.
pub struct Signer<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub region: &'a str,
    pub service: &'a str,
}

/// Request line and body hash of the request being signed. `uri` and
/// `query` must already be percent-encoded, the query sorted by name.
pub struct CanonicalRequest<'a> {
    pub method: &'a str,
    pub uri: &'a str,
    pub query: &'a str,
    pub payload_hash: &'a str,
}

impl Signer<'_> {
    /// `Authorization` header value for `request` stamped with `amz_date`
    /// (`YYYYMMDDTHHMMSSZ`). Sorts `headers` by name in place.
    pub fn authorization(
        &self,
        request: &CanonicalRequest<'_>,
        headers: &mut [(String, String)],
        amz_date: &str,
    ) -> String {
        headers.sort_by(|a, b| a.0.cmp(&b.0));
        let signed_headers = headers
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let mut canonical = format!("{}\n{}\n{}\n", request.method, request.uri, request.query);
        for (name, value) in headers.iter() {
            canonical.push_str(name);
            canonical.push(':');
            canonical.push_str(value.trim());
            canonical.push('\n');
        }
        canonical.push('\n');
        canonical.push_str(&signed_headers);
        canonical.push('\n');
        canonical.push_str(request.payload_hash);

        let date = amz_date.get(..8).unwrap_or(amz_date);
        let scope = format!("{}/{}/{}/aws4_request", date, self.region, self.service);
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            sha256_hex(canonical.as_bytes())
        );
        let signature = hex::encode(hmac_sha256(
            &self.signing_key(date),
            string_to_sign.as_bytes(),
        ));

        format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, self.access_key_id, scope, signed_headers, signature
        )
    }

    /// `HMAC(HMAC(HMAC(HMAC("AWS4" + secret, date), region), service), "aws4_request")`
    fn signing_key(&self, date: &str) -> Vec<u8> {
        let seed = format!("AWS4{}", self.secret_access_key);
        [self.region, self.service, "aws4_request"]
            .iter()
            .fold(hmac_sha256(seed.as_bytes(), date.as_bytes()), |key, part| {
                hmac_sha256(&key, part.as_bytes())
            })
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}
