//! Request signing for the scrobble API.
//!
//! The signature is the MD5 hex digest of all request parameters sorted
//! alphabetically by key, concatenated as `key` + `value` pairs with no
//! separators, with the shared secret appended.

use std::collections::BTreeMap;

/// Compute the `api_sig` value for a set of request parameters.
///
/// The caller passes every parameter that will be sent except `api_sig`
/// itself (and the `format` selector, which lives in the URL, not the
/// signed form body).
pub fn sign(params: &BTreeMap<String, String>, secret: &str) -> String {
    let mut base = String::new();
    for (key, value) in params {
        base.push_str(key);
        base.push_str(value);
    }
    base.push_str(secret);
    format!("{:x}", md5::compute(base.as_bytes()))
}
