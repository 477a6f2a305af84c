//! Webhook payload signature verification.
//!
//! Gateway callbacks arrive without the application's bearer credential,
//! so payload authenticity is established by recomputing the gateway
//! signature: a SHA-256 digest over
//! `api_key~merchant_id~reference_code~value~currency~state_pol`.
//!
//! The gateway formats the amount with a single decimal digit when the
//! second decimal digit is zero (`150000.00` signs as `150000.0`), two
//! otherwise. Normalization reproduces that rule without going through
//! floating point.

use sha2::{Digest, Sha256};

/// Inputs for recomputing a notification signature.
#[derive(Debug, Clone)]
pub struct SignatureParams<'a> {
    /// Merchant API key shared with the gateway.
    pub api_key: &'a str,
    pub merchant_id: &'a str,
    pub reference_code: &'a str,
    /// Amount exactly as received in the notification.
    pub value: &'a str,
    pub currency: &'a str,
    /// Raw transaction state code.
    pub state_code: &'a str,
}

impl SignatureParams<'_> {
    /// Recomputes the expected signature for these parameters.
    pub fn expected(&self) -> String {
        let plain = format!(
            "{}~{}~{}~{}~{}~{}",
            self.api_key,
            self.merchant_id,
            self.reference_code,
            normalize_value(self.value),
            self.currency,
            self.state_code,
        );
        hex::encode(Sha256::digest(plain.as_bytes()))
    }

    /// Compares the expected signature against the one the gateway sent.
    ///
    /// Case-insensitive: gateways disagree on hex digit casing.
    pub fn verify(&self, provided: &str) -> bool {
        self.expected().eq_ignore_ascii_case(provided.trim())
    }
}

/// Applies the gateway's decimal-formatting rule to an amount string.
fn normalize_value(raw: &str) -> String {
    let raw = raw.trim();
    match raw.split_once('.') {
        None => format!("{raw}.0"),
        Some((units, decimals)) => {
            let mut digits = decimals.chars();
            let first = digits.next().unwrap_or('0');
            match digits.next() {
                // Second decimal digit is zero (or absent): one digit.
                None | Some('0') => format!("{units}.{first}"),
                Some(second) => format!("{units}.{first}{second}"),
            }
        }
    }
}
