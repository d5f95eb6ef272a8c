use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

type HmacSha1 = Hmac<Sha1>;

const MFA_TOTP_PERIOD: u64 = 30;
const MFA_TOTP_VARIANCE: [i64; 3] = [-1, 0, 1];
const MFA_TOTP_DIGITS: u32 = 6;

/// Strips separators from a submitted code; anything but exactly six digits is rejected.
pub fn normalize_mfa_code(input: &str) -> Option<String> {
    let mut digits = String::with_capacity(MFA_TOTP_DIGITS as usize);
    for ch in input.chars() {
        match ch {
            '0'..='9' => digits.push(ch),
            ' ' | '-' | '\t' => {}
            _ => return None,
        }
    }

    if digits.len() == MFA_TOTP_DIGITS as usize {
        Some(digits)
    } else {
        None
    }
}

fn decode_secret(secret: &str) -> Option<Vec<u8>> {
    let cleaned: String = secret
        .chars()
        .filter(|ch| !ch.is_whitespace() && *ch != '=')
        .collect::<String>()
        .to_ascii_uppercase();
    BASE32_NOPAD.decode(cleaned.as_bytes()).ok().filter(|bytes| !bytes.is_empty())
}

/// RFC 6238 check at `unix_secs`, accepting one step of clock skew either way.
pub fn verify_totp_code(secret: &str, code: &str, unix_secs: u64) -> bool {
    let Some(code) = normalize_mfa_code(code) else {
        return false;
    };
    let Some(secret_bytes) = decode_secret(secret) else {
        return false;
    };

    let current_counter = unix_secs / MFA_TOTP_PERIOD;
    let mut matched = 0u8;
    for offset in MFA_TOTP_VARIANCE {
        let Some(counter) = current_counter.checked_add_signed(offset) else {
            continue;
        };
        let expected = format_code(hotp(&secret_bytes, counter));
        matched |= expected.as_bytes().ct_eq(code.as_bytes()).unwrap_u8();
    }
    matched == 1
}

/// Code an authenticator app shows for `secret` at `unix_secs`.
pub fn totp_code_at(secret: &str, unix_secs: u64) -> Option<String> {
    let secret_bytes = decode_secret(secret)?;
    Some(format_code(hotp(&secret_bytes, unix_secs / MFA_TOTP_PERIOD)))
}

fn format_code(value: u32) -> String {
    format!("{:0width$}", value, width = MFA_TOTP_DIGITS as usize)
}

fn hotp(secret: &[u8], counter: u64) -> u32 {
    let Ok(mut mac) = HmacSha1::new_from_slice(secret) else {
        return u32::MAX;
    };
    mac.update(&counter.to_be_bytes());
    let result = mac.finalize().into_bytes();

    let offset = (result[result.len() - 1] & 0x0f) as usize;
    let code = ((result[offset] as u32 & 0x7f) << 24)
        | ((result[offset + 1] as u32) << 16)
        | ((result[offset + 2] as u32) << 8)
        | (result[offset + 3] as u32);

    code % 10u32.pow(MFA_TOTP_DIGITS)
}
