use super::GatewayError;

/// International dialling prefix every account reference is rewritten to.
pub const INTERNATIONAL_PREFIX: &str = "254";
const NATIONAL_TRUNK_PREFIX: char = '0';

/// Normalizes a phone-number account reference to `254XXXXXXXXX`.
///
/// Non-digit characters are dropped first, so `+254 712-345-678` and
/// `0712 345 678` both end up as `254712345678`.
pub fn normalize_account_ref(raw: &str) -> Result<String, GatewayError> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();

    if let Some(rest) = digits.strip_prefix(NATIONAL_TRUNK_PREFIX) {
        return Ok(format!("{INTERNATIONAL_PREFIX}{rest}"));
    }
    if digits.starts_with(INTERNATIONAL_PREFIX) {
        return Ok(digits);
    }

    Err(GatewayError::InvalidAccountReference(
        "phone number must start with 0 or 254".to_string(),
    ))
}
