use anyhow::{anyhow, Result};
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds between the Unix epoch and the ledger's "Ripple epoch" (2000-01-01T00:00:00Z).
pub const RIPPLE_EPOCH_OFFSET: u64 = 946_684_800;

pub fn remove_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url[..url.len() - 1].to_string()
    } else {
        url.to_string()
    }
}

/// Encode a currency symbol the way the ledger expects it.
///
/// Three-character symbols are "standard" codes and travel as-is. Anything
/// longer is carried as a 160-bit code: the ASCII bytes, zero-padded on the
/// right, rendered as 40 uppercase hex characters.
pub fn currency_code(symbol: &str) -> Result<String> {
    if is_hex_code(symbol) {
        return Ok(symbol.to_ascii_uppercase());
    }
    if symbol.len() == 3 {
        return Ok(symbol.to_string());
    }
    if symbol.len() > 20 {
        return Err(anyhow!("currency symbol '{}' longer than 20 bytes", symbol));
    }
    let mut bytes = symbol.as_bytes().to_vec();
    bytes.resize(20, 0);
    Ok(hex::encode_upper(bytes))
}

/// Decode a currency code back into the symbol a human would recognise.
///
/// `534F4C4F00000000000000000000000000000000` becomes `SOLO`; standard
/// three-character codes are returned unchanged. Codes that do not decode to
/// printable ASCII are returned in their hex form.
pub fn currency_symbol(code: &str) -> String {
    if !is_hex_code(code) {
        return code.to_string();
    }
    match hex::decode(code) {
        Ok(bytes) => {
            let trimmed: Vec<u8> = bytes.into_iter().filter(|b| *b != 0).collect();
            if !trimmed.is_empty() && trimmed.iter().all(|b| b.is_ascii_graphic()) {
                String::from_utf8_lossy(&trimmed).to_string()
            } else {
                code.to_string()
            }
        }
        Err(_) => code.to_string(),
    }
}

pub fn is_hex_code(code: &str) -> bool {
    code.len() == 40 && code.chars().all(|c| c.is_ascii_hexdigit())
}

/// Convert a ledger close time (seconds since the Ripple epoch) to Unix seconds.
pub fn ripple_time_to_unix(ripple_seconds: u64) -> u64 {
    ripple_seconds + RIPPLE_EPOCH_OFFSET
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

pub async fn retry<T, E, F, Fut>(mut retries: u32, base_delay_ms: u64, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Debug,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if retries == 0 => return Err(e),
            Err(e) => {
                // Exponential backoff: base_delay * 2^attempt, capped at 30s
                let delay = (base_delay_ms * (1u64 << attempt.min(5))).min(30_000);
                tracing::warn!(attempt = attempt + 1, error = ?e, delay_ms = delay, "request failed, retrying");
                tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
                retries -= 1;
                attempt += 1;
            }
        }
    }
}
