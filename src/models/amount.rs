use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;
use crate::utils::{currency_code, currency_symbol};

/// Minor units ("drops") per unit of the native currency.
pub const DROPS_PER_XRP: i64 = 1_000_000;

/// Significant digits the ledger keeps for issued-currency values.
pub const ISSUED_PRECISION: u32 = 15;

pub const NATIVE_SYMBOL: &str = "XRP";

/// A currency as the ledger identifies it: the native asset, or a code plus
/// the account that issued it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Currency {
    Native,
    Issued { code: String, issuer: String },
}

impl Currency {
    pub fn issued(symbol_or_code: &str, issuer: &str) -> Result<Self, ConnectorError> {
        let code = currency_code(symbol_or_code)
            .map_err(|e| ConnectorError::malformed(symbol_or_code, e.to_string()))?;
        Ok(Currency::Issued {
            code,
            issuer: issuer.to_string(),
        })
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Currency::Native)
    }

    pub fn issuer(&self) -> Option<&str> {
        match self {
            Currency::Native => None,
            Currency::Issued { issuer, .. } => Some(issuer),
        }
    }

    /// Human-readable symbol (`XRP`, `USD`, `SOLO`).
    pub fn symbol(&self) -> String {
        match self {
            Currency::Native => NATIVE_SYMBOL.to_string(),
            Currency::Issued { code, .. } => currency_symbol(code),
        }
    }

    /// Code + issuer comparison that tolerates hex-case differences.
    pub fn same_as(&self, other: &Currency) -> bool {
        match (self, other) {
            (Currency::Native, Currency::Native) => true,
            (
                Currency::Issued { code: a, issuer: ia },
                Currency::Issued { code: b, issuer: ib },
            ) => ia == ib && a.eq_ignore_ascii_case(b),
            _ => false,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::Native => write!(f, "{}", NATIVE_SYMBOL),
            Currency::Issued { issuer, .. } => write!(f, "{}.{}", self.symbol(), issuer),
        }
    }
}

/// The structured leg of a ledger amount: `{currency, issuer, value}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssuedAmount {
    pub currency: String,
    pub issuer: String,
    pub value: String,
}

/// A ledger amount exactly as it appears on the wire.
///
/// Native amounts are bare integer strings of drops; issued amounts are
/// objects. Decoding into this enum happens once, at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RawAmount {
    Drops(String),
    Issued(IssuedAmount),
}

impl RawAmount {
    pub fn currency(&self) -> Currency {
        match self {
            RawAmount::Drops(_) => Currency::Native,
            RawAmount::Issued(a) => Currency::Issued {
                code: a.currency.clone(),
                issuer: a.issuer.clone(),
            },
        }
    }

    pub fn normalize(&self) -> Result<CurrencyAmount, ConnectorError> {
        normalize(self)
    }

    /// Build the wire form of `value` major units of `currency`.
    ///
    /// Native values are rounded to whole drops; issued values are rounded to
    /// the ledger's 15 significant digits.
    pub fn from_value(currency: &Currency, value: Decimal) -> Result<Self, ConnectorError> {
        Ok(match currency {
            Currency::Native => {
                let drops = checked_product(value, Decimal::from(DROPS_PER_XRP))?.round_dp(0);
                RawAmount::Drops(drops.normalize().to_string())
            }
            Currency::Issued { code, issuer } => RawAmount::Issued(IssuedAmount {
                currency: code.clone(),
                issuer: issuer.clone(),
                value: round_significant(value, ISSUED_PRECISION).normalize().to_string(),
            }),
        })
    }
}

/// A normalized amount: decimal value in major units plus currency identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrencyAmount {
    pub currency: Currency,
    pub value: Decimal,
}

/// Convert either wire representation into major units.
pub fn normalize(raw: &RawAmount) -> Result<CurrencyAmount, ConnectorError> {
    match raw {
        RawAmount::Drops(drops) => {
            let trimmed = drops.trim();
            if trimmed.is_empty() || !trimmed.trim_start_matches('-').chars().all(|c| c.is_ascii_digit()) {
                return Err(ConnectorError::malformed(drops, "drops must be an integer string"));
            }
            let minor = Decimal::from_str(trimmed)
                .map_err(|e| ConnectorError::malformed(drops, e.to_string()))?;
            Ok(CurrencyAmount {
                currency: Currency::Native,
                value: minor / Decimal::from(DROPS_PER_XRP),
            })
        }
        RawAmount::Issued(amount) => Ok(CurrencyAmount {
            currency: raw.currency(),
            value: parse_issued_value(&amount.value)?,
        }),
    }
}

/// `numerator / denominator`, or `MalformedAmount` when the quotient does not
/// fit a `Decimal` (a dust leg against a large one can exceed 96 bits).
pub fn checked_ratio(numerator: Decimal, denominator: Decimal) -> Result<Decimal, ConnectorError> {
    numerator
        .checked_div(denominator)
        .ok_or_else(|| ConnectorError::malformed(format!("{}/{}", numerator, denominator), "ratio out of range"))
}

/// `a * b`, or `MalformedAmount` on overflow.
pub fn checked_product(a: Decimal, b: Decimal) -> Result<Decimal, ConnectorError> {
    a.checked_mul(b)
        .ok_or_else(|| ConnectorError::malformed(format!("{}*{}", a, b), "product out of range"))
}

/// Parse an issued-currency value, accepting the ledger's exponent notation.
pub fn parse_issued_value(value: &str) -> Result<Decimal, ConnectorError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConnectorError::malformed(value, "empty value"));
    }
    let parsed = if trimmed.contains(['e', 'E']) {
        Decimal::from_scientific(trimmed)
    } else {
        Decimal::from_str(trimmed)
    };
    parsed.map_err(|e| ConnectorError::malformed(value, e.to_string()))
}

/// Round to `digits` significant decimal digits (half away from zero).
pub fn round_significant(value: Decimal, digits: u32) -> Decimal {
    if value.is_zero() {
        return value;
    }
    let abs = value.abs();
    let mut magnitude: i64 = 0;
    let mut probe = abs;
    let ten = Decimal::TEN;
    while probe >= ten {
        probe /= ten;
        magnitude += 1;
    }
    while probe < Decimal::ONE {
        probe *= ten;
        magnitude -= 1;
    }
    let dp = digits as i64 - 1 - magnitude;
    if dp >= 0 {
        value.round_dp_with_strategy(
            dp.min(28) as u32,
            rust_decimal::RoundingStrategy::MidpointAwayFromZero,
        )
    } else {
        let factor = Decimal::from(10i64.pow((-dp) as u32));
        (value / factor).round() * factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_native_drops_normalize_to_major_units() {
        let amount = normalize(&RawAmount::Drops("20621931".to_string())).unwrap();
        assert_eq!(amount.currency, Currency::Native);
        assert_eq!(amount.value, dec!(20.621931));
    }

    #[test]
    fn test_issued_value_passes_through() {
        let raw: RawAmount = serde_json::from_value(serde_json::json!({
            "currency": "534F4C4F00000000000000000000000000000000",
            "issuer": "rsoLo2S1kiGeCcn6hCUXVrCpGMWLrRrLZz",
            "value": "91.846106"
        }))
        .unwrap();
        let amount = raw.normalize().unwrap();
        assert_eq!(amount.value, dec!(91.846106));
        assert_eq!(amount.currency.symbol(), "SOLO");
        assert_eq!(amount.currency.issuer(), Some("rsoLo2S1kiGeCcn6hCUXVrCpGMWLrRrLZz"));
    }

    #[test]
    fn test_exponent_notation_is_accepted() {
        assert_eq!(parse_issued_value("1e-6").unwrap(), dec!(0.000001));
        assert_eq!(parse_issued_value("-1.5E2").unwrap(), dec!(-150));
    }

    #[test]
    fn test_malformed_amounts_are_rejected() {
        assert!(matches!(
            normalize(&RawAmount::Drops("12.5".to_string())),
            Err(ConnectorError::MalformedAmount { .. })
        ));
        assert!(parse_issued_value("abc").is_err());
        assert!(parse_issued_value("").is_err());
        // beyond what a 96-bit decimal can carry
        assert!(parse_issued_value("9999999999999999e80").is_err());
    }

    #[test]
    fn test_wire_amounts_from_values() {
        let xrp = RawAmount::from_value(&Currency::Native, dec!(12.3456789)).unwrap();
        assert_eq!(xrp, RawAmount::Drops("12345679".to_string()));

        let solo = Currency::issued("SOLO", "rsoLo2S1kiGeCcn6hCUXVrCpGMWLrRrLZz").unwrap();
        match RawAmount::from_value(&solo, dec!(12345.12345678901234567)).unwrap() {
            RawAmount::Issued(a) => {
                assert_eq!(a.value, "12345.123456789");
                assert_eq!(a.currency, "534F4C4F00000000000000000000000000000000");
            }
            other => panic!("expected issued amount, got {:?}", other),
        }
    }

    #[test]
    fn test_out_of_range_arithmetic_is_an_error() {
        // 1e-25 SOLO priced at 10,000 XRP
        assert!(matches!(
            checked_ratio(dec!(10000), dec!(0.0000000000000000000000001)),
            Err(ConnectorError::MalformedAmount { .. })
        ));
        assert_eq!(checked_ratio(dec!(22), dec!(100)).unwrap(), dec!(0.22));
        assert!(checked_product(Decimal::MAX, dec!(2)).is_err());
        assert!(RawAmount::from_value(&Currency::Native, Decimal::MAX).is_err());
    }

    #[test]
    fn test_round_significant() {
        assert_eq!(
            round_significant(dec!(0.0001479368155151234), 15),
            dec!(0.000147936815515123)
        );
        assert_eq!(round_significant(dec!(123456789), 3), dec!(123000000));
        assert_eq!(round_significant(dec!(1.25), 2), dec!(1.3));
    }

    #[test]
    fn test_currency_identity_ignores_hex_case() {
        let a = Currency::Issued {
            code: "534f4c4f00000000000000000000000000000000".to_string(),
            issuer: "rsoLo2S1kiGeCcn6hCUXVrCpGMWLrRrLZz".to_string(),
        };
        let b = Currency::issued("SOLO", "rsoLo2S1kiGeCcn6hCUXVrCpGMWLrRrLZz").unwrap();
        assert!(a.same_as(&b));
        assert!(!a.same_as(&Currency::Native));
    }
}
