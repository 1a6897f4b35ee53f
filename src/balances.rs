//! Account balances from `account_info` and `account_objects`.

use rust_decimal::Decimal;
use serde_json::Value;

use crate::config::ReserveSchedule;
use crate::error::ConnectorError;
use crate::models::{normalize, parse_issued_value, Balances, NodeFields, RawAmount, NATIVE_SYMBOL};
use crate::utils::currency_symbol;

fn trust_line_balance(account: &str, line: &Value) -> Result<Option<(String, Decimal)>, ConnectorError> {
    if line.get("LedgerEntryType").and_then(Value::as_str) != Some("RippleState") {
        return Ok(None);
    }
    let fields: NodeFields = serde_json::from_value(line.clone())
        .map_err(|e| ConnectorError::UnexpectedResponse(format!("trust line: {}", e)))?;
    let balance = match fields.balance {
        Some(RawAmount::Issued(balance)) => balance,
        _ => return Err(ConnectorError::UnexpectedResponse("trust line without issued balance".to_string())),
    };
    let value = parse_issued_value(&balance.value)?;
    // The balance is stored from the low account's point of view.
    let we_are_low = fields.low_limit.as_ref().map(|l| l.issuer.as_str()) == Some(account);
    let value = if we_are_low { value } else { -value };
    Ok(Some((currency_symbol(&balance.currency), value)))
}

/// Total and spendable balances. The native balance is reduced by the
/// account reserve; issued balances are spendable in full.
pub fn derive_balances(
    account: &str,
    account_info: &Value,
    account_objects: &Value,
    reserve: &ReserveSchedule,
) -> Result<Balances, ConnectorError> {
    let data = account_info
        .get("account_data")
        .ok_or_else(|| ConnectorError::UnexpectedResponse("account_info has no account_data".to_string()))?;
    let drops = data
        .get("Balance")
        .and_then(Value::as_str)
        .ok_or_else(|| ConnectorError::UnexpectedResponse("account_data has no Balance".to_string()))?;
    let native = normalize(&RawAmount::Drops(drops.to_string()))?.value;
    // An owner count past u32 saturates, which only raises the reserve.
    let owner_count = data
        .get("OwnerCount")
        .and_then(Value::as_u64)
        .map_or(0, |count| u32::try_from(count).unwrap_or(u32::MAX));

    let mut balances = Balances::default();
    balances.total.insert(NATIVE_SYMBOL.to_string(), native);
    balances.available.insert(
        NATIVE_SYMBOL.to_string(),
        (native - reserve.required(owner_count)).max(Decimal::ZERO),
    );

    let lines = account_objects
        .get("account_objects")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for line in lines {
        match trust_line_balance(account, line) {
            Ok(Some((symbol, value))) => {
                *balances.total.entry(symbol.clone()).or_default() += value;
                *balances.available.entry(symbol).or_default() += value;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(account, error = %e, "skipping trust line"),
        }
    }
    Ok(balances)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    const ACCOUNT: &str = "r2XdzWFVoHGfGVmXugtKhxMu3bqhsYiWK";

    fn line(code: &str, value: &str, low: &str, high: &str) -> Value {
        json!({
            "LedgerEntryType": "RippleState",
            "Balance": {"currency": code, "issuer": "rrrrrrrrrrrrrrrrrrrrBZbvji", "value": value},
            "HighLimit": {"currency": code, "issuer": high, "value": "0"},
            "LowLimit": {"currency": code, "issuer": low, "value": "1000000000"},
            "Flags": 1114112
        })
    }

    #[test]
    fn test_high_side_balance_is_negated() {
        let objects = json!({"account_objects": [
            line("USD", "-2.5", "rIssuer", ACCOUNT),
        ]});
        let info = json!({"account_data": {"Balance": "20000000", "OwnerCount": 0}});
        let balances = derive_balances(ACCOUNT, &info, &objects, &ReserveSchedule::default()).unwrap();
        assert_eq!(balances.total("USD"), dec!(2.5));
        assert_eq!(balances.available("XRP"), dec!(10));
    }

    #[test]
    fn test_reserve_never_goes_negative() {
        let info = json!({"account_data": {"Balance": "5000000", "OwnerCount": 4}});
        let balances =
            derive_balances(ACCOUNT, &info, &json!({"account_objects": []}), &ReserveSchedule::default()).unwrap();
        assert_eq!(balances.total("XRP"), dec!(5));
        assert_eq!(balances.available("XRP"), Decimal::ZERO);
    }

    #[test]
    fn test_non_trust_line_objects_are_ignored() {
        let info = json!({"account_data": {"Balance": "57030864", "OwnerCount": 3}});
        let objects = json!({"account_objects": [
            {"LedgerEntryType": "Offer", "Account": ACCOUNT, "Sequence": 1, "TakerGets": "1", "TakerPays": "1"}
        ]});
        let balances = derive_balances(ACCOUNT, &info, &objects, &ReserveSchedule::default()).unwrap();
        assert_eq!(balances.total.len(), 1);
        assert_eq!(balances.available("XRP"), dec!(41.030864));
    }

    #[test]
    fn test_owner_count_past_u32_keeps_full_reserve() {
        let info = json!({"account_data": {"Balance": "5000000000", "OwnerCount": 4294967301u64}});
        let balances =
            derive_balances(ACCOUNT, &info, &json!({"account_objects": []}), &ReserveSchedule::default()).unwrap();
        assert_eq!(balances.available("XRP"), Decimal::ZERO);
    }
}
