use anyhow::{anyhow, Result};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::error::ConnectorError;
use crate::models::transaction::{TF_IMMEDIATE_OR_CANCEL, TF_PASSIVE, TF_SELL};
use crate::models::{
    checked_product, Market, OrderType, RawAmount, TradeType, TradingRule, Transaction, TransactionKind,
};
use crate::transport::{LedgerRequest, LedgerTransport};

/// What a client asks for, before it becomes ledger legs.
#[derive(Debug, Clone)]
pub struct OrderIntent<'a> {
    pub client_order_id: &'a str,
    pub market: &'a Market,
    pub trade_type: TradeType,
    pub order_type: OrderType,
    pub amount: Decimal,
    pub price: Decimal,
}

pub fn offer_flags(trade_type: TradeType, order_type: OrderType) -> u32 {
    let mut flags = 0;
    if trade_type == TradeType::Sell {
        flags |= TF_SELL;
    }
    match order_type {
        OrderType::Market => flags |= TF_IMMEDIATE_OR_CANCEL,
        OrderType::LimitMaker => flags |= TF_PASSIVE,
        OrderType::Limit => {}
    }
    flags
}

/// Build an unsigned OfferCreate.
///
/// A buy pays base and gives quote (`TakerPays` = base), a sell the reverse.
/// Market orders cross with `slippage` of headroom and never rest.
pub fn build_offer_create(
    account: &str,
    intent: &OrderIntent<'_>,
    rule: Option<&TradingRule>,
    slippage: Decimal,
) -> Result<Transaction, ConnectorError> {
    let out_of_range = |e: ConnectorError| {
        ConnectorError::SigningOrBuildFailure(format!("order {}: {}", intent.client_order_id, e))
    };
    let mut price = intent.price;
    if intent.order_type == OrderType::Market {
        let headroom = match intent.trade_type {
            TradeType::Buy => Decimal::ONE + slippage,
            TradeType::Sell => Decimal::ONE - slippage,
        };
        price = checked_product(price, headroom).map_err(out_of_range)?;
    }
    let mut amount = intent.amount;
    if let Some(rule) = rule {
        amount = rule.quantize_amount(amount);
        price = rule.quantize_price(price);
    }
    if amount <= Decimal::ZERO || price <= Decimal::ZERO {
        return Err(ConnectorError::SigningOrBuildFailure(format!(
            "order {} has non-positive amount {} or price {}",
            intent.client_order_id, amount, price
        )));
    }

    let notional = checked_product(amount, price).map_err(out_of_range)?;
    let base = RawAmount::from_value(&intent.market.base, amount).map_err(out_of_range)?;
    let quote = RawAmount::from_value(&intent.market.quote, notional).map_err(out_of_range)?;
    let (taker_gets, taker_pays) = match intent.trade_type {
        TradeType::Buy => (quote, base),
        TradeType::Sell => (base, quote),
    };

    Ok(Transaction::new(
        account,
        TransactionKind::OfferCreate {
            taker_gets,
            taker_pays,
            flags: offer_flags(intent.trade_type, intent.order_type),
        },
    )
    .with_memo(intent.client_order_id))
}

pub fn build_offer_cancel(account: &str, offer_sequence: u32, client_order_id: &str) -> Transaction {
    Transaction::new(account, TransactionKind::OfferCancel { offer_sequence }).with_memo(client_order_id)
}

fn result_field<'a>(result: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(result, |value, key| value.get(key))
}

/// Fill in `Sequence`, `Fee` and `LastLedgerSequence` from the network.
pub async fn autofill(transport: &dyn LedgerTransport, mut tx: Transaction, last_ledger_offset: u32) -> Result<Transaction> {
    let info = transport
        .request(&LedgerRequest::AccountInfo {
            account: tx.account.clone(),
        })
        .await?;
    if !info.is_success() {
        return Err(anyhow!(
            "account_info for {} failed: {}",
            tx.account,
            info.error_code().unwrap_or("unknown error")
        ));
    }
    let sequence = result_field(&info.result, &["account_data", "Sequence"])
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("account_info has no Sequence"))?;

    let fee = transport.request(&LedgerRequest::Fee).await?;
    let open_ledger_fee = result_field(&fee.result, &["drops", "open_ledger_fee"])
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("fee response has no open_ledger_fee"))?;

    let current = transport.request(&LedgerRequest::LedgerCurrent).await?;
    let current_index = result_field(&current.result, &["ledger_current_index"])
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("ledger_current response has no ledger_current_index"))?;

    tx.sequence = Some(u32::try_from(sequence)?);
    tx.fee = Some(open_ledger_fee.to_string());
    tx.last_ledger_sequence = Some(
        u32::try_from(current_index)?
            .checked_add(last_ledger_offset)
            .ok_or_else(|| anyhow!("LastLedgerSequence past ledger {} overflows", current_index))?,
    );
    Ok(tx)
}
