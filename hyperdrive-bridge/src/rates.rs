//! Exchange rates between bridged tokens.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use hyperdrive_common::{Amount, HdResult, HyperDriveError};

/// `to_units = from_units * numerator / denominator`, rounded down.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub numerator: u128,
    pub denominator: u128,
}

impl ExchangeRate {
    pub fn new(numerator: u128, denominator: u128) -> HdResult<Self> {
        if numerator == 0 || denominator == 0 {
            return Err(HyperDriveError::validation(
                "exchange rate terms must be positive",
            ));
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    pub fn parity() -> Self {
        Self {
            numerator: 1,
            denominator: 1,
        }
    }

    pub fn convert(&self, amount: Amount) -> HdResult<Amount> {
        let scaled = amount
            .units()
            .checked_mul(self.numerator)
            .ok_or_else(|| HyperDriveError::validation("amount too large to convert"))?;
        let converted = Amount::new(scaled / self.denominator);
        if converted.is_zero() {
            return Err(HyperDriveError::validation(format!(
                "amount {amount} converts to zero at {}/{}",
                self.numerator, self.denominator
            )));
        }
        Ok(converted)
    }
}

/// Source of token exchange rates.
#[async_trait]
pub trait ExchangeRateSource: Send + Sync {
    async fn rate(&self, from_token: &str, to_token: &str) -> HdResult<ExchangeRate>;
}

/// Static rate table.
#[derive(Clone, Debug, Default)]
pub struct FixedRates {
    rates: HashMap<(String, String), ExchangeRate>,
    parity_fallback: bool,
}

impl FixedRates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every pair without an explicit rate converts 1:1.
    pub fn parity() -> Self {
        Self {
            rates: HashMap::new(),
            parity_fallback: true,
        }
    }

    pub fn with_rate(mut self, from_token: &str, to_token: &str, rate: ExchangeRate) -> Self {
        self.rates.insert(
            (from_token.to_ascii_uppercase(), to_token.to_ascii_uppercase()),
            rate,
        );
        self
    }
}

#[async_trait]
impl ExchangeRateSource for FixedRates {
    async fn rate(&self, from_token: &str, to_token: &str) -> HdResult<ExchangeRate> {
        let key = (from_token.to_ascii_uppercase(), to_token.to_ascii_uppercase());
        if key.0 == key.1 {
            return Ok(ExchangeRate::parity());
        }
        match self.rates.get(&key) {
            Some(rate) => Ok(*rate),
            None if self.parity_fallback => Ok(ExchangeRate::parity()),
            None => Err(HyperDriveError::validation(format!(
                "no exchange rate for {from_token} -> {to_token}"
            ))),
        }
    }
}
