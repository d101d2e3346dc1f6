use std::fmt;

use serde::{Deserialize, Serialize};

/// Monetary amount in integer minor units. Currency codes compare
/// case-sensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Amount {
    pub currency: String,
    pub units: i64,
}

impl Amount {
    pub fn new(currency: impl Into<String>, units: i64) -> Self {
        Self {
            currency: currency.into(),
            units,
        }
    }

    pub fn gbp(units: i64) -> Self {
        Self::new("GBP", units)
    }

    pub fn usd(units: i64) -> Self {
        Self::new("USD", units)
    }

    pub fn is_zero(&self) -> bool {
        self.units == 0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.currency, self.units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_case_sensitive() {
        assert_ne!(Amount::new("GBP", 1000), Amount::new("gbp", 1000));
        assert_eq!(Amount::gbp(1000), Amount::new("GBP", 1000));
    }
}
