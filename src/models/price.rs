//! Contract price line items.

use rust_decimal::Decimal;
use rust_decimal::RoundingStrategy;
use serde::{Deserialize, Serialize};

/// Decimal places kept on stored prices
pub const PRICE_SCALE: u32 = 4;

/// Round a price using banker's rounding (ROUND_HALF_EVEN).
///
/// # Examples
/// ```
/// use rust_decimal_macros::dec;
/// use opco_contracts::models::round_price;
///
/// assert_eq!(round_price(dec!(1.23455)), dec!(1.2346));
/// assert_eq!(round_price(dec!(1.23445)), dec!(1.2344));
/// ```
pub fn round_price(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(PRICE_SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Price terms for one product on one contract version.
///
/// The same shape is carried on proposal lines so a line can be copied
/// onto a contract version unchanged. Amounts are written as JSON strings
/// and read from either strings or numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTerms {
    #[serde(default)]
    pub price_type: Option<String>,
    #[serde(default, serialize_with = "rust_decimal::serde::str_option::serialize")]
    pub allowance: Option<Decimal>,
    #[serde(default, serialize_with = "rust_decimal::serde::str_option::serialize")]
    pub commercial_fob: Option<Decimal>,
    #[serde(default, serialize_with = "rust_decimal::serde::str_option::serialize")]
    pub commercial_del: Option<Decimal>,
    #[serde(default, serialize_with = "rust_decimal::serde::str_option::serialize")]
    pub commodity_fob: Option<Decimal>,
    #[serde(default, serialize_with = "rust_decimal::serde::str_option::serialize")]
    pub commodity_del: Option<Decimal>,
    #[serde(default, serialize_with = "rust_decimal::serde::str_option::serialize")]
    pub pua: Option<Decimal>,
    #[serde(default, serialize_with = "rust_decimal::serde::str_option::serialize")]
    pub ffs: Option<Decimal>,
    #[serde(default, serialize_with = "rust_decimal::serde::str_option::serialize")]
    pub noi: Option<Decimal>,
    #[serde(default, serialize_with = "rust_decimal::serde::str_option::serialize")]
    pub ptv: Option<Decimal>,
    #[serde(default)]
    pub uom: Option<String>,
    #[serde(default)]
    pub estimated_quantity: Option<i32>,
    #[serde(default)]
    pub billback_allowed: bool,
}

impl PriceTerms {
    fn amounts(&self) -> [(&'static str, Option<Decimal>); 9] {
        [
            ("allowance", self.allowance),
            ("commercial_fob", self.commercial_fob),
            ("commercial_del", self.commercial_del),
            ("commodity_fob", self.commodity_fob),
            ("commodity_del", self.commodity_del),
            ("pua", self.pua),
            ("ffs", self.ffs),
            ("noi", self.noi),
            ("ptv", self.ptv),
        ]
    }

    /// Copy with every amount rounded to the stored scale
    pub fn normalized(&self) -> Self {
        let round = |v: Option<Decimal>| v.map(round_price);
        Self {
            price_type: self.price_type.clone(),
            allowance: round(self.allowance),
            commercial_fob: round(self.commercial_fob),
            commercial_del: round(self.commercial_del),
            commodity_fob: round(self.commodity_fob),
            commodity_del: round(self.commodity_del),
            pua: round(self.pua),
            ffs: round(self.ffs),
            noi: round(self.noi),
            ptv: round(self.ptv),
            uom: self.uom.clone(),
            estimated_quantity: self.estimated_quantity,
            billback_allowed: self.billback_allowed,
        }
    }

    /// Validation messages for this price, prefixed with `context`
    pub fn validate(&self, context: &str) -> Vec<String> {
        let mut errors: Vec<String> = self
            .amounts()
            .iter()
            .filter_map(|(field, value)| match value {
                Some(v) if v.is_sign_negative() && !v.is_zero() => {
                    Some(format!("{}: {} must not be negative", context, field))
                }
                _ => None,
            })
            .collect();

        if matches!(self.estimated_quantity, Some(q) if q < 0) {
            errors.push(format!("{}: estimated quantity must not be negative", context));
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_price_bankers_rounding() {
        assert_eq!(round_price(dec!(0.00005)), dec!(0.0000));
        assert_eq!(round_price(dec!(0.00015)), dec!(0.0002));
        assert_eq!(round_price(dec!(12.5)), dec!(12.5));
    }

    #[test]
    fn test_normalized_rounds_every_amount() {
        let price = PriceTerms {
            allowance: Some(dec!(1.23456)),
            ptv: Some(dec!(0.99995)),
            ..Default::default()
        };
        let normalized = price.normalized();
        assert_eq!(normalized.allowance, Some(dec!(1.2346)));
        assert_eq!(normalized.ptv, Some(dec!(1.0000)));
        assert_eq!(normalized.commercial_fob, None);
    }

    #[test]
    fn test_validate_rejects_negative_amounts() {
        let price = PriceTerms {
            allowance: Some(dec!(-1)),
            estimated_quantity: Some(-4),
            ..Default::default()
        };
        let errors = price.validate("product 9");
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("allowance"));

        assert!(PriceTerms::default().validate("product 9").is_empty());
    }

    #[test]
    fn test_price_terms_serde_uses_strings() {
        let price = PriceTerms {
            commodity_del: Some(dec!(3.25)),
            billback_allowed: true,
            ..Default::default()
        };
        let json = serde_json::to_value(&price).unwrap();
        assert_eq!(json["commodityDel"], "3.25");
        assert_eq!(json["billbackAllowed"], true);

        let back: PriceTerms = serde_json::from_value(json).unwrap();
        assert_eq!(back, price);
    }

    #[test]
    fn test_price_terms_accept_numeric_amounts() {
        let price: PriceTerms =
            serde_json::from_str(r#"{"allowance": 1.25, "pua": 2, "ffs": "0.3333"}"#).unwrap();
        assert_eq!(price.allowance, Some(dec!(1.25)));
        assert_eq!(price.pua, Some(dec!(2)));
        assert_eq!(price.ffs, Some(dec!(0.3333)));
        assert_eq!(price.noi, None);
    }
}
