/// Money helpers.
///
/// Amounts are stored as NUMERIC(12, 2) and carried as `BigDecimal` so that
/// milestone sums compare exactly. The payment gateway works in minor units
/// (cents), converted here at the boundary.
use std::str::FromStr;

use bigdecimal::BigDecimal;
use num_traits::{ToPrimitive, Zero};
use regex::Regex;

/// Convert a request amount to a two-decimal `BigDecimal`.
pub fn money_from_f64(amount: f64) -> Result<BigDecimal, String> {
    if !amount.is_finite() {
        return Err("Amount must be a finite number".to_string());
    }
    if amount < 0.0 {
        return Err("Amount cannot be negative".to_string());
    }
    BigDecimal::from_str(&format!("{:.2}", amount)).map_err(|_| "Invalid amount format".to_string())
}

/// Major units to gateway minor units (1.00 -> 100).
pub fn to_minor_units(amount: &BigDecimal) -> Result<i64, String> {
    (amount * BigDecimal::from(100))
        .round(0)
        .to_i64()
        .ok_or_else(|| format!("Amount {} is out of range", amount))
}

fn percent_of(amount: &BigDecimal, percent: f64) -> Result<BigDecimal, String> {
    if !(0.0..=100.0).contains(&percent) {
        return Err(format!("Percentage {} must be between 0 and 100", percent));
    }
    let percent = BigDecimal::from_str(&percent.to_string())
        .map_err(|_| "Invalid percentage".to_string())?;
    Ok((amount * percent / BigDecimal::from(100)).round(2))
}

/// Platform fee for an amount, rounded to cents.
pub fn platform_fee(amount: &BigDecimal, fee_percent: f64) -> Result<BigDecimal, String> {
    percent_of(amount, fee_percent)
}

/// What the freelancer receives once the fee is taken.
pub fn payout_amount(amount: &BigDecimal, fee: &BigDecimal) -> BigDecimal {
    let payout = amount - fee;
    if payout < BigDecimal::zero() {
        BigDecimal::zero()
    } else {
        payout
    }
}

/// Splits an amount between freelancer and client. The two shares always sum
/// back to `amount`.
pub fn split_amount(
    amount: &BigDecimal,
    freelancer_percentage: f64,
) -> Result<(BigDecimal, BigDecimal), String> {
    let freelancer_share = percent_of(amount, freelancer_percentage)?;
    let client_share = amount - &freelancer_share;
    Ok((freelancer_share, client_share))
}

pub fn sum_amounts<'a, I>(amounts: I) -> BigDecimal
where
    I: IntoIterator<Item = &'a BigDecimal>,
{
    amounts
        .into_iter()
        .fold(BigDecimal::zero(), |acc, amount| acc + amount)
}

pub fn is_valid_currency_code(code: &str) -> bool {
    Regex::new(r"^[A-Za-z]{3}$")
        .map(|re| re.is_match(code))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_money_from_f64() {
        assert_eq!(money_from_f64(100.0), Ok(dec("100.00")));
        assert_eq!(money_from_f64(0.1), Ok(dec("0.10")));
        assert_eq!(money_from_f64(19.999), Ok(dec("20.00")));
        assert_eq!(money_from_f64(-5.0), Err("Amount cannot be negative".to_string()));
        assert!(money_from_f64(f64::NAN).is_err());
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(to_minor_units(&dec("100.00")), Ok(10000));
        assert_eq!(to_minor_units(&dec("0.50")), Ok(50));
        assert_eq!(to_minor_units(&dec("123.45")), Ok(12345));
    }

    #[test]
    fn test_platform_fee_and_payout() {
        let amount = dec("250.00");
        let fee = platform_fee(&amount, 10.0).unwrap();
        assert_eq!(fee, dec("25.00"));
        assert_eq!(payout_amount(&amount, &fee), dec("225.00"));

        assert_eq!(platform_fee(&dec("99.99"), 0.0).unwrap(), dec("0"));
        assert!(platform_fee(&amount, 150.0).is_err());
    }

    #[test]
    fn test_split_amount_sums_back() {
        let amount = dec("333.33");
        let (freelancer, client) = split_amount(&amount, 40.0).unwrap();
        assert_eq!(freelancer, dec("133.33"));
        assert_eq!(client, dec("200.00"));
        assert_eq!(&freelancer + &client, amount);
    }

    #[test]
    fn test_sum_and_currency() {
        let amounts = vec![dec("100.00"), dec("250.50"), dec("49.50")];
        assert_eq!(sum_amounts(&amounts), dec("400.00"));
        assert!(is_valid_currency_code("usd"));
        assert!(is_valid_currency_code("EUR"));
        assert!(!is_valid_currency_code("dollars"));
    }
}
