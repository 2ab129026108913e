use crate::errors::ClientError;

/// Display-only share of an investment amount assigned to one ticker.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct Allocation {
    pub item_id: String,
    pub amount: f64,
    /// Fraction of the total, in `0.0..=1.0`.
    pub weight: f64,
}

/// Splits `amount` equally across `items`.
pub fn equal_weight<S: AsRef<str>>(amount: f64, items: &[S]) -> Result<Vec<Allocation>, ClientError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(ClientError::Validation(format!(
            "investment amount must be a positive number, got {amount}"
        )));
    }
    if items.is_empty() {
        return Ok(Vec::new());
    }
    let weight = 1.0 / items.len() as f64;
    Ok(items
        .iter()
        .map(|item| Allocation {
            item_id: item.as_ref().to_string(),
            amount: amount * weight,
            weight,
        })
        .collect())
}
