use serde::{Deserialize, Serialize};

/// Request to place a new order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub customer_id: String,
    pub product_id: String,
    /// Amount in minor currency units.
    pub amount: u64,
    pub currency: String,
}

impl CreateOrderRequest {
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.customer_id.trim().is_empty() {
            errors.push(ValidationError { field: "customer_id".to_string(), message: "customer_id cannot be empty".to_string() });
        }
        if self.product_id.trim().is_empty() {
            errors.push(ValidationError { field: "product_id".to_string(), message: "product_id cannot be empty".to_string() });
        }
        if self.amount == 0 {
            errors.push(ValidationError { field: "amount".to_string(), message: "amount must be positive".to_string() });
        }
        if self.currency.len() != 3 {
            errors.push(ValidationError { field: "currency".to_string(), message: "currency must be a 3-letter ISO 4217 code".to_string() });
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}
