use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::requests::CreateOrderRequest;

/// A placed order.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: Uuid,
    pub sequence: u64,
    pub customer_id: String,
    pub product_id: String,
    pub amount: u64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

/// In-process order sink for the demo server.
///
/// Every call to [`OrderBook::place`] creates a new order, so the count shows
/// how many times the protected handler actually executed.
#[derive(Debug, Default)]
pub struct OrderBook {
    placed: AtomicU64,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn place(&self, request: CreateOrderRequest) -> Order {
        let sequence = self.placed.fetch_add(1, Ordering::SeqCst) + 1;

        Order {
            id: Uuid::new_v4(),
            sequence,
            customer_id: request.customer_id,
            product_id: request.product_id,
            amount: request.amount,
            currency: request.currency.to_uppercase(),
            created_at: Utc::now(),
        }
    }

    pub fn order_count(&self) -> u64 {
        self.placed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_place_assigns_increasing_sequence() {
        let book = OrderBook::new();
        let request = CreateOrderRequest {
            customer_id: "cust-1".to_string(),
            product_id: "sku-42".to_string(),
            amount: 500,
            currency: "eur".to_string(),
        };

        let first = book.place(request.clone());
        let second = book.place(request);

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_ne!(first.id, second.id);
        assert_eq!(first.currency, "EUR");
        assert_eq!(book.order_count(), 2);
    }
}
