use crate::idempotency::model::IdempotencyResponse;

/// Decides whether a captured response may be stored for replay.
pub trait ResponseValidator: Send + Sync {
    fn validate(&self, response: &IdempotencyResponse) -> bool;
}

/// Accepts 2xx responses only.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuccessStatusValidator;

impl SuccessStatusValidator {
    pub fn new() -> Self {
        Self
    }
}

impl ResponseValidator for SuccessStatusValidator {
    fn validate(&self, response: &IdempotencyResponse) -> bool {
        (200..300).contains(&response.status())
    }
}
