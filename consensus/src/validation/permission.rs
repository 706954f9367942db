use super::{ValidationContext, ValidationOutcome, Validator};
use crate::TenureError;

/// Sender must be a participant of the base round.
pub struct PermissionValidator;

impl Validator for PermissionValidator {
    fn name(&self) -> &'static str {
        "permission"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationOutcome {
        if ctx.base_round.contains(ctx.sender) {
            return ValidationOutcome::Accept;
        }
        ValidationOutcome::Reject(TenureError::PermissionDenied(format!(
            "{} is not a participant of round {}",
            ctx.sender, ctx.base_round.round_number
        )))
    }
}
