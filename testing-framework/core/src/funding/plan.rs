use testing_framework_config::Amount;

use super::FundingError;

/// How much a scenario needs per participant and in total.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FundingPlan {
    /// Amount each funded participant receives.
    pub per_account: Amount,
    pub total: Amount,
    pub multiple: u32,
}

impl FundingPlan {
    /// Computes the funding for `multiple` replications of `amount`, each
    /// topped up by `margin` to cover fees.
    ///
    /// The check on `amount` runs before the margin is applied, so a fee
    /// margin never masks a zero amount.
    pub fn compute(amount: Amount, multiple: u32, margin: Amount) -> Result<Self, FundingError> {
        if amount.is_zero() {
            return Err(FundingError::ZeroAmount);
        }
        if multiple == 0 {
            return Err(FundingError::ZeroMultiple);
        }
        let overflow = || FundingError::Overflow { amount, multiple };

        let per_account = amount.checked_add(margin).ok_or_else(overflow)?;
        let total = per_account
            .checked_mul(u64::from(multiple))
            .ok_or_else(overflow)?;

        Ok(Self {
            per_account,
            total,
            multiple,
        })
    }
}
