use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::money::Money;
use crate::models::request::{MembershipTier, ServiceType};

const BASIS_POINTS: i64 = 10_000;

/// Longest trip that can be quoted.
pub const MAX_MILES: f64 = 100_000.0;

/// Ceiling on any pre-discount amount in cents. Keeps every later step,
/// basis-point scaling included, far inside `i64`.
const MAX_RAW_CENTS: f64 = 1e15;

#[derive(Debug, Error, PartialEq)]
pub enum PricingError {
    #[error("miles must be a finite number between 0 and 100000, got {0}")]
    InvalidMiles(f64),
    #[error("quote exceeds the representable amount")]
    Overflow,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PricingConfig {
    pub base_fee: Money,
    pub per_mile: Money,
    pub fragile_surcharge: Money,
    pub concierge_surcharge: Money,
    pub service_fee: Money,
    pub driver_payout_percent: u8,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            base_fee: Money::from_cents(500),
            per_mile: Money::from_cents(150),
            fragile_surcharge: Money::from_cents(250),
            concierge_surcharge: Money::from_cents(300),
            service_fee: Money::from_cents(299),
            driver_payout_percent: 80,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MembershipBenefits {
    pub discount_bps: u16,
    pub waive_service_fee: bool,
}

pub fn membership_benefits(tier: MembershipTier) -> MembershipBenefits {
    match tier {
        MembershipTier::Basic => MembershipBenefits {
            discount_bps: 0,
            waive_service_fee: false,
        },
        MembershipTier::Plus => MembershipBenefits {
            discount_bps: 1_000,
            waive_service_fee: false,
        },
        MembershipTier::Executive => MembershipBenefits {
            discount_bps: 2_000,
            waive_service_fee: true,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteBreakdown {
    pub base_price: Money,
    pub discount: Money,
    pub delivery_fee: Money,
    pub service_fee: Money,
    pub total: Money,
    pub driver_payout: Money,
}

impl PricingConfig {
    fn surcharge(&self, service_type: ServiceType) -> Money {
        match service_type {
            ServiceType::Fragile => self.fragile_surcharge,
            ServiceType::Concierge => self.concierge_surcharge,
            ServiceType::Food | ServiceType::Store => Money::ZERO,
        }
    }

    /// Pre-discount price in (possibly fractional) cents.
    fn raw_cents(&self, miles: f64, service_type: ServiceType) -> Result<f64, PricingError> {
        if !(0.0..=MAX_MILES).contains(&miles) {
            return Err(PricingError::InvalidMiles(miles));
        }

        let raw = self.base_fee.cents() as f64
            + miles * self.per_mile.cents() as f64
            + self.surcharge(service_type).cents() as f64;
        if raw.abs() > MAX_RAW_CENTS {
            return Err(PricingError::Overflow);
        }
        Ok(raw)
    }

    /// Delivery fee after the membership discount, clamped at zero and
    /// rounded half-up to the cent.
    pub fn estimate_price(
        &self,
        miles: f64,
        service_type: ServiceType,
        tier: MembershipTier,
    ) -> Result<Money, PricingError> {
        let raw = self.raw_cents(miles, service_type)?;
        let keep_bps = BASIS_POINTS - i64::from(membership_benefits(tier).discount_bps);
        let discounted = (raw * keep_bps as f64).max(0.0);

        Ok(Money::from_cents(round_half_up(discounted / BASIS_POINTS as f64)))
    }

    pub fn quote_breakdown(
        &self,
        miles: f64,
        service_type: ServiceType,
        tier: MembershipTier,
    ) -> Result<QuoteBreakdown, PricingError> {
        let base_price = Money::from_cents(round_half_up(
            self.raw_cents(miles, service_type)?.max(0.0),
        ));
        let delivery_fee = self.estimate_price(miles, service_type, tier)?;
        let service_fee = if membership_benefits(tier).waive_service_fee {
            Money::ZERO
        } else {
            self.service_fee
        };
        let payout_percent = i64::from(self.driver_payout_percent.min(100));
        let total = delivery_fee
            .checked_add(service_fee)
            .ok_or(PricingError::Overflow)?;
        let driver_payout = base_price
            .cents()
            .checked_mul(payout_percent)
            .map(|cents| Money::from_cents(cents / 100))
            .ok_or(PricingError::Overflow)?;

        Ok(QuoteBreakdown {
            base_price,
            discount: base_price.saturating_sub(delivery_fee),
            delivery_fee,
            service_fee,
            total,
            driver_payout,
        })
    }
}

fn round_half_up(cents: f64) -> i64 {
    (cents + 0.5).floor() as i64
}

/// Quote with the default tariff.
pub fn estimate_price(
    miles: f64,
    service_type: ServiceType,
    tier: MembershipTier,
) -> Result<Money, PricingError> {
    PricingConfig::default().estimate_price(miles, service_type, tier)
}
