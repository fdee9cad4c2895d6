//! Effective price resolution for products, variants and campaigns.
//!
//! Everything here is pure: callers capture a single `now` per pricing
//! operation and pass it through.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::entities::{
    commerce::campaign::{self, CampaignDiscountType},
    commerce::product_variant,
    product,
};

/// Rounds a monetary amount to 2 decimal places, half away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Whether `now` falls inside `[start, end]`. A missing bound is open.
pub fn discount_window_active(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    start.map_or(true, |s| s <= now) && end.map_or(true, |e| now <= e)
}

/// Effective price of `base` under a percentage discount and its window.
pub fn resolve_price(
    base: Decimal,
    discount_pct: Decimal,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Decimal {
    if discount_pct > Decimal::ZERO && discount_window_active(start, end, now) {
        let discounted = base - base * discount_pct / Decimal::ONE_HUNDRED;
        discounted.max(Decimal::ZERO)
    } else {
        base
    }
}

pub fn resolve_product_price(product: &product::Model, now: DateTime<Utc>) -> Decimal {
    resolve_price(
        product.base_price,
        product.discount_percentage,
        product.discount_start,
        product.discount_end,
        now,
    )
}

/// Variant price. The variant's own discount wins when it defines one;
/// otherwise the product's discount applies to the variant's base price.
pub fn resolve_variant_price(
    product: &product::Model,
    variant: &product_variant::Model,
    now: DateTime<Utc>,
) -> Decimal {
    let base = variant.base_price.unwrap_or(product.base_price);

    match variant.discount_percentage {
        Some(pct) if pct > Decimal::ZERO => resolve_price(
            base,
            pct,
            variant.discount_start,
            variant.discount_end,
            now,
        ),
        _ => resolve_price(
            base,
            product.discount_percentage,
            product.discount_start,
            product.discount_end,
            now,
        ),
    }
}

/// Per-unit discount a campaign grants on `unit_price`, never above it.
pub fn campaign_unit_discount(campaign: &campaign::Model, unit_price: Decimal) -> Decimal {
    let raw = match campaign.discount_type {
        CampaignDiscountType::Percentage => {
            unit_price * campaign.discount_value / Decimal::ONE_HUNDRED
        }
        CampaignDiscountType::Flat => campaign.discount_value,
    };
    raw.max(Decimal::ZERO).min(unit_price)
}

/// Picks the winning campaign among already-matching candidates: highest
/// priority, ties broken by the larger discount on `unit_price`.
pub fn select_campaign<'a, I>(candidates: I, unit_price: Decimal) -> Option<(&'a campaign::Model, Decimal)>
where
    I: IntoIterator<Item = &'a campaign::Model>,
{
    candidates
        .into_iter()
        .map(|c| (c, campaign_unit_discount(c, unit_price)))
        .max_by(|(a, a_off), (b, b_off)| a.priority.cmp(&b.priority).then(a_off.cmp(b_off)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::commerce::campaign::CampaignTarget;
    use chrono::Duration;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn product(base: Decimal, pct: Decimal) -> product::Model {
        product::Model {
            id: Uuid::new_v4(),
            name: "Kurta".into(),
            slug: "kurta".into(),
            description: None,
            category_id: None,
            base_price: base,
            discount_percentage: pct,
            discount_start: None,
            discount_end: None,
            price: base,
            stock: 10,
            has_variants: true,
            images: serde_json::json!([]),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn variant(base: Option<Decimal>, pct: Option<Decimal>) -> product_variant::Model {
        product_variant::Model {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            sku: "KURTA-M".into(),
            options: serde_json::json!([{"name": "Size", "value": "M"}]),
            base_price: base,
            discount_percentage: pct,
            discount_start: None,
            discount_end: None,
            price: Decimal::ZERO,
            stock: 5,
            image: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn campaign(priority: i32, kind: CampaignDiscountType, value: Decimal) -> campaign::Model {
        let now = Utc::now();
        campaign::Model {
            id: Uuid::new_v4(),
            name: format!("c{}", priority),
            target: CampaignTarget::Sitewide,
            category_id: None,
            product_ids: serde_json::json!([]),
            discount_type: kind,
            discount_value: value,
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(1),
            priority,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn discount_applies_inside_window() {
        let now = Utc::now();
        let price = resolve_price(
            dec!(1000),
            dec!(20),
            Some(now - Duration::hours(1)),
            Some(now + Duration::hours(1)),
            now,
        );
        assert_eq!(price, dec!(800));
    }

    #[test]
    fn discount_ignored_outside_window() {
        let now = Utc::now();
        let expired = resolve_price(
            dec!(1000),
            dec!(20),
            Some(now - Duration::days(3)),
            Some(now - Duration::days(1)),
            now,
        );
        assert_eq!(expired, dec!(1000));
    }

    #[test]
    fn no_window_means_always_active() {
        assert_eq!(
            resolve_price(dec!(1000), dec!(20), None, None, Utc::now()),
            dec!(800)
        );
    }

    #[test]
    fn full_discount_floors_at_zero() {
        assert_eq!(
            resolve_price(dec!(50), dec!(150), None, None, Utc::now()),
            Decimal::ZERO
        );
    }

    #[test]
    fn variant_discount_overrides_product_discount() {
        let p = product(dec!(1000), dec!(20));
        let v = variant(Some(dec!(1200)), Some(dec!(50)));
        assert_eq!(resolve_variant_price(&p, &v, Utc::now()), dec!(600));
    }

    #[test]
    fn product_discount_applies_to_variant_base() {
        let p = product(dec!(1000), dec!(20));
        let v = variant(Some(dec!(1200)), None);
        assert_eq!(resolve_variant_price(&p, &v, Utc::now()), dec!(960));
    }

    #[test]
    fn variant_without_base_inherits_product_base() {
        let p = product(dec!(1000), Decimal::ZERO);
        let v = variant(None, None);
        assert_eq!(resolve_variant_price(&p, &v, Utc::now()), dec!(1000));
    }

    #[test]
    fn highest_priority_campaign_wins() {
        let low = campaign(1, CampaignDiscountType::Percentage, dec!(50));
        let high = campaign(5, CampaignDiscountType::Flat, dec!(10));
        let (winner, off) = select_campaign([&low, &high], dec!(200)).unwrap();
        assert_eq!(winner.id, high.id);
        assert_eq!(off, dec!(10));
    }

    #[test]
    fn priority_tie_prefers_larger_discount() {
        let flat = campaign(3, CampaignDiscountType::Flat, dec!(30));
        let pct = campaign(3, CampaignDiscountType::Percentage, dec!(20));
        let (winner, off) = select_campaign([&flat, &pct], dec!(200)).unwrap();
        assert_eq!(winner.id, pct.id);
        assert_eq!(off, dec!(40));
    }

    #[test]
    fn flat_campaign_never_exceeds_unit_price() {
        let c = campaign(1, CampaignDiscountType::Flat, dec!(500));
        assert_eq!(campaign_unit_discount(&c, dec!(120)), dec!(120));
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round_money(dec!(10.005)), dec!(10.01));
        assert_eq!(round_money(dec!(10.004)), dec!(10.00));
    }

    proptest! {
        #[test]
        fn resolved_price_stays_within_bounds(
            base_cents in 0u64..10_000_000,
            pct in 0u32..=100,
            offset_hours in -48i64..48,
        ) {
            let base = Decimal::new(base_cents as i64, 2);
            let pct = Decimal::from(pct);
            let now = Utc::now();
            let start = now + Duration::hours(offset_hours);
            let end = start + Duration::hours(24);

            let price = resolve_price(base, pct, Some(start), Some(end), now);
            prop_assert!(price >= Decimal::ZERO);
            prop_assert!(price <= base);

            let in_window = start <= now && now <= end;
            if !in_window || pct.is_zero() {
                prop_assert_eq!(price, base);
            } else {
                prop_assert_eq!(price, base - base * pct / Decimal::ONE_HUNDRED);
            }
        }
    }
}
