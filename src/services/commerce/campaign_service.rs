use crate::{
    entities::commerce::{
        campaign::{self, CampaignDiscountType, CampaignTarget},
        category, Campaign, CampaignModel,
    },
    errors::ServiceError,
    services::commerce::{catalog_service, pricing_service},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Running campaigns with their category targets expanded to subtrees
#[derive(Debug, Clone, Default)]
pub struct CampaignMatcher {
    campaigns: Vec<CampaignModel>,
    subtrees: HashMap<Uuid, HashSet<Uuid>>,
}

impl CampaignMatcher {
    pub fn new(campaigns: Vec<CampaignModel>, categories: &[category::Model]) -> Self {
        let subtrees = campaigns
            .iter()
            .filter(|c| c.target == CampaignTarget::Category)
            .filter_map(|c| c.category_id)
            .map(|root| {
                let ids = catalog_service::expand_subcategories(categories, root);
                (root, ids.into_iter().collect())
            })
            .collect();
        Self { campaigns, subtrees }
    }

    fn targets(&self, campaign: &CampaignModel, product_id: Uuid, category_id: Option<Uuid>) -> bool {
        match campaign.target {
            CampaignTarget::Sitewide => true,
            CampaignTarget::Products => campaign.target_products().contains(&product_id),
            CampaignTarget::Category => match (campaign.category_id, category_id) {
                (Some(root), Some(cat)) => self
                    .subtrees
                    .get(&root)
                    .map_or(false, |ids| ids.contains(&cat)),
                _ => false,
            },
        }
    }

    /// Winning campaign and its per-unit discount for one product
    pub fn best_for(
        &self,
        product_id: Uuid,
        category_id: Option<Uuid>,
        unit_price: Decimal,
    ) -> Option<(&CampaignModel, Decimal)> {
        pricing_service::select_campaign(
            self.campaigns
                .iter()
                .filter(|c| self.targets(c, product_id, category_id)),
            unit_price,
        )
        .filter(|(_, off)| *off > Decimal::ZERO)
    }

    pub fn is_empty(&self) -> bool {
        self.campaigns.is_empty()
    }
}

/// Active campaigns whose window contains `now`
pub async fn load_running<C: ConnectionTrait>(
    conn: &C,
    now: DateTime<Utc>,
) -> Result<Vec<CampaignModel>, ServiceError> {
    let campaigns = Campaign::find()
        .filter(campaign::Column::IsActive.eq(true))
        .order_by_desc(campaign::Column::Priority)
        .all(conn)
        .await?;
    Ok(campaigns.into_iter().filter(|c| c.is_running(now)).collect())
}

pub async fn load_matcher<C: ConnectionTrait>(
    conn: &C,
    now: DateTime<Utc>,
) -> Result<CampaignMatcher, ServiceError> {
    let campaigns = load_running(conn, now).await?;
    if campaigns.is_empty() {
        return Ok(CampaignMatcher::default());
    }
    let categories = catalog_service::load_categories(conn).await?;
    Ok(CampaignMatcher::new(campaigns, &categories))
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateCampaignInput {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    pub target: CampaignTarget,
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub product_ids: Vec<Uuid>,
    pub discount_type: CampaignDiscountType,
    pub discount_value: Decimal,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub priority: i32,
}

impl CreateCampaignInput {
    fn check_rules(&self) -> Result<(), ServiceError> {
        if self.start_date >= self.end_date {
            return Err(ServiceError::ValidationError(
                "start_date must be before end_date".to_string(),
            ));
        }
        if self.discount_value <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "discount_value must be greater than 0".to_string(),
            ));
        }
        if self.discount_type == CampaignDiscountType::Percentage
            && self.discount_value > Decimal::ONE_HUNDRED
        {
            return Err(ServiceError::ValidationError(
                "Percentage campaigns cannot exceed 100".to_string(),
            ));
        }
        match self.target {
            CampaignTarget::Category if self.category_id.is_none() => Err(
                ServiceError::ValidationError("category_id is required for category campaigns".to_string()),
            ),
            CampaignTarget::Products if self.product_ids.is_empty() => Err(
                ServiceError::ValidationError("product_ids is required for product campaigns".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

/// Campaign administration
#[derive(Clone)]
pub struct CampaignService {
    db: Arc<DatabaseConnection>,
}

impl CampaignService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_campaign(
        &self,
        input: CreateCampaignInput,
    ) -> Result<CampaignModel, ServiceError> {
        input.validate()?;
        input.check_rules()?;

        let now = Utc::now();
        let campaign = campaign::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name),
            target: Set(input.target),
            category_id: Set(input.category_id),
            product_ids: Set(serde_json::to_value(&input.product_ids)?),
            discount_type: Set(input.discount_type),
            discount_value: Set(input.discount_value),
            start_date: Set(input.start_date),
            end_date: Set(input.end_date),
            priority: Set(input.priority),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(campaign_id = %campaign.id, "Created campaign");
        Ok(campaign)
    }

    #[instrument(skip(self))]
    pub async fn list_active(&self) -> Result<Vec<CampaignModel>, ServiceError> {
        load_running(&*self.db, Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn campaign(target: CampaignTarget, priority: i32, value: Decimal) -> CampaignModel {
        let now = Utc::now();
        CampaignModel {
            id: Uuid::new_v4(),
            name: "Eid sale".into(),
            target,
            category_id: None,
            product_ids: serde_json::json!([]),
            discount_type: CampaignDiscountType::Percentage,
            discount_value: value,
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(1),
            priority,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn category(id: Uuid, parent: Option<Uuid>) -> category::Model {
        category::Model {
            id,
            name: "c".into(),
            slug: id.to_string(),
            parent_id: parent,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn category_campaign_reaches_descendants() {
        let apparel = Uuid::new_v4();
        let shirts = Uuid::new_v4();
        let mut c = campaign(CampaignTarget::Category, 1, dec!(10));
        c.category_id = Some(apparel);

        let matcher = CampaignMatcher::new(
            vec![c],
            &[category(apparel, None), category(shirts, Some(apparel))],
        );

        let (_, off) = matcher
            .best_for(Uuid::new_v4(), Some(shirts), dec!(500))
            .unwrap();
        assert_eq!(off, dec!(50));
        assert!(matcher.best_for(Uuid::new_v4(), None, dec!(500)).is_none());
    }

    #[test]
    fn product_campaign_only_hits_listed_products() {
        let listed = Uuid::new_v4();
        let mut c = campaign(CampaignTarget::Products, 1, dec!(20));
        c.product_ids = serde_json::json!([listed]);
        let matcher = CampaignMatcher::new(vec![c], &[]);

        assert!(matcher.best_for(listed, None, dec!(100)).is_some());
        assert!(matcher.best_for(Uuid::new_v4(), None, dec!(100)).is_none());
    }

    #[test]
    fn priority_beats_discount_size() {
        let small = campaign(CampaignTarget::Sitewide, 9, dec!(5));
        let large = campaign(CampaignTarget::Sitewide, 1, dec!(40));
        let matcher = CampaignMatcher::new(vec![large, small.clone()], &[]);
        let (winner, _) = matcher.best_for(Uuid::new_v4(), None, dec!(100)).unwrap();
        assert_eq!(winner.id, small.id);
    }
}
