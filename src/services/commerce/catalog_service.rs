use crate::{
    entities::commerce::{
        category, product_variant, Category, Product, ProductModel, ProductVariant,
        ProductVariantModel, VariantOption,
    },
    entities::product,
    errors::ServiceError,
    services::commerce::pricing_service,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait, TryIntoModel,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// An option axis such as `Size` with its values
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OptionDefinition {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub values: Vec<String>,
}

/// Cartesian product of the option axes, in declaration order.
///
/// Returns no combinations when there are no axes or any axis is empty.
pub fn generate_combinations(options: &[OptionDefinition]) -> Vec<Vec<VariantOption>> {
    if options.is_empty() || options.iter().any(|o| o.values.is_empty()) {
        return Vec::new();
    }

    options.iter().fold(vec![Vec::new()], |acc, axis| {
        acc.iter()
            .flat_map(|prefix| {
                axis.values.iter().map(move |value| {
                    let mut combo = prefix.clone();
                    combo.push(VariantOption::new(axis.name.clone(), value.clone()));
                    combo
                })
            })
            .collect()
    })
}

/// `root` plus every descendant category id. Cycles in the parent links are
/// tolerated.
pub fn expand_subcategories(categories: &[category::Model], root: Uuid) -> Vec<Uuid> {
    let mut seen = HashSet::from([root]);
    let mut ordered = vec![root];
    let mut queue = VecDeque::from([root]);

    while let Some(current) = queue.pop_front() {
        for child in categories.iter().filter(|c| c.parent_id == Some(current)) {
            if seen.insert(child.id) {
                ordered.push(child.id);
                queue.push_back(child.id);
            }
        }
    }

    ordered
}

/// Identifies a variant by sku or by its full option set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariantSelector {
    pub sku: Option<String>,
    pub options: Option<Vec<VariantOption>>,
}

impl VariantSelector {
    pub fn is_empty(&self) -> bool {
        self.sku.as_deref().map_or(true, str::is_empty)
            && self.options.as_ref().map_or(true, Vec::is_empty)
    }
}

/// A product together with its variants
#[derive(Debug, Clone, Serialize)]
pub struct ProductWithVariants {
    #[serde(flatten)]
    pub product: ProductModel,
    pub variants: Vec<ProductVariantModel>,
}

impl ProductWithVariants {
    /// Resolves `selector` against this product.
    ///
    /// Products without variants accept only an empty selector. Products with
    /// variants require a selector naming exactly one variant.
    pub fn select_variant(
        &self,
        selector: &VariantSelector,
    ) -> Result<Option<&ProductVariantModel>, ServiceError> {
        if selector.is_empty() {
            if self.product.has_variants {
                return Err(ServiceError::InvalidVariant(format!(
                    "Product {} requires a variant selection",
                    self.product.id
                )));
            }
            return Ok(None);
        }

        let found = match (&selector.sku, &selector.options) {
            (Some(sku), _) if !sku.is_empty() => self.variants.iter().find(|v| &v.sku == sku),
            (_, Some(options)) => self.variants.iter().find(|v| v.matches_options(options)),
            _ => None,
        };

        found.map(Some).ok_or_else(|| {
            ServiceError::InvalidVariant(format!(
                "No variant of product {} matches the selection",
                self.product.id
            ))
        })
    }

    /// Current effective unit price for the product or one of its variants
    pub fn unit_price(
        &self,
        variant: Option<&ProductVariantModel>,
        now: chrono::DateTime<Utc>,
    ) -> Decimal {
        match variant {
            Some(v) => pricing_service::resolve_variant_price(&self.product, v, now),
            None => pricing_service::resolve_product_price(&self.product, now),
        }
    }

    /// Variant image when present, otherwise the product's primary image
    pub fn representative_image(&self, variant: Option<&ProductVariantModel>) -> Option<String> {
        variant
            .and_then(|v| v.image.clone())
            .or_else(|| self.product.primary_image())
    }
}

/// Loads a product and its variants, `None` when the product does not exist.
pub async fn load_product<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
) -> Result<Option<ProductWithVariants>, ServiceError> {
    let Some(product) = Product::find_by_id(product_id).one(conn).await? else {
        return Ok(None);
    };
    let variants = ProductVariant::find()
        .filter(product_variant::Column::ProductId.eq(product_id))
        .order_by_asc(product_variant::Column::Sku)
        .all(conn)
        .await?;
    Ok(Some(ProductWithVariants { product, variants }))
}

pub async fn load_categories<C: ConnectionTrait>(
    conn: &C,
) -> Result<Vec<category::Model>, ServiceError> {
    Ok(Category::find().all(conn).await?)
}

/// Input for creating a variant explicitly
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateVariantInput {
    #[validate(length(min = 1, max = 100))]
    pub sku: String,
    pub options: Vec<VariantOption>,
    pub base_price: Option<Decimal>,
    pub discount_percentage: Option<Decimal>,
    pub discount_start: Option<chrono::DateTime<Utc>>,
    pub discount_end: Option<chrono::DateTime<Utc>>,
    #[validate(range(min = 0))]
    pub stock: i32,
    pub image: Option<String>,
}

/// Input for creating a product
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateProductInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 255))]
    pub slug: String,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    pub base_price: Decimal,
    #[serde(default)]
    pub discount_percentage: Decimal,
    pub discount_start: Option<chrono::DateTime<Utc>>,
    pub discount_end: Option<chrono::DateTime<Utc>>,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub stock: i32,
    #[serde(default)]
    pub images: Vec<String>,
    /// Explicit variants; takes precedence over `options`
    #[serde(default)]
    #[validate]
    pub variants: Vec<CreateVariantInput>,
    /// Option axes to generate one variant per combination from
    #[serde(default)]
    #[validate]
    pub options: Vec<OptionDefinition>,
    /// Stock assigned to each generated variant
    #[serde(default)]
    pub variant_stock: i32,
}

fn validate_discount(
    pct: Decimal,
    start: Option<chrono::DateTime<Utc>>,
    end: Option<chrono::DateTime<Utc>>,
) -> Result<(), ServiceError> {
    if pct < Decimal::ZERO || pct > Decimal::ONE_HUNDRED {
        return Err(ServiceError::ValidationError(
            "discount_percentage must be between 0 and 100".to_string(),
        ));
    }
    if let (Some(s), Some(e)) = (start, end) {
        if s >= e {
            return Err(ServiceError::ValidationError(
                "discount_start must be before discount_end".to_string(),
            ));
        }
    }
    Ok(())
}

fn generated_sku(slug: &str, combo: &[VariantOption]) -> String {
    let suffix = combo
        .iter()
        .map(|o| o.value.replace(' ', "-"))
        .collect::<Vec<_>>()
        .join("-");
    format!("{}-{}", slug, suffix).to_uppercase()
}

/// Catalog lookups and product creation
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Creates a product and its variants.
    ///
    /// Derived prices are computed here, right before the rows are written.
    #[instrument(skip(self, input), fields(slug = %input.slug))]
    pub async fn create_product(
        &self,
        input: CreateProductInput,
    ) -> Result<ProductWithVariants, ServiceError> {
        input.validate()?;
        if input.base_price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "base_price cannot be negative".to_string(),
            ));
        }
        validate_discount(
            input.discount_percentage,
            input.discount_start,
            input.discount_end,
        )?;

        let now = Utc::now();
        let product_id = Uuid::new_v4();

        let variant_inputs: Vec<CreateVariantInput> = if !input.variants.is_empty() {
            input.variants.clone()
        } else {
            generate_combinations(&input.options)
                .into_iter()
                .map(|combo| CreateVariantInput {
                    sku: generated_sku(&input.slug, &combo),
                    options: combo,
                    base_price: None,
                    discount_percentage: None,
                    discount_start: None,
                    discount_end: None,
                    stock: input.variant_stock.max(0),
                    image: None,
                })
                .collect()
        };
        for v in &variant_inputs {
            validate_discount(
                v.discount_percentage.unwrap_or(Decimal::ZERO),
                v.discount_start,
                v.discount_end,
            )?;
        }

        let txn = self.db.begin().await?;

        let mut product = product::ActiveModel {
            id: Set(product_id),
            name: Set(input.name.clone()),
            slug: Set(input.slug.clone()),
            description: Set(input.description.clone()),
            category_id: Set(input.category_id),
            base_price: Set(input.base_price),
            discount_percentage: Set(input.discount_percentage),
            discount_start: Set(input.discount_start),
            discount_end: Set(input.discount_end),
            price: Set(Decimal::ZERO),
            stock: Set(input.stock.max(0)),
            has_variants: Set(!variant_inputs.is_empty()),
            images: Set(serde_json::to_value(&input.images)?),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let draft = product.clone().try_into_model()?;
        product.price = Set(pricing_service::resolve_product_price(&draft, now));

        let product = product
            .insert(&txn)
            .await
            .map_err(|e| ServiceError::from_db(e, "Product slug"))?;

        let mut variants = Vec::with_capacity(variant_inputs.len());
        for v in variant_inputs {
            let mut model = product_variant::ActiveModel {
                id: Set(Uuid::new_v4()),
                product_id: Set(product_id),
                sku: Set(v.sku.clone()),
                options: Set(serde_json::to_value(product_variant::normalize_options(
                    v.options.clone(),
                ))?),
                base_price: Set(v.base_price),
                discount_percentage: Set(v.discount_percentage),
                discount_start: Set(v.discount_start),
                discount_end: Set(v.discount_end),
                price: Set(Decimal::ZERO),
                stock: Set(v.stock.max(0)),
                image: Set(v.image.clone()),
                created_at: Set(now),
                updated_at: Set(now),
            };
            let draft = model.clone().try_into_model()?;
            model.price = Set(pricing_service::resolve_variant_price(&product, &draft, now));

            let inserted = model
                .insert(&txn)
                .await
                .map_err(|e| ServiceError::from_db(e, &format!("Variant sku {}", v.sku)))?;
            variants.push(inserted);
        }

        txn.commit().await?;

        info!(product_id = %product_id, variants = variants.len(), "Created product");
        Ok(ProductWithVariants { product, variants })
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, product_id: Uuid) -> Result<ProductWithVariants, ServiceError> {
        load_product(&*self.db, product_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }

    /// Active products in `category_id` or any of its descendants
    #[instrument(skip(self))]
    pub async fn list_category_products(
        &self,
        category_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<ProductModel>, u64), ServiceError> {
        let categories = load_categories(&*self.db).await?;
        if !categories.iter().any(|c| c.id == category_id) {
            return Err(ServiceError::NotFound(format!(
                "Category {} not found",
                category_id
            )));
        }
        let ids = expand_subcategories(&categories, category_id);

        let paginator = Product::find()
            .filter(product::Column::CategoryId.is_in(ids))
            .filter(product::Column::IsActive.eq(true))
            .order_by_desc(product::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator.num_items().await?;
        let data = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((data, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(name: &str, values: &[&str]) -> OptionDefinition {
        OptionDefinition {
            name: name.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    fn cat(id: Uuid, parent: Option<Uuid>) -> category::Model {
        category::Model {
            id,
            name: id.to_string(),
            slug: id.to_string(),
            parent_id: parent,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn combinations_cover_every_pairing() {
        let combos = generate_combinations(&[
            axis("Size", &["S", "M", "L"]),
            axis("Color", &["Red", "Blue"]),
        ]);
        assert_eq!(combos.len(), 6);
        assert_eq!(
            combos[0],
            vec![VariantOption::new("Size", "S"), VariantOption::new("Color", "Red")]
        );
        assert_eq!(
            combos[5],
            vec![VariantOption::new("Size", "L"), VariantOption::new("Color", "Blue")]
        );
    }

    #[test]
    fn combinations_empty_when_an_axis_is_empty() {
        assert!(generate_combinations(&[]).is_empty());
        assert!(generate_combinations(&[axis("Size", &["S"]), axis("Color", &[])]).is_empty());
    }

    #[test]
    fn subcategory_walk_collects_all_descendants() {
        let root = Uuid::new_v4();
        let child = Uuid::new_v4();
        let grandchild = Uuid::new_v4();
        let unrelated = Uuid::new_v4();
        let categories = vec![
            cat(root, None),
            cat(child, Some(root)),
            cat(grandchild, Some(child)),
            cat(unrelated, None),
        ];

        let ids = expand_subcategories(&categories, root);
        assert_eq!(ids, vec![root, child, grandchild]);
    }

    #[test]
    fn subcategory_walk_survives_cycles() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let categories = vec![cat(a, Some(b)), cat(b, Some(a))];
        let ids = expand_subcategories(&categories, a);
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn generated_skus_are_upper_cased() {
        let sku = generated_sku(
            "linen-shirt",
            &[VariantOption::new("Size", "M"), VariantOption::new("Color", "Sky Blue")],
        );
        assert_eq!(sku, "LINEN-SHIRT-M-SKY-BLUE");
    }
}
