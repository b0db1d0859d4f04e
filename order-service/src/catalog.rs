use std::collections::HashMap;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use shared::{CartLine, ItemSnapshot};
use thiserror::Error;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{ProductRecord, VariantRecord};
use crate::store::Store;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("product {0} does not exist in this store")]
    ProductNotFound(Uuid),

    #[error("variant {0} does not exist")]
    VariantNotFound(Uuid),

    #[error("variant {variant_id} does not belong to product {product_id}")]
    VariantMismatch { variant_id: Uuid, product_id: Uuid },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Authoritative view of one cart line at resolution time.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLine {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub name: String,
    pub unit_price: BigDecimal,
    pub variant_options: Vec<String>,
    pub image_url: Option<String>,
    pub is_available: bool,
    /// `None` when stock is not tracked.
    pub stock: Option<i32>,
    pub quantity: i32,
}

impl ResolvedLine {
    pub fn snapshot(&self) -> ItemSnapshot {
        ItemSnapshot {
            product_id: self.product_id,
            variant_id: self.variant_id,
            name: self.name.clone(),
            price: self.unit_price.clone(),
            variant_options: self.variant_options.clone(),
            image_url: self.image_url.clone(),
            quantity: self.quantity,
        }
    }
}

#[derive(Clone)]
pub struct CatalogResolver {
    store: Arc<dyn Store>,
}

impl CatalogResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Resolves every line or none of them.
    pub async fn resolve(&self, store_id: Uuid, lines: &[CartLine]) -> Result<Vec<ResolvedLine>, ResolveError> {
        let mut product_ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
        product_ids.sort_unstable();
        product_ids.dedup();
        let mut variant_ids: Vec<Uuid> = lines.iter().filter_map(|l| l.variant_id).collect();
        variant_ids.sort_unstable();
        variant_ids.dedup();

        let products = self.store.catalog_products(store_id, &product_ids).await?;
        let variants = self.store.catalog_variants(&variant_ids).await?;

        resolve_lines(lines, &products, &variants)
    }
}

/// Matches cart lines against catalog records already scoped to one store.
///
/// Variant/product mismatches are reported before missing records so a cart
/// mixing a spoofed variant with other bad lines fails the same way every time.
pub fn resolve_lines(
    lines: &[CartLine],
    products: &[ProductRecord],
    variants: &[VariantRecord],
) -> Result<Vec<ResolvedLine>, ResolveError> {
    let products: HashMap<Uuid, &ProductRecord> = products.iter().map(|p| (p.id, p)).collect();
    let variants: HashMap<Uuid, &VariantRecord> = variants.iter().map(|v| (v.id, v)).collect();

    for line in lines {
        if let Some(variant) = line.variant_id.and_then(|id| variants.get(&id)) {
            if variant.product_id != line.product_id {
                return Err(ResolveError::VariantMismatch {
                    variant_id: variant.id,
                    product_id: line.product_id,
                });
            }
        }
    }

    lines
        .iter()
        .map(|line| {
            let product = products
                .get(&line.product_id)
                .ok_or(ResolveError::ProductNotFound(line.product_id))?;

            match line.variant_id {
                None => Ok(ResolvedLine {
                    product_id: product.id,
                    variant_id: None,
                    name: product.name.clone(),
                    unit_price: product.price.clone(),
                    variant_options: Vec::new(),
                    image_url: product.image_url.clone(),
                    is_available: product.is_available,
                    stock: product.stock,
                    quantity: line.quantity,
                }),
                Some(variant_id) => {
                    let variant = variants
                        .get(&variant_id)
                        .ok_or(ResolveError::VariantNotFound(variant_id))?;
                    Ok(ResolvedLine {
                        product_id: product.id,
                        variant_id: Some(variant.id),
                        name: product.name.clone(),
                        unit_price: variant.price.clone().unwrap_or_else(|| product.price.clone()),
                        variant_options: variant.option_labels.clone(),
                        image_url: variant.image_url.clone().or_else(|| product.image_url.clone()),
                        is_available: product.is_available && variant.is_available,
                        stock: variant.stock,
                        quantity: line.quantity,
                    })
                }
            }
        })
        .collect()
}
