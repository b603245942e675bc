//! Product documents.
//!
//! A [`Product`] is always written whole. Partial edits are expressed as a
//! [`ProductPatch`] and merged into a full document by the caller before the
//! document reaches a store.

use crate::{
    clock::next_stamp, error::Result, CollectionSchema, Error, ProductId, Timestamp,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// A sellable variant of a product (size, flavour, colour...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: String,
    pub name: String,
    /// Overrides the product sale price when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sale_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock: Option<i64>,
}

/// A product in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Stable identifier, shared by every copy of this product
    pub id: ProductId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(default)]
    pub sale_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_price: Option<f64>,
    #[serde(default)]
    pub stock: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Blob storage path of `image_url`, needed to delete the blob
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gallery: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<Variant>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addon_group_ids: Vec<String>,
    #[serde(default)]
    pub created_at: Timestamp,
    /// Last write time, the last-write-wins key
    pub updated_at: Timestamp,
    /// Fields this crate does not model, preserved as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Product {
    /// Create a product with default attributes, created and updated at `now`.
    pub fn new(id: impl Into<ProductId>, name: impl Into<String>, now: Timestamp) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category_id: None,
            sale_price: 0.0,
            cost_price: None,
            stock: 0,
            image_url: None,
            image_path: None,
            gallery: Vec::new(),
            variants: Vec::new(),
            addon_group_ids: Vec::new(),
            created_at: now,
            updated_at: now,
            extra: Map::new(),
        }
    }

    /// Decode and validate a raw document.
    ///
    /// Null-valued fields are treated as absent.
    pub fn from_document(document: &Value, schema: &CollectionSchema) -> Result<Self> {
        schema.validate_payload(document)?;

        let mut fields = document
            .as_object()
            .cloned()
            .ok_or_else(|| Error::InvalidPayload("document must be an object".into()))?;
        fields.retain(|_, value| !value.is_null());

        let mut product: Product = serde_json::from_value(Value::Object(fields))
            .map_err(|e| Error::InvalidPayload(e.to_string()))?;
        if product.created_at == 0 {
            product.created_at = product.updated_at;
        }
        product.validate()?;
        Ok(product)
    }

    /// Encode as a raw document.
    pub fn to_document(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| Error::InvalidPayload(e.to_string()))
    }

    /// Check the business rules a stored product must satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::invalid_product("id", "must not be blank"));
        }
        if self.name.trim().is_empty() {
            return Err(Error::invalid_product("name", "must not be blank"));
        }
        check_price("salePrice", self.sale_price)?;
        if let Some(cost) = self.cost_price {
            check_price("costPrice", cost)?;
        }

        let mut seen = HashSet::new();
        for variant in &self.variants {
            if variant.id.trim().is_empty() {
                return Err(Error::invalid_product("variants", "variant id must not be blank"));
            }
            if !seen.insert(variant.id.as_str()) {
                return Err(Error::invalid_product(
                    "variants",
                    format!("duplicate variant id '{}'", variant.id),
                ));
            }
            if let Some(price) = variant.sale_price {
                check_price("variants.salePrice", price)?;
            }
        }
        Ok(())
    }

    /// Stamp a local modification made at `now`.
    pub fn touch(&mut self, now: Timestamp) {
        self.updated_at = next_stamp(Some(self.updated_at), now);
    }

    /// Price of one unit of `variant_id`, or of the product itself.
    pub fn price_of(&self, variant_id: Option<&str>) -> f64 {
        variant_id
            .and_then(|id| self.variants.iter().find(|v| v.id == id))
            .and_then(|v| v.sale_price)
            .unwrap_or(self.sale_price)
    }
}

fn check_price(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(Error::invalid_product(field, "must be a finite number"));
    }
    if value < 0.0 {
        return Err(Error::invalid_product(field, "must not be negative"));
    }
    Ok(())
}

/// Input of a new-product form, before an id and timestamps are assigned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewProduct {
    pub name: String,
    pub category_id: Option<String>,
    pub sale_price: f64,
    pub cost_price: Option<f64>,
    pub stock: i64,
    pub image_url: Option<String>,
    pub image_path: Option<String>,
    pub gallery: Vec<String>,
    pub variants: Vec<Variant>,
    pub addon_group_ids: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NewProduct {
    pub fn new(name: impl Into<String>, sale_price: f64) -> Self {
        Self {
            name: name.into(),
            sale_price,
            ..Self::default()
        }
    }

    /// Turn the form into a validated product with identity `id`.
    pub fn into_product(self, id: impl Into<ProductId>, now: Timestamp) -> Result<Product> {
        let product = Product {
            id: id.into(),
            name: self.name.trim().to_string(),
            category_id: self.category_id,
            sale_price: self.sale_price,
            cost_price: self.cost_price,
            stock: self.stock,
            image_url: self.image_url,
            image_path: self.image_path,
            gallery: self.gallery,
            variants: self.variants,
            addon_group_ids: self.addon_group_ids,
            created_at: now,
            updated_at: now,
            extra: self.extra,
        };
        product.validate()?;
        Ok(product)
    }
}

/// A partial edit of a product.
///
/// `None` leaves a field untouched. For optional attributes `Some(None)`
/// clears the field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub category_id: Option<Option<String>>,
    pub sale_price: Option<f64>,
    pub cost_price: Option<Option<f64>>,
    pub stock: Option<i64>,
    pub image_url: Option<Option<String>>,
    pub image_path: Option<Option<String>>,
    pub gallery: Option<Vec<String>>,
    pub variants: Option<Vec<Variant>>,
    pub addon_group_ids: Option<Vec<String>>,
}

impl ProductPatch {
    /// Whether applying the patch would change nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge the patch into `product`, producing the full replacement document.
    ///
    /// The result is stamped at `now` and validated.
    pub fn apply(&self, product: &Product, now: Timestamp) -> Result<Product> {
        let mut next = product.clone();
        if let Some(name) = &self.name {
            next.name = name.trim().to_string();
        }
        if let Some(category_id) = &self.category_id {
            next.category_id = category_id.clone();
        }
        if let Some(price) = self.sale_price {
            next.sale_price = price;
        }
        if let Some(cost) = self.cost_price {
            next.cost_price = cost;
        }
        if let Some(stock) = self.stock {
            next.stock = stock;
        }
        if let Some(url) = &self.image_url {
            next.image_url = url.clone();
        }
        if let Some(path) = &self.image_path {
            next.image_path = path.clone();
        }
        if let Some(gallery) = &self.gallery {
            next.gallery = gallery.clone();
        }
        if let Some(variants) = &self.variants {
            next.variants = variants.clone();
        }
        if let Some(addons) = &self.addon_group_ids {
            next.addon_group_ids = addons.clone();
        }
        next.touch(now);
        next.validate()?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_roundtrip_keeps_unknown_fields() {
        let schema = CollectionSchema::products();
        let doc = json!({
            "id": "p1",
            "name": "Latte",
            "salePrice": 4,
            "stock": 12,
            "updatedAt": 100,
            "barcode": "7501031311309",
            "variants": [{"id": "v1", "name": "Large", "salePrice": 5.5}]
        });

        let product = Product::from_document(&doc, &schema).unwrap();
        assert_eq!(product.sale_price, 4.0);
        assert_eq!(product.created_at, 100);
        assert_eq!(product.extra["barcode"], json!("7501031311309"));
        assert_eq!(product.price_of(Some("v1")), 5.5);
        assert_eq!(product.price_of(Some("missing")), 4.0);

        let encoded = product.to_document().unwrap();
        assert_eq!(encoded["barcode"], json!("7501031311309"));
        assert_eq!(encoded["salePrice"], json!(4.0));
        assert_eq!(encoded["updatedAt"], json!(100));
        assert!(encoded.get("costPrice").is_none());
    }

    #[test]
    fn null_optional_fields_are_absent() {
        let schema = CollectionSchema::products();
        let doc = json!({"id": "p1", "name": "Tea", "updatedAt": 5, "salePrice": null, "categoryId": null});

        let product = Product::from_document(&doc, &schema).unwrap();
        assert_eq!(product.sale_price, 0.0);
        assert_eq!(product.category_id, None);
    }

    #[test]
    fn malformed_documents_are_rejected() {
        let schema = CollectionSchema::products();

        let missing = json!({"id": "p1", "updatedAt": 5});
        assert!(matches!(
            Product::from_document(&missing, &schema),
            Err(Error::MissingRequiredField(f)) if f == "name"
        ));

        let bad_variant = json!({"id": "p1", "name": "Tea", "updatedAt": 5, "variants": [{"name": "x"}]});
        assert!(matches!(
            Product::from_document(&bad_variant, &schema),
            Err(Error::InvalidPayload(_))
        ));

        let negative = json!({"id": "p1", "name": "Tea", "updatedAt": 5, "salePrice": -1});
        assert!(matches!(
            Product::from_document(&negative, &schema),
            Err(Error::InvalidProduct { field, .. }) if field == "salePrice"
        ));
    }

    #[test]
    fn validation_rules() {
        let mut product = Product::new("p1", "Tea", 1);
        assert!(product.validate().is_ok());

        product.name = "   ".into();
        assert!(product.validate().is_err());

        product.name = "Tea".into();
        product.sale_price = f64::NAN;
        assert!(product.validate().is_err());

        product.sale_price = 1.0;
        product.variants = vec![
            Variant {
                id: "v".into(),
                name: "S".into(),
                sale_price: None,
                stock: None,
            },
            Variant {
                id: "v".into(),
                name: "L".into(),
                sale_price: None,
                stock: None,
            },
        ];
        assert!(matches!(
            product.validate(),
            Err(Error::InvalidProduct { field, .. }) if field == "variants"
        ));
    }

    #[test]
    fn new_product_form() {
        let mut form = NewProduct::new("  Croissant ", 3.2);
        form.stock = 10;

        let product = form.into_product("p9", 500).unwrap();
        assert_eq!(product.name, "Croissant");
        assert_eq!(product.created_at, 500);
        assert_eq!(product.updated_at, 500);

        assert!(NewProduct::new("", 1.0).into_product("p10", 1).is_err());
    }

    #[test]
    fn patch_merges_and_stamps() {
        let mut product = Product::new("p1", "Tea", 100);
        product.category_id = Some("drinks".into());
        product.cost_price = Some(0.5);

        let patch = ProductPatch {
            sale_price: Some(2.5),
            category_id: Some(None),
            ..ProductPatch::default()
        };
        assert!(!patch.is_empty());

        let next = patch.apply(&product, 200).unwrap();
        assert_eq!(next.sale_price, 2.5);
        assert_eq!(next.category_id, None);
        assert_eq!(next.cost_price, Some(0.5));
        assert_eq!(next.updated_at, 200);
        assert_eq!(next.created_at, 100);
    }

    #[test]
    fn patch_never_moves_stamp_backwards() {
        let product = Product::new("p1", "Tea", 1_000);
        let next = ProductPatch {
            stock: Some(3),
            ..ProductPatch::default()
        }
        .apply(&product, 10)
        .unwrap();
        assert_eq!(next.updated_at, 1_000);
    }

    #[test]
    fn invalid_patch_is_rejected() {
        let product = Product::new("p1", "Tea", 1);
        let patch = ProductPatch {
            name: Some(" ".into()),
            ..ProductPatch::default()
        };
        assert!(patch.apply(&product, 2).is_err());
        assert!(ProductPatch::default().is_empty());
    }
}
