//! Product payloads and the persisted item shapes derived from them

use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// Product as handed over by catalog UI (carousels, product pages, menus)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, alias = "image")]
    pub images: Vec<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Product {
    /// Create a product with an id and price; other fields empty
    pub fn new<S: Into<String>>(id: S, price: f64) -> Self {
        Self {
            id: id.into(),
            price: Some(price),
            ..Default::default()
        }
    }

    /// Set the display name
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Add an image URL
    pub fn with_image<S: Into<String>>(mut self, image: S) -> Self {
        self.images.push(image.into());
        self
    }

    /// Set the product code
    pub fn with_code<S: Into<String>>(mut self, code: S) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Set size and color
    pub fn with_variant(mut self, size: Option<String>, color: Option<String>) -> Self {
        self.size = size;
        self.color = color;
        self
    }

    /// First image, used as the thumbnail
    pub fn primary_image(&self) -> Option<&str> {
        self.images.iter().map(String::as_str).find(|i| !i.is_empty())
    }

    /// Minimum needed for a cart line: an id and a usable price
    pub(crate) fn validate_for_cart(&self) -> Result<f64, StateError> {
        if self.id.trim().is_empty() {
            return Err(StateError::InvalidProduct("missing id".to_string()));
        }
        match self.price {
            Some(price) if price.is_finite() && price >= 0.0 => Ok(price),
            Some(price) => Err(StateError::InvalidProduct(format!(
                "invalid price {} for '{}'",
                price, self.id
            ))),
            None => Err(StateError::InvalidProduct(format!(
                "missing price for '{}'",
                self.id
            ))),
        }
    }

    /// Wishlist entries also need a name and at least one image
    pub(crate) fn validate_for_wishlist(&self) -> Result<f64, StateError> {
        let price = self.validate_for_cart()?;
        if self.name.trim().is_empty() {
            return Err(StateError::InvalidProduct(format!(
                "missing name for '{}'",
                self.id
            )));
        }
        if self.primary_image().is_none() {
            return Err(StateError::InvalidProduct(format!(
                "missing image for '{}'",
                self.id
            )));
        }
        Ok(price)
    }
}

/// One cart line. At most one per product id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub price: f64,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl CartItem {
    pub(crate) fn from_product(product: &Product, price: f64, quantity: u32) -> Self {
        Self {
            id: product.id.clone(),
            name: product.name.clone(),
            info: product.info.clone(),
            code: product.code.clone(),
            image: product.primary_image().map(str::to_string),
            price,
            quantity,
            size: product.size.clone(),
            color: product.color.clone(),
        }
    }

    /// price × quantity
    pub fn line_total(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }
}

fn one() -> u32 {
    1
}

/// Wishlist entry; presence is all that matters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WishlistItem {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default = "one")]
    pub quantity: u32,
}

impl WishlistItem {
    pub(crate) fn from_product(product: &Product, price: f64) -> Self {
        Self {
            id: product.id.clone(),
            name: product.name.clone(),
            info: product.info.clone(),
            price,
            image: product.primary_image().map(str::to_string),
            code: product.code.clone(),
            quantity: 1,
        }
    }
}

/// Lightweight record kept in the recently viewed list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSnapshot {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl From<&Product> for ProductSnapshot {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id.clone(),
            name: product.name.clone(),
            price: product.price,
            image: product.primary_image().map(str::to_string),
            code: product.code.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cart_validation() {
        assert!(Product::new("p1", 10.0).validate_for_cart().is_ok());
        assert!(Product::new("", 10.0).validate_for_cart().is_err());
        assert!(Product::new("p1", f64::NAN).validate_for_cart().is_err());
        assert!(Product::new("p1", -1.0).validate_for_cart().is_err());

        let no_price = Product {
            id: "p1".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            no_price.validate_for_cart(),
            Err(StateError::InvalidProduct(_))
        ));
    }

    #[test]
    fn test_wishlist_validation() {
        let shirt = Product::new("p2", 20.0).with_name("Shirt").with_image("x.jpg");
        assert_eq!(shirt.validate_for_wishlist().unwrap(), 20.0);

        assert!(Product::new("p2", 20.0)
            .with_image("x.jpg")
            .validate_for_wishlist()
            .is_err());
        assert!(Product::new("p2", 20.0)
            .with_name("Shirt")
            .validate_for_wishlist()
            .is_err());
        assert!(Product::new("p2", 20.0)
            .with_name("Shirt")
            .with_image("")
            .validate_for_wishlist()
            .is_err());
    }

    #[test]
    fn test_product_accepts_image_alias() {
        let product: Product =
            serde_json::from_str(r#"{"id":"p2","name":"Shirt","price":20,"image":["x.jpg"]}"#)
                .unwrap();
        assert_eq!(product.primary_image(), Some("x.jpg"));
    }

    #[test]
    fn test_cart_item_wire_format() {
        let item = CartItem::from_product(&Product::new("p1", 10.0), 10.0, 3);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": "p1", "name": "", "price": 10.0, "quantity": 3})
        );
        assert_eq!(item.line_total(), 30.0);
    }
}
