//! Cache for product look-ups.
//!
//! Products are the only cached resource; carts and orders are mutable
//! state and always go to the API.

use std::time::Duration;

use cartsync_core::ProductId;
use moka::future::Cache;

use super::types::Product;

/// In-memory product cache with a fixed TTL.
#[derive(Clone)]
pub struct ProductCache {
    inner: Cache<ProductId, Product>,
}

impl ProductCache {
    /// Create a cache holding at most `capacity` products for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get(&self, id: &ProductId) -> Option<Product> {
        self.inner.get(id).await
    }

    pub async fn insert(&self, product: Product) {
        self.inner.insert(product.id.clone(), product).await;
    }

    pub async fn invalidate(&self, id: &ProductId) {
        self.inner.invalidate(id).await;
    }

    pub async fn invalidate_all(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks().await;
    }
}

#[cfg(test)]
mod tests {
    use cartsync_core::CurrencyCode;
    use rust_decimal::Decimal;

    use super::*;

    fn product(id: &str) -> Product {
        Product {
            id: ProductId::new(id),
            name: "Tee".to_string(),
            brand: None,
            price: Decimal::new(10, 0),
            stock: Some(5),
            images: Vec::new(),
            currency: CurrencyCode::USD,
        }
    }

    #[tokio::test]
    async fn test_insert_get_invalidate() {
        let cache = ProductCache::new(Duration::from_secs(60), 10);
        let id = ProductId::new("p1");
        assert!(cache.get(&id).await.is_none());

        cache.insert(product("p1")).await;
        assert_eq!(cache.get(&id).await.map(|p| p.name), Some("Tee".to_string()));

        cache.invalidate(&id).await;
        assert!(cache.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_all() {
        let cache = ProductCache::new(Duration::from_secs(60), 10);
        cache.insert(product("p1")).await;
        cache.insert(product("p2")).await;

        cache.invalidate_all().await;
        assert!(cache.get(&ProductId::new("p1")).await.is_none());
        assert!(cache.get(&ProductId::new("p2")).await.is_none());
    }
}
