//! Integration test support for cartsync.
//!
//! [`FakeCommerce`] is an in-process stand-in for the commerce API, served
//! by axum on an ephemeral port. It keeps one cart per identity, counts
//! requests per route, records identity headers, and can inject failures.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p cartsync-integration-tests
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]
#![allow(clippy::missing_panics_doc)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use cartsync_engine::{CartEngine, EngineConfig, OrdersService, SessionIdentityProvider};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Notify;

// =============================================================================
// Routes
// =============================================================================

/// Route labels used by the request counters.
pub mod route {
    pub const GET_CART: &str = "GET /cart";
    pub const ADD: &str = "POST /cart/add";
    pub const UPDATE: &str = "PUT /cart/items";
    pub const REMOVE_PRIMARY: &str = "DELETE /cart/items";
    pub const REMOVE_FALLBACK: &str = "DELETE /cart/remove";
    pub const CLEAR: &str = "DELETE /cart/clear";
    pub const PRODUCT: &str = "GET /products";
    pub const ORDERS: &str = "GET /orders";
    pub const ORDER_SUMMARY: &str = "GET /orders/summary";
    pub const ADMIN_ORDERS: &str = "GET /orders/admin/all";
}

/// Identity headers seen on one request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub route: &'static str,
    pub session: Option<String>,
    pub authorization: Option<String>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
struct FakeLine {
    id: String,
    product_id: String,
    quantity: i64,
    price: Decimal,
}

#[derive(Default)]
struct FakeState {
    products: Mutex<HashMap<String, Value>>,
    failing_products: Mutex<HashSet<String>>,
    carts: Mutex<HashMap<String, Vec<FakeLine>>>,
    raw_lines: Mutex<HashMap<String, Vec<Value>>>,
    discounts: Mutex<HashMap<String, Decimal>>,
    orders: Mutex<Vec<Value>>,
    order_summary: Mutex<Option<Value>>,
    counters: Mutex<HashMap<&'static str, usize>>,
    requests: Mutex<Vec<RecordedRequest>>,
    rotate_to: Mutex<Option<String>>,
    update_gate: Mutex<Option<Arc<Notify>>>,
    primary_remove_status: Mutex<Option<StatusCode>>,
    fallback_remove_missing: AtomicBool,
    fail_updates: AtomicBool,
    fail_cart_reads: AtomicBool,
    admin_forbidden: AtomicBool,
    fail_order_listing: AtomicBool,
    next_line: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FakeState {
    /// Count and record a request, returning the cart owner key.
    fn record(&self, route: &'static str, headers: &HeaderMap, body: Option<&Value>) -> Option<String> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        let session = header("x-session-id");
        let authorization = header("authorization");

        *lock(&self.counters).entry(route).or_insert(0) += 1;
        lock(&self.requests).push(RecordedRequest {
            route,
            session: session.clone(),
            authorization: authorization.clone(),
            body: body.cloned(),
        });

        match (authorization, session) {
            (Some(auth), _) => auth
                .strip_prefix("Bearer ")
                .map(FakeCommerce::user_owner),
            (None, Some(token)) => Some(FakeCommerce::session_owner(&token)),
            (None, None) => None,
        }
    }

    /// Move a session cart to the rotated token, if one is queued.
    fn rotate(&self, owner: &str) -> Option<String> {
        let new_token = lock(&self.rotate_to).take()?;
        if owner.starts_with("session:") {
            let mut carts = lock(&self.carts);
            if let Some(lines) = carts.remove(owner) {
                carts.insert(FakeCommerce::session_owner(&new_token), lines);
            }
        }
        Some(new_token)
    }

    fn cart_json(&self, owner: &str) -> Value {
        let carts = lock(&self.carts);
        let mut items: Vec<Value> = carts
            .get(owner)
            .map(|lines| {
                lines
                    .iter()
                    .map(|line| {
                        json!({
                            "_id": line.id,
                            "product": line.product_id,
                            "quantity": line.quantity,
                            "price": line.price.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        if let Some(raw) = lock(&self.raw_lines).get(owner) {
            items.extend(raw.iter().cloned());
        }
        let discount = lock(&self.discounts).get(owner).copied().unwrap_or_default();
        json!({ "items": items, "discount": discount.to_string() })
    }
}

// =============================================================================
// Fake server
// =============================================================================

/// In-process fake commerce API.
pub struct FakeCommerce {
    base_url: String,
    state: Arc<FakeState>,
    server: tokio::task::JoinHandle<()>,
}

impl FakeCommerce {
    /// Start a fake API on an ephemeral port.
    pub async fn start() -> Self {
        let state = Arc::new(FakeState::default());
        let app = Router::new()
            .route("/api/cart", get(get_cart))
            .route("/api/cart/add", post(add_to_cart))
            .route("/api/cart/items/{line_id}", put(update_line).delete(remove_primary))
            .route("/api/cart/remove/{line_id}", delete(remove_fallback))
            .route("/api/cart/clear", delete(clear_cart))
            .route("/api/products/{product_id}", get(get_product))
            .route("/api/orders", get(list_orders))
            .route("/api/orders/summary", get(order_summary))
            .route("/api/orders/admin/all", get(admin_orders))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake API listener");
        let addr = listener.local_addr().expect("Failed to read local address");
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Fake API server failed");
        });

        Self {
            base_url: format!("http://{addr}/api"),
            state,
            server,
        }
    }

    /// API origin to configure the engine with.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Engine configuration pointing at this server.
    #[must_use]
    pub fn config(&self) -> EngineConfig {
        EngineConfig::new(&self.base_url).expect("Fake API URL should parse")
    }

    /// A fresh engine with an in-memory session store.
    #[must_use]
    pub fn engine(&self) -> CartEngine {
        CartEngine::new(&self.config(), Arc::new(SessionIdentityProvider::in_memory()))
            .expect("Failed to build cart engine")
    }

    /// An orders service sharing nothing with other engines.
    #[must_use]
    pub fn orders(&self) -> OrdersService {
        let engine = self.engine();
        OrdersService::new(engine.api().clone(), Arc::clone(engine.sessions()))
    }

    // =========================================================================
    // Seeding
    // =========================================================================

    /// Cart owner key for an anonymous session token.
    #[must_use]
    pub fn session_owner(token: &str) -> String {
        format!("session:{token}")
    }

    /// Cart owner key for a bearer credential.
    #[must_use]
    pub fn user_owner(credential: &str) -> String {
        format!("user:{credential}")
    }

    /// Register a product the API can look up.
    pub fn add_product(&self, id: &str, name: &str, price: &str, stock: u32) {
        lock(&self.state.products).insert(
            id.to_string(),
            json!({"_id": id, "name": name, "price": price, "countInStock": stock, "images": [format!("{id}.png")]}),
        );
    }

    /// Make look-ups of a product fail with 404 while keeping it in carts.
    pub fn fail_product(&self, id: &str) {
        lock(&self.state.failing_products).insert(id.to_string());
    }

    /// Put a line directly into an owner's cart. Returns the line id.
    pub fn seed_line(&self, owner: &str, product_id: &str, quantity: i64, price: &str) -> String {
        let id = format!("line-{}", self.state.next_line.fetch_add(1, Ordering::SeqCst) + 1);
        lock(&self.state.carts)
            .entry(owner.to_string())
            .or_default()
            .push(FakeLine {
                id: id.clone(),
                product_id: product_id.to_string(),
                quantity,
                price: price.parse().expect("Seed price should be a decimal"),
            });
        id
    }

    /// Append a line to an owner's cart document verbatim, after the seeded
    /// lines. Mutations never touch it.
    pub fn seed_raw_line(&self, owner: &str, line: Value) {
        lock(&self.state.raw_lines)
            .entry(owner.to_string())
            .or_default()
            .push(line);
    }

    /// Set the discount reported for an owner's cart.
    pub fn set_discount(&self, owner: &str, amount: &str) {
        lock(&self.state.discounts).insert(
            owner.to_string(),
            amount.parse().expect("Discount should be a decimal"),
        );
    }

    /// Replace the order history returned by every order listing.
    pub fn set_orders(&self, orders: Vec<Value>) {
        *lock(&self.state.orders) = orders;
    }

    /// Set the body of `GET /orders/summary`; `None` answers 404.
    pub fn set_order_summary(&self, summary: Option<Value>) {
        *lock(&self.state.order_summary) = summary;
    }

    // =========================================================================
    // Failure injection
    // =========================================================================

    /// Return `sessionId: token` from the next mutation and move the cart.
    pub fn rotate_session_to(&self, token: &str) {
        *lock(&self.state.rotate_to) = Some(token.to_string());
    }

    /// Answer 404 on the primary remove route.
    pub fn primary_remove_missing(&self, missing: bool) {
        *lock(&self.state.primary_remove_status) = missing.then_some(StatusCode::NOT_FOUND);
    }

    /// Answer `status` on the primary remove route.
    pub fn fail_primary_remove(&self, status: u16) {
        let status = StatusCode::from_u16(status).expect("Status should be valid");
        *lock(&self.state.primary_remove_status) = Some(status);
    }

    /// Answer 404 on the fallback remove route.
    pub fn fallback_remove_missing(&self, missing: bool) {
        self.state.fallback_remove_missing.store(missing, Ordering::SeqCst);
    }

    /// Answer 500 on quantity updates.
    pub fn fail_updates(&self, fail: bool) {
        self.state.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Answer 503 on cart reads.
    pub fn fail_cart_reads(&self, fail: bool) {
        self.state.fail_cart_reads.store(fail, Ordering::SeqCst);
    }

    /// Answer 503 on the caller's order listing.
    pub fn fail_order_listing(&self, fail: bool) {
        self.state.fail_order_listing.store(fail, Ordering::SeqCst);
    }

    /// Answer 403 on the admin order listing.
    pub fn forbid_admin(&self, forbid: bool) {
        self.state.admin_forbidden.store(forbid, Ordering::SeqCst);
    }

    /// Hold quantity updates until the returned gate is notified.
    #[must_use]
    pub fn hold_updates(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *lock(&self.state.update_gate) = Some(Arc::clone(&gate));
        gate
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Requests received on a route.
    #[must_use]
    pub fn count(&self, route: &str) -> usize {
        lock(&self.state.counters).get(route).copied().unwrap_or(0)
    }

    /// Requests received across all routes.
    #[must_use]
    pub fn total_requests(&self) -> usize {
        lock(&self.state.counters).values().sum()
    }

    /// Every recorded request on a route, oldest first.
    #[must_use]
    pub fn requests(&self, route: &str) -> Vec<RecordedRequest> {
        lock(&self.state.requests)
            .iter()
            .filter(|r| r.route == route)
            .cloned()
            .collect()
    }

    /// Quantity of a line in an owner's server-side cart.
    #[must_use]
    pub fn server_quantity(&self, owner: &str, line_id: &str) -> Option<i64> {
        lock(&self.state.carts)
            .get(owner)?
            .iter()
            .find(|l| l.id == line_id)
            .map(|l| l.quantity)
    }

    /// Number of lines in an owner's server-side cart.
    #[must_use]
    pub fn server_line_count(&self, owner: &str) -> usize {
        lock(&self.state.carts).get(owner).map_or(0, Vec::len)
    }

    /// Wait until a route has seen at least `n` requests.
    pub async fn wait_for(&self, route: &str, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.count(route) < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("Timed out waiting for request");
    }
}

impl Drop for FakeCommerce {
    fn drop(&mut self) {
        self.server.abort();
    }
}

// =============================================================================
// Handlers
// =============================================================================

type Shared = State<Arc<FakeState>>;

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

fn unauthorized() -> Response {
    error(StatusCode::UNAUTHORIZED, "No identity provided")
}

async fn get_cart(State(state): Shared, headers: HeaderMap) -> Response {
    let Some(owner) = state.record(route::GET_CART, &headers, None) else {
        return unauthorized();
    };
    if state.fail_cart_reads.load(Ordering::SeqCst) {
        return error(StatusCode::SERVICE_UNAVAILABLE, "Cart service unavailable");
    }
    let session_id = owner.strip_prefix("session:").map(str::to_owned);
    Json(json!({ "cart": state.cart_json(&owner), "sessionId": session_id })).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddBody {
    product_id: String,
    quantity: i64,
}

async fn add_to_cart(State(state): Shared, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let Some(owner) = state.record(route::ADD, &headers, Some(&body)) else {
        return unauthorized();
    };
    let Ok(add) = serde_json::from_value::<AddBody>(body) else {
        return error(StatusCode::BAD_REQUEST, "Invalid body");
    };
    let price = {
        let products = lock(&state.products);
        let Some(product) = products.get(&add.product_id) else {
            return error(StatusCode::NOT_FOUND, "Product not found");
        };
        product["price"]
            .as_str()
            .and_then(|p| p.parse::<Decimal>().ok())
            .unwrap_or_default()
    };

    {
        let mut carts = lock(&state.carts);
        let lines = carts.entry(owner.clone()).or_default();
        if let Some(line) = lines.iter_mut().find(|l| l.product_id == add.product_id) {
            line.quantity += add.quantity;
        } else {
            let id = format!("line-{}", state.next_line.fetch_add(1, Ordering::SeqCst) + 1);
            lines.push(FakeLine {
                id,
                product_id: add.product_id,
                quantity: add.quantity,
                price,
            });
        }
    }

    let session_id = state.rotate(&owner);
    Json(json!({ "message": "Item added to cart", "sessionId": session_id })).into_response()
}

#[derive(Deserialize)]
struct UpdateBody {
    quantity: i64,
}

async fn update_line(
    State(state): Shared,
    headers: HeaderMap,
    Path(line_id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let Some(owner) = state.record(route::UPDATE, &headers, Some(&body)) else {
        return unauthorized();
    };
    let gate = lock(&state.update_gate).clone();
    if let Some(gate) = gate {
        gate.notified().await;
    }
    if state.fail_updates.load(Ordering::SeqCst) {
        return error(StatusCode::INTERNAL_SERVER_ERROR, "Update failed");
    }
    let Ok(update) = serde_json::from_value::<UpdateBody>(body) else {
        return error(StatusCode::BAD_REQUEST, "Invalid body");
    };

    {
        let mut carts = lock(&state.carts);
        let Some(line) = carts
            .get_mut(&owner)
            .and_then(|lines| lines.iter_mut().find(|l| l.id == line_id))
        else {
            return error(StatusCode::NOT_FOUND, "Cart item not found");
        };
        line.quantity = update.quantity;
    }

    let session_id = state.rotate(&owner);
    Json(json!({ "message": "Cart updated", "sessionId": session_id })).into_response()
}

fn remove(state: &FakeState, owner: &str, line_id: &str) -> Response {
    {
        let mut carts = lock(&state.carts);
        let Some(lines) = carts.get_mut(owner) else {
            return error(StatusCode::NOT_FOUND, "Cart not found");
        };
        let before = lines.len();
        lines.retain(|l| l.id != line_id);
        if lines.len() == before {
            return error(StatusCode::NOT_FOUND, "Cart item not found");
        }
    }
    let session_id = state.rotate(owner);
    Json(json!({ "message": "Item removed", "sessionId": session_id })).into_response()
}

async fn remove_primary(State(state): Shared, headers: HeaderMap, Path(line_id): Path<String>) -> Response {
    let Some(owner) = state.record(route::REMOVE_PRIMARY, &headers, None) else {
        return unauthorized();
    };
    let status = *lock(&state.primary_remove_status);
    if let Some(status) = status {
        return error(status, "Cannot DELETE this route");
    }
    remove(&state, &owner, &line_id)
}

async fn remove_fallback(State(state): Shared, headers: HeaderMap, Path(line_id): Path<String>) -> Response {
    let Some(owner) = state.record(route::REMOVE_FALLBACK, &headers, None) else {
        return unauthorized();
    };
    if state.fallback_remove_missing.load(Ordering::SeqCst) {
        return error(StatusCode::NOT_FOUND, "Cannot DELETE this route");
    }
    remove(&state, &owner, &line_id)
}

async fn clear_cart(State(state): Shared, headers: HeaderMap) -> Response {
    let Some(owner) = state.record(route::CLEAR, &headers, None) else {
        return unauthorized();
    };
    lock(&state.carts).remove(&owner);
    let session_id = state.rotate(&owner);
    Json(json!({ "message": "Cart cleared", "sessionId": session_id })).into_response()
}

async fn get_product(State(state): Shared, headers: HeaderMap, Path(product_id): Path<String>) -> Response {
    state.record(route::PRODUCT, &headers, None);
    if lock(&state.failing_products).contains(&product_id) {
        return error(StatusCode::NOT_FOUND, "Product not found");
    }
    match lock(&state.products).get(&product_id) {
        Some(product) => Json(json!({ "product": product })).into_response(),
        None => error(StatusCode::NOT_FOUND, "Product not found"),
    }
}

#[derive(Deserialize)]
struct PageQuery {
    page: Option<u32>,
    limit: Option<u32>,
}

fn orders_page(state: &FakeState, query: &PageQuery) -> Value {
    let orders = lock(&state.orders);
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(10).max(1);
    let start = usize::try_from((page - 1) * limit).unwrap_or(usize::MAX);
    let slice: Vec<Value> = orders
        .iter()
        .skip(start)
        .take(usize::try_from(limit).unwrap_or(usize::MAX))
        .cloned()
        .collect();
    let total = orders.len();
    let pages = total.div_ceil(usize::try_from(limit).unwrap_or(1));
    json!({
        "orders": slice,
        "pagination": {"currentPage": page, "totalPages": pages, "total": total}
    })
}

async fn list_orders(State(state): Shared, headers: HeaderMap, Query(query): Query<PageQuery>) -> Response {
    if state.record(route::ORDERS, &headers, None).is_none() {
        return unauthorized();
    }
    if state.fail_order_listing.load(Ordering::SeqCst) {
        return error(StatusCode::SERVICE_UNAVAILABLE, "Orders unavailable");
    }
    Json(orders_page(&state, &query)).into_response()
}

async fn order_summary(State(state): Shared, headers: HeaderMap) -> Response {
    if state.record(route::ORDER_SUMMARY, &headers, None).is_none() {
        return unauthorized();
    }
    match lock(&state.order_summary).clone() {
        Some(summary) => Json(summary).into_response(),
        None => error(StatusCode::NOT_FOUND, "Summary not available"),
    }
}

async fn admin_orders(State(state): Shared, headers: HeaderMap, Query(query): Query<PageQuery>) -> Response {
    if state.record(route::ADMIN_ORDERS, &headers, None).is_none() {
        return unauthorized();
    }
    if state.admin_forbidden.load(Ordering::SeqCst) {
        return error(StatusCode::FORBIDDEN, "Admin access required");
    }
    Json(orders_page(&state, &query)).into_response()
}
