//! REST API layer using Axum (exposed on port 11111 by default)
//!
//! - Accounts: register/login with bcrypt + JWT.
//! - Tenants and memberships (roles/groups per tenant).
//! - Entity definitions and tenant-scoped row CRUD with filtering, paging
//!   and row-level sharing.
//! - Anonymous listing of public rows.

use axum::{
    extract::{Path, RawQuery, State},
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::{hash_password, verify_password, TokenIssuer};
use crate::error::{Error, Result};
use crate::filters::{build_condition, FilterRequest};
use crate::models::{Actor, AuthPayload, Entity, Row, RowPermission, Tenant, TenantMember, User, Visibility};
use crate::pagination::{next_url, parse_query, PaginationChange, PaginationParams, PaginationResult};
use crate::permissions::{Capabilities, ShareSettings};
use crate::storage::{NewEntity, NewRow, RowUpdate, RowView, Storage};

/// Shared app state for REST handlers (Arc-wrapped for concurrency)
#[derive(Clone)]
pub struct AppState {
    storage: Arc<Storage>,
    tokens: TokenIssuer,
}

#[derive(Serialize, Deserialize)]
pub struct UserRegister {
    pub username: String,
    pub password: String,
}

#[derive(Serialize, Deserialize)]
pub struct UserLogin {
    pub username: String,
    pub password: String,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

/// Generic REST response (JSON)
#[derive(Serialize, Deserialize, Debug)]
pub struct RestResponse {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub results: Vec<String>, // ids
}

impl RestResponse {
    fn ok(message: impl Into<String>, results: Vec<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            results,
        })
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Unauthorized | Error::Token(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Config(_) | Error::Storage(_) | Error::Serialization(_) | Error::Hash(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }

        let body = RestResponse {
            success: false,
            message: self.to_string(),
            results: vec![],
        };
        (status, Json(body)).into_response()
    }
}

async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> std::result::Result<Response, Error> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(Error::Unauthorized)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(Error::Unauthorized)?;
    let claims = state
        .tokens
        .validate_jwt(token)
        .map_err(|_| Error::Unauthorized)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Create Axum router with the account, tenant, entity and row endpoints
pub fn create_router(storage: Storage, tokens: TokenIssuer) -> Router {
    let state = Arc::new(AppState {
        storage: Arc::new(storage),
        tokens,
    });

    let rows_path = "/tenants/:tenant_id/entities/:slug/rows";
    let auth_routes = Router::new()
        .route("/tenants", post(create_tenant_handler).get(get_tenants_handler))
        .route(
            "/tenants/:tenant_id/members",
            post(upsert_member_handler).get(list_members_handler),
        )
        .route("/entities", post(create_entity_handler).get(list_entities_handler))
        .route("/entities/:slug", get(get_entity_handler))
        .route(rows_path, get(list_rows_handler).post(create_row_handler))
        .route(
            &format!("{}/:row_id", rows_path),
            get(get_row_handler)
                .put(update_row_handler)
                .delete(delete_row_handler),
        )
        .route(
            &format!("{}/:row_id/permissions", rows_path),
            get(get_permissions_handler).put(set_permissions_handler),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/register", post(register_handler))
        .route("/login", post(login_handler))
        .route("/health", get(health_handler))
        .route("/public/entities/:slug/rows", get(list_public_rows_handler))
        .merge(auth_routes)
        .with_state(state)
}

fn load_entity(state: &AppState, slug: &str) -> Result<Entity> {
    state
        .storage
        .get_entity(slug)?
        .ok_or_else(|| Error::not_found(format!("entity {}", slug)))
}

/// The caller as a member of `tenant_id`; non-members are rejected.
fn tenant_actor(state: &AppState, claims: &AuthPayload, tenant_id: &str) -> Result<Actor> {
    let member = state
        .storage
        .get_member(tenant_id, &claims.sub)?
        .ok_or_else(|| Error::Forbidden(format!("not a member of tenant {}", tenant_id)))?;
    Ok(Actor::for_member(&member))
}

/// Load a row of the tenant (or a global row) the actor can read.
///
/// Unreadable rows are reported as missing.
fn load_readable_row(
    state: &AppState,
    entity: &Entity,
    tenant_id: &str,
    row_id: &str,
    actor: &Actor,
) -> Result<(Row, Capabilities)> {
    let row = state
        .storage
        .get_row(entity, row_id)?
        .filter(|r| r.tenant_id.as_deref().map_or(true, |t| t == tenant_id))
        .ok_or_else(|| Error::not_found(format!("row {}", row_id)))?;
    let caps = state.storage.capabilities(&row, Some(actor))?;
    if !caps.can_read {
        return Err(Error::not_found(format!("row {}", row_id)));
    }
    Ok((row, caps))
}

async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<UserRegister>,
) -> Result<Json<RestResponse>> {
    let username = payload.username.trim();
    if username.is_empty() || payload.password.len() < 6 {
        return Err(Error::validation(
            "username is required and password needs at least 6 characters",
        ));
    }
    let user = User {
        username: username.to_string(),
        password_hash: hash_password(&payload.password)?,
        tenants: vec![],
    };
    state.storage.create_user(user)?;
    Ok(RestResponse::ok("User registered", vec![]))
}

async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<UserLogin>,
) -> Result<Json<LoginResponse>> {
    let username = payload.username.trim();
    let user = state
        .storage
        .get_user(username)?
        .ok_or(Error::Unauthorized)?;

    if !verify_password(&payload.password, &user.password_hash).unwrap_or(false) {
        tracing::warn!(username = %username, "failed login");
        return Err(Error::Unauthorized);
    }

    let token = state.tokens.create_jwt(&user.username)?;
    Ok(Json(LoginResponse { token }))
}

#[derive(Serialize, Deserialize)]
pub struct CreateTenantRest {
    pub id: String,
    pub name: String,
}

async fn create_tenant_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Json(payload): Json<CreateTenantRest>,
) -> Result<Json<RestResponse>> {
    if payload.id.trim().is_empty() || payload.name.trim().is_empty() {
        return Err(Error::validation("tenant id and name are required"));
    }
    let tenant = Tenant {
        id: payload.id.trim().to_string(),
        name: payload.name.trim().to_string(),
        owner_id: claims.sub.clone(),
    };
    state.storage.create_tenant(tenant.clone())?;
    Ok(RestResponse::ok("Tenant created", vec![tenant.id]))
}

async fn get_tenants_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
) -> Result<Json<RestResponse>> {
    let user = state
        .storage
        .get_user(&claims.sub)?
        .ok_or(Error::Unauthorized)?;
    Ok(RestResponse::ok("User tenants", user.tenants))
}

#[derive(Serialize, Deserialize)]
pub struct MemberRest {
    pub user_id: String,
    #[serde(default)]
    pub role_ids: Vec<String>,
    #[serde(default)]
    pub group_ids: Vec<String>,
}

async fn upsert_member_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Path(tenant_id): Path<String>,
    Json(payload): Json<MemberRest>,
) -> Result<Json<RestResponse>> {
    let tenant = state
        .storage
        .get_tenant(&tenant_id)?
        .ok_or_else(|| Error::not_found(format!("tenant {}", tenant_id)))?;
    if tenant.owner_id != claims.sub {
        return Err(Error::Forbidden("only the tenant owner manages members".to_string()));
    }
    state.storage.upsert_member(TenantMember {
        tenant_id,
        user_id: payload.user_id.clone(),
        role_ids: payload.role_ids,
        group_ids: payload.group_ids,
    })?;
    Ok(RestResponse::ok("Member saved", vec![payload.user_id]))
}

async fn list_members_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Path(tenant_id): Path<String>,
) -> Result<Json<Vec<TenantMember>>> {
    tenant_actor(&state, &claims, &tenant_id)?;
    Ok(Json(state.storage.list_members(&tenant_id)?))
}

async fn create_entity_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewEntity>,
) -> Result<Json<Entity>> {
    Ok(Json(state.storage.create_entity(payload)?))
}

async fn list_entities_handler(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Entity>>> {
    Ok(Json(state.storage.list_entities()?))
}

async fn get_entity_handler(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<Entity>> {
    Ok(Json(load_entity(&state, &slug)?))
}

/// Page of rows plus ready-made navigation links.
#[derive(Serialize, Deserialize, Debug)]
pub struct RowsResponse {
    pub rows: Vec<RowView>,
    pub pagination: PaginationResult,
    pub prev_url: Option<String>,
    pub next_url: Option<String>,
}

fn rows_response(
    storage: &Storage,
    entity: &Entity,
    tenant_id: Option<&str>,
    actor: Option<&Actor>,
    path: &str,
    query: Option<String>,
) -> Result<RowsResponse> {
    let pairs = parse_query(query.as_deref().unwrap_or_default());
    let filters = FilterRequest::from_query_pairs(entity, &pairs);
    let condition = build_condition(entity, &filters)?;
    let params = PaginationParams::from_query_pairs(&pairs);

    let page = storage.query_rows(entity, tenant_id, actor, condition.as_ref(), &params)?;
    let pagination = page.pagination;
    let prev_url = pagination
        .has_prev()
        .then(|| next_url(path, &pairs, &PaginationChange::Page(pagination.page - 1)));
    let next = pagination
        .has_next()
        .then(|| next_url(path, &pairs, &PaginationChange::Page(pagination.page + 1)));

    Ok(RowsResponse {
        rows: page.items,
        pagination,
        prev_url,
        next_url: next,
    })
}

async fn list_rows_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Path((tenant_id, slug)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Result<Json<RowsResponse>> {
    let actor = tenant_actor(&state, &claims, &tenant_id)?;
    let entity = load_entity(&state, &slug)?;
    let path = format!("/tenants/{}/entities/{}/rows", tenant_id, slug);
    Ok(Json(rows_response(
        &state.storage,
        &entity,
        Some(&tenant_id),
        Some(&actor),
        &path,
        query,
    )?))
}

async fn list_public_rows_handler(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Json<RowsResponse>> {
    let entity = load_entity(&state, &slug)?;
    let path = format!("/public/entities/{}/rows", slug);
    Ok(Json(rows_response(&state.storage, &entity, None, None, &path, query)?))
}

async fn create_row_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Path((tenant_id, slug)): Path<(String, String)>,
    Json(payload): Json<NewRow>,
) -> Result<Json<Row>> {
    let actor = tenant_actor(&state, &claims, &tenant_id)?;
    let entity = load_entity(&state, &slug)?;
    let row = state
        .storage
        .insert_row(&entity, Some(&tenant_id), &actor.user_id, payload)?;
    Ok(Json(row))
}

async fn get_row_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Path((tenant_id, slug, row_id)): Path<(String, String, String)>,
) -> Result<Json<RowView>> {
    let actor = tenant_actor(&state, &claims, &tenant_id)?;
    let entity = load_entity(&state, &slug)?;
    let (row, capabilities) = load_readable_row(&state, &entity, &tenant_id, &row_id, &actor)?;
    Ok(Json(RowView { row, capabilities }))
}

async fn update_row_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Path((tenant_id, slug, row_id)): Path<(String, String, String)>,
    Json(payload): Json<RowUpdate>,
) -> Result<Json<Row>> {
    let actor = tenant_actor(&state, &claims, &tenant_id)?;
    let entity = load_entity(&state, &slug)?;
    let (_, caps) = load_readable_row(&state, &entity, &tenant_id, &row_id, &actor)?;
    if !caps.can_update {
        return Err(Error::Forbidden("cannot update this row".to_string()));
    }
    Ok(Json(state.storage.update_row(&entity, &row_id, payload)?))
}

async fn delete_row_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Path((tenant_id, slug, row_id)): Path<(String, String, String)>,
) -> Result<Json<RestResponse>> {
    let actor = tenant_actor(&state, &claims, &tenant_id)?;
    let entity = load_entity(&state, &slug)?;
    let (_, caps) = load_readable_row(&state, &entity, &tenant_id, &row_id, &actor)?;
    if !caps.can_delete {
        return Err(Error::Forbidden("cannot delete this row".to_string()));
    }
    state.storage.delete_row(&entity, &row_id)?;
    Ok(RestResponse::ok(format!("Row {} deleted", row_id), vec![row_id]))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PermissionsResponse {
    pub visibility: Visibility,
    pub grants: Vec<RowPermission>,
    pub capabilities: Capabilities,
}

async fn get_permissions_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Path((tenant_id, slug, row_id)): Path<(String, String, String)>,
) -> Result<Json<PermissionsResponse>> {
    let actor = tenant_actor(&state, &claims, &tenant_id)?;
    let entity = load_entity(&state, &slug)?;
    let (row, capabilities) = load_readable_row(&state, &entity, &tenant_id, &row_id, &actor)?;
    Ok(Json(PermissionsResponse {
        visibility: row.visibility,
        grants: state.storage.get_grants(&row.id)?,
        capabilities,
    }))
}

async fn set_permissions_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Path((tenant_id, slug, row_id)): Path<(String, String, String)>,
    Json(payload): Json<ShareSettings>,
) -> Result<Json<PermissionsResponse>> {
    let actor = tenant_actor(&state, &claims, &tenant_id)?;
    let entity = load_entity(&state, &slug)?;
    let (row, caps) = load_readable_row(&state, &entity, &tenant_id, &row_id, &actor)?;
    if row.created_by != actor.user_id && !caps.can_update {
        return Err(Error::Forbidden("cannot change sharing of this row".to_string()));
    }

    let grants = state.storage.set_row_visibility(&entity, &row_id, &payload)?;
    Ok(Json(PermissionsResponse {
        visibility: payload.visibility,
        grants,
        capabilities: caps,
    }))
}

/// Health check handler
async fn health_handler() -> Json<RestResponse> {
    RestResponse::ok("rowkeeper REST API healthy", vec![])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GrantScope, PropertyType};
    use crate::permissions::GrantFlags;
    use crate::storage::NewProperty;
    use axum::body::Body;
    use serde::de::DeserializeOwned;
    use tempfile::TempDir;
    use tower::ServiceExt; // For .oneshot() testing

    fn app() -> (TempDir, Router) {
        let dir = tempfile::tempdir().expect("temp dir");
        let storage = Storage::open(dir.path()).expect("Storage for REST test");
        let router = create_router(storage, TokenIssuer::new("rest-test-secret-0123", 600));
        (dir, router)
    }

    async fn call<T: Serialize>(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<&T>,
    ) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().uri(uri).method(method);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.expect("request");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    fn json<T: DeserializeOwned>(bytes: &[u8]) -> T {
        serde_json::from_slice(bytes).expect("json body")
    }

    async fn login(app: &Router, username: &str) -> String {
        let creds = UserRegister {
            username: username.to_string(),
            password: "secret-pw".to_string(),
        };
        let (status, _) = call(app, "POST", "/register", None, Some(&creds)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(app, "POST", "/login", None, Some(&creds)).await;
        assert_eq!(status, StatusCode::OK);
        json::<LoginResponse>(&body).token
    }

    fn contacts_entity() -> NewEntity {
        NewEntity {
            name: "Contacts".to_string(),
            slug: "contacts".to_string(),
            properties: vec![
                NewProperty {
                    name: "email".to_string(),
                    title: None,
                    property_type: PropertyType::Text,
                    is_dynamic: false,
                    is_filterable: true,
                    is_required: true,
                    options: vec![],
                    parent_id: None,
                },
                NewProperty {
                    name: "status".to_string(),
                    title: None,
                    property_type: PropertyType::Select,
                    is_dynamic: true,
                    is_filterable: true,
                    is_required: false,
                    options: vec!["active".to_string(), "inactive".to_string()],
                    parent_id: None,
                },
            ],
            has_tags: true,
            has_comments: false,
            has_workflow: false,
        }
    }

    fn new_row(email: &str, status: &str) -> NewRow {
        NewRow {
            values: [
                ("email".to_string(), email.to_string()),
                ("status".to_string(), status.to_string()),
            ]
            .into_iter()
            .collect(),
            tags: vec![],
            share: None,
        }
    }

    #[tokio::test]
    async fn test_health_and_auth_required() {
        let (_dir, app) = app();
        let (status, body) = call::<()>(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json::<RestResponse>(&body).success);

        let (status, _) = call::<()>(&app, "GET", "/tenants", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = call::<()>(&app, "GET", "/tenants", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_login_trims_username_like_register() {
        let (_dir, app) = app();
        let padded = UserRegister {
            username: " carol ".to_string(),
            password: "secret-pw".to_string(),
        };
        let (status, _) = call(&app, "POST", "/register", None, Some(&padded)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&app, "POST", "/login", None, Some(&padded)).await;
        assert_eq!(status, StatusCode::OK);
        let plain = UserRegister {
            username: "carol".to_string(),
            password: "secret-pw".to_string(),
        };
        let (status, _) = call(&app, "POST", "/login", None, Some(&plain)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rows_filtering_sharing_and_public_listing() {
        let (_dir, app) = app();
        let alice = login(&app, "alice").await;
        let bob = login(&app, "bob").await;

        let tenant = CreateTenantRest { id: "acme".to_string(), name: "Acme".to_string() };
        let (status, _) = call(&app, "POST", "/tenants", Some(&alice), Some(&tenant)).await;
        assert_eq!(status, StatusCode::OK);
        let member = MemberRest {
            user_id: "bob".to_string(),
            role_ids: vec!["sales".to_string()],
            group_ids: vec![],
        };
        let (status, _) = call(&app, "POST", "/tenants/acme/members", Some(&alice), Some(&member)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&app, "POST", "/entities", Some(&alice), Some(&contacts_entity())).await;
        assert_eq!(status, StatusCode::OK);

        let rows_uri = "/tenants/acme/entities/contacts/rows";
        let mut ids = vec![];
        for (email, state) in [("ops@acme.io", "active"), ("ceo@acme.io", "inactive"), ("hr@acme.io", "active")] {
            let (status, body) = call(&app, "POST", rows_uri, Some(&alice), Some(&new_row(email, state))).await;
            assert_eq!(status, StatusCode::OK);
            ids.push(json::<Row>(&body).id);
        }

        let (status, body) = call::<()>(
            &app,
            "GET",
            &format!("{}?q=acme&status=active&pageSize=1", rows_uri),
            Some(&bob),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let page: RowsResponse = json(&body);
        assert_eq!(page.pagination.total_items, 2);
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.prev_url, None);
        assert_eq!(
            page.next_url.as_deref(),
            Some("/tenants/acme/entities/contacts/rows?q=acme&status=active&pageSize=1&page=2")
        );

        let (status, _) = call::<()>(&app, "GET", &format!("{}?nope=1&q=", rows_uri), Some(&bob), None).await;
        assert_eq!(status, StatusCode::OK);

        // bob only reads tenant rows; he may not update or reshare them
        let row_uri = format!("{}/{}", rows_uri, ids[0]);
        let update = RowUpdate {
            values: [("status".to_string(), "inactive".to_string())].into_iter().collect(),
            tags: None,
        };
        let (status, _) = call(&app, "PUT", &row_uri, Some(&bob), Some(&update)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let share_users = ShareSettings {
            visibility: Visibility::Users,
            targets: vec!["bob".to_string()],
            flags: GrantFlags { can_comment: true, can_update: true, can_delete: false },
        };
        let perms_uri = format!("{}/permissions", row_uri);
        let (status, _) = call(&app, "PUT", &perms_uri, Some(&bob), Some(&share_users)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) = call(&app, "PUT", &perms_uri, Some(&alice), Some(&share_users)).await;
        assert_eq!(status, StatusCode::OK);
        let perms: PermissionsResponse = json(&body);
        assert_eq!(perms.grants.len(), 1);
        assert_eq!(perms.grants[0].scope, GrantScope::User("bob".to_string()));

        let (status, _) = call(&app, "PUT", &row_uri, Some(&bob), Some(&update)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call::<()>(&app, "DELETE", &row_uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        // private rows disappear for everyone but the creator
        let private = ShareSettings {
            visibility: Visibility::Private,
            targets: vec![],
            flags: GrantFlags::default(),
        };
        let (status, _) = call(&app, "PUT", &perms_uri, Some(&alice), Some(&private)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call::<()>(&app, "GET", &row_uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // public rows are listed anonymously
        let public = ShareSettings {
            visibility: Visibility::Public,
            targets: vec![],
            flags: GrantFlags::default(),
        };
        let public_uri = format!("{}/{}/permissions", rows_uri, ids[2]);
        let (status, _) = call(&app, "PUT", &public_uri, Some(&alice), Some(&public)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call::<()>(&app, "GET", "/public/entities/contacts/rows", None, None).await;
        assert_eq!(status, StatusCode::OK);
        let listed: RowsResponse = json(&body);
        assert_eq!(listed.rows.len(), 1);
        assert_eq!(listed.rows[0].row.id, ids[2]);
        assert!(!listed.rows[0].capabilities.can_update);
    }

    #[tokio::test]
    async fn test_non_member_and_bad_filters() {
        let (_dir, app) = app();
        let alice = login(&app, "alice").await;
        let eve = login(&app, "eve").await;

        let tenant = CreateTenantRest { id: "acme".to_string(), name: "Acme".to_string() };
        call(&app, "POST", "/tenants", Some(&alice), Some(&tenant)).await;
        call(&app, "POST", "/entities", Some(&alice), Some(&contacts_entity())).await;

        let rows_uri = "/tenants/acme/entities/contacts/rows";
        let (status, _) = call::<()>(&app, "GET", rows_uri, Some(&eve), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let mut bad = new_row("x@acme.io", "active");
        bad.values.insert("phone".to_string(), "555".to_string());
        let (status, body) = call(&app, "POST", rows_uri, Some(&alice), Some(&bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json::<RestResponse>(&body).message.contains("unknown property"));

        let (status, _) = call::<()>(&app, "GET", "/tenants/acme/entities/missing/rows", Some(&alice), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
