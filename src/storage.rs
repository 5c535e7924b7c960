use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionError};
use sled::{Db, Transactional};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::filters::{Condition, RESERVED_PARAMS};
use crate::models::{
    Actor, Entity, Property, PropertyType, PropertyValue, Row, RowPermission, Tenant,
    TenantMember, User, Visibility,
};
use crate::pagination::{paginate, sort_rows, Page, PaginationParams};
use crate::permissions::{self, Capabilities, ShareSettings};

/// Sort keys every row has, so properties may not take these names.
const BUILTIN_FIELDS: &[&str] = &["folio", "createdAt", "updatedAt"];

/// Property definition as submitted by an administrator.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewProperty {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    #[serde(default)]
    pub is_dynamic: bool,
    #[serde(default = "default_true")]
    pub is_filterable: bool,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewEntity {
    pub name: String,
    pub slug: String,
    pub properties: Vec<NewProperty>,
    #[serde(default)]
    pub has_tags: bool,
    #[serde(default)]
    pub has_comments: bool,
    #[serde(default)]
    pub has_workflow: bool,
}

/// Row values keyed by property name.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct NewRow {
    #[serde(default)]
    pub values: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Initial sharing; defaults to the row's tenant, or private for global rows.
    #[serde(default)]
    pub share: Option<ShareSettings>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RowUpdate {
    /// Merged into the current values; an empty string clears a value.
    #[serde(default)]
    pub values: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// A row together with what the requesting actor may do with it.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RowView {
    #[serde(flatten)]
    pub row: Row,
    pub capabilities: Capabilities,
}

#[derive(Clone)]
pub struct Storage {
    db: Db,
    users_tree: sled::Tree,
    tenants_tree: sled::Tree,
    members_tree: sled::Tree, // "{tenant}/{user}"
    entities_tree: sled::Tree, // keyed by slug
    rows_tree: sled::Tree,    // "{entity_id}/{row_id}"
    grants_tree: sled::Tree,  // row_id -> full grant set
    counters_tree: sled::Tree,
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn from_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

fn abort(e: impl Into<Error>) -> ConflictableTransactionError<Error> {
    ConflictableTransactionError::Abort(e.into())
}

fn unwrap_tx<T>(result: std::result::Result<T, TransactionError<Error>>) -> Result<T> {
    result.map_err(|e| match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => Error::Storage(e),
    })
}

fn row_key(entity_id: &str, row_id: &str) -> String {
    format!("{}/{}", entity_id, row_id)
}

fn member_key(tenant_id: &str, user_id: &str) -> String {
    format!("{}/{}", tenant_id, user_id)
}

fn increment(old: Option<&[u8]>) -> Option<Vec<u8>> {
    let next = match old {
        Some(bytes) => {
            let buf: [u8; 8] = bytes.try_into().unwrap_or([0; 8]);
            u64::from_be_bytes(buf) + 1
        }
        None => 1,
    };
    Some(next.to_be_bytes().to_vec())
}

fn valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn valid_property_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Storage {
    /// Open or create the Sled database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self {
            users_tree: db.open_tree("users")?,
            tenants_tree: db.open_tree("tenants")?,
            members_tree: db.open_tree("members")?,
            entities_tree: db.open_tree("entities")?,
            rows_tree: db.open_tree("rows")?,
            grants_tree: db.open_tree("grants")?,
            counters_tree: db.open_tree("counters")?,
            db,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    // --- Users ---

    pub fn create_user(&self, user: User) -> Result<()> {
        let swapped = self.users_tree.compare_and_swap(
            user.username.as_bytes(),
            None as Option<&[u8]>,
            Some(to_json(&user)?),
        )?;
        if swapped.is_err() {
            return Err(Error::Conflict(format!("user {}", user.username)));
        }
        tracing::info!(username = %user.username, "user created");
        Ok(())
    }

    pub fn get_user(&self, username: &str) -> Result<Option<User>> {
        self.users_tree
            .get(username.as_bytes())?
            .map(|bytes| from_json(&bytes))
            .transpose()
    }

    // --- Tenants & membership ---

    /// Create a tenant and make its owner a member with the `owner` role.
    pub fn create_tenant(&self, tenant: Tenant) -> Result<TenantMember> {
        let owner = TenantMember {
            tenant_id: tenant.id.clone(),
            user_id: tenant.owner_id.clone(),
            role_ids: vec!["owner".to_string()],
            group_ids: vec![],
        };

        let tx = (&self.users_tree, &self.tenants_tree, &self.members_tree).transaction(
            |(users, tenants, members)| -> ConflictableTransactionResult<(), Error> {
                if tenants.get(tenant.id.as_bytes())?.is_some() {
                    return Err(abort(Error::Conflict(format!("tenant {}", tenant.id))));
                }
                let user_bytes = users
                    .get(tenant.owner_id.as_bytes())?
                    .ok_or_else(|| abort(Error::not_found(format!("user {}", tenant.owner_id))))?;
                let mut user: User = from_json(&user_bytes).map_err(abort)?;
                if !user.tenants.contains(&tenant.id) {
                    user.tenants.push(tenant.id.clone());
                }

                tenants.insert(tenant.id.as_bytes(), to_json(&tenant).map_err(abort)?)?;
                members.insert(
                    member_key(&owner.tenant_id, &owner.user_id).as_bytes(),
                    to_json(&owner).map_err(abort)?,
                )?;
                users.insert(user.username.as_bytes(), to_json(&user).map_err(abort)?)?;
                Ok(())
            },
        );
        unwrap_tx(tx)?;

        tracing::info!(tenant = %tenant.id, owner = %tenant.owner_id, "tenant created");
        Ok(owner)
    }

    pub fn get_tenant(&self, id: &str) -> Result<Option<Tenant>> {
        self.tenants_tree
            .get(id.as_bytes())?
            .map(|bytes| from_json(&bytes))
            .transpose()
    }

    /// Add or replace a membership; the user must exist.
    pub fn upsert_member(&self, member: TenantMember) -> Result<()> {
        if self.get_tenant(&member.tenant_id)?.is_none() {
            return Err(Error::not_found(format!("tenant {}", member.tenant_id)));
        }

        let tx = (&self.users_tree, &self.members_tree).transaction(
            |(users, members)| -> ConflictableTransactionResult<(), Error> {
                let user_bytes = users
                    .get(member.user_id.as_bytes())?
                    .ok_or_else(|| abort(Error::not_found(format!("user {}", member.user_id))))?;
                let mut user: User = from_json(&user_bytes).map_err(abort)?;
                if !user.tenants.contains(&member.tenant_id) {
                    user.tenants.push(member.tenant_id.clone());
                    users.insert(user.username.as_bytes(), to_json(&user).map_err(abort)?)?;
                }
                members.insert(
                    member_key(&member.tenant_id, &member.user_id).as_bytes(),
                    to_json(&member).map_err(abort)?,
                )?;
                Ok(())
            },
        );
        unwrap_tx(tx)?;

        tracing::info!(tenant = %member.tenant_id, user = %member.user_id, "member saved");
        Ok(())
    }

    pub fn get_member(&self, tenant_id: &str, user_id: &str) -> Result<Option<TenantMember>> {
        self.members_tree
            .get(member_key(tenant_id, user_id).as_bytes())?
            .map(|bytes| from_json(&bytes))
            .transpose()
    }

    pub fn list_members(&self, tenant_id: &str) -> Result<Vec<TenantMember>> {
        let prefix = format!("{}/", tenant_id);
        let mut members = vec![];
        for item in self.members_tree.scan_prefix(prefix.as_bytes()) {
            let (_, v) = item?;
            members.push(from_json(&v)?);
        }
        Ok(members)
    }

    // --- Entities ---

    pub fn create_entity(&self, input: NewEntity) -> Result<Entity> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(Error::validation("entity name is required"));
        }
        if !valid_slug(&input.slug) {
            return Err(Error::validation(format!("invalid slug: '{}'", input.slug)));
        }

        let mut seen = HashSet::new();
        let mut properties = Vec::with_capacity(input.properties.len());
        for p in input.properties {
            if !valid_property_name(&p.name) {
                return Err(Error::validation(format!("invalid property name: '{}'", p.name)));
            }
            if RESERVED_PARAMS.contains(&p.name.as_str()) || BUILTIN_FIELDS.contains(&p.name.as_str()) {
                return Err(Error::validation(format!("property name '{}' is reserved", p.name)));
            }
            if !seen.insert(p.name.clone()) {
                return Err(Error::validation(format!("duplicate property: '{}'", p.name)));
            }
            match p.property_type {
                PropertyType::Select if p.options.is_empty() => {
                    return Err(Error::validation(format!(
                        "select property '{}' needs options",
                        p.name
                    )));
                }
                PropertyType::Entity => {
                    let parent = p.parent_id.as_deref().ok_or_else(|| {
                        Error::validation(format!("entity property '{}' needs a parent", p.name))
                    })?;
                    if self.get_entity_by_id(parent)?.is_none() {
                        return Err(Error::validation(format!(
                            "entity property '{}' references unknown entity '{}'",
                            p.name, parent
                        )));
                    }
                }
                _ => {}
            }
            properties.push(Property {
                id: Uuid::new_v4().to_string(),
                title: p.title.unwrap_or_else(|| p.name.clone()),
                name: p.name,
                property_type: p.property_type,
                is_dynamic: p.is_dynamic,
                is_filterable: p.is_filterable,
                is_required: p.is_required,
                options: p.options,
                parent_id: p.parent_id,
            });
        }

        let entity = Entity {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            slug: input.slug,
            properties,
            has_tags: input.has_tags,
            has_comments: input.has_comments,
            has_workflow: input.has_workflow,
            created_at: Utc::now(),
        };

        let swapped = self.entities_tree.compare_and_swap(
            entity.slug.as_bytes(),
            None as Option<&[u8]>,
            Some(to_json(&entity)?),
        )?;
        if swapped.is_err() {
            return Err(Error::Conflict(format!("entity {}", entity.slug)));
        }
        tracing::info!(slug = %entity.slug, properties = entity.properties.len(), "entity created");
        Ok(entity)
    }

    pub fn get_entity(&self, slug: &str) -> Result<Option<Entity>> {
        self.entities_tree
            .get(slug.as_bytes())?
            .map(|bytes| from_json(&bytes))
            .transpose()
    }

    pub fn get_entity_by_id(&self, id: &str) -> Result<Option<Entity>> {
        Ok(self.list_entities()?.into_iter().find(|e| e.id == id))
    }

    pub fn list_entities(&self) -> Result<Vec<Entity>> {
        let mut entities = vec![];
        for item in self.entities_tree.iter() {
            let (_, v) = item?;
            entities.push(from_json(&v)?);
        }
        Ok(entities)
    }

    // --- Rows ---

    /// Check submitted values against the entity: known properties, select
    /// options, numeric and boolean formats, and entity references.
    fn validate_values(&self, entity: &Entity, values: &BTreeMap<String, String>) -> Result<()> {
        for (name, value) in values {
            let property = entity.property(name).ok_or_else(|| {
                Error::validation(format!("unknown property '{}' for entity '{}'", name, entity.slug))
            })?;
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match property.property_type {
                PropertyType::Select if !property.options.iter().any(|o| o == value) => {
                    return Err(Error::validation(format!(
                        "'{}' is not an option of '{}'",
                        value, name
                    )));
                }
                PropertyType::Number if value.parse::<f64>().is_err() => {
                    return Err(Error::validation(format!("'{}' must be a number", name)));
                }
                PropertyType::Boolean if value != "true" && value != "false" => {
                    return Err(Error::validation(format!("'{}' must be true or false", name)));
                }
                PropertyType::Entity => {
                    let parent = property.parent_id.as_deref().unwrap_or_default();
                    if self.rows_tree.get(row_key(parent, value).as_bytes())?.is_none() {
                        return Err(Error::validation(format!(
                            "'{}' references unknown row '{}'",
                            name, value
                        )));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Merge already validated values into the row's native columns and
    /// dynamic values, then check required properties.
    fn merge_values(entity: &Entity, row: &mut Row, values: &BTreeMap<String, String>) -> Result<()> {
        for (name, value) in values {
            let property = entity.property(name).ok_or_else(|| {
                Error::validation(format!("unknown property '{}' for entity '{}'", name, entity.slug))
            })?;
            let value = value.trim();
            if property.is_dynamic {
                row.values.retain(|v| v.property_id != property.id);
                if !value.is_empty() {
                    row.values.push(PropertyValue {
                        property_id: property.id.clone(),
                        text_value: value.to_string(),
                    });
                }
            } else if value.is_empty() {
                row.columns.remove(name);
            } else {
                row.columns.insert(name.clone(), value.to_string());
            }
        }

        for property in entity.properties.iter().filter(|p| p.is_required) {
            if row.value_of(property).is_none() {
                return Err(Error::validation(format!("'{}' is required", property.name)));
            }
        }
        Ok(())
    }

    fn check_tags(entity: &Entity, tags: &[String]) -> Result<Vec<String>> {
        if !tags.is_empty() && !entity.has_tags {
            return Err(Error::validation(format!("entity '{}' has no tags", entity.slug)));
        }
        let mut cleaned: Vec<String> = tags
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        cleaned.sort();
        cleaned.dedup();
        Ok(cleaned)
    }

    /// Insert a row and its initial grants together.
    pub fn insert_row(
        &self,
        entity: &Entity,
        tenant_id: Option<&str>,
        created_by: &str,
        input: NewRow,
    ) -> Result<Row> {
        let now = Utc::now();
        let mut row = Row {
            id: Uuid::new_v4().to_string(),
            entity_id: entity.id.clone(),
            tenant_id: tenant_id.map(str::to_string),
            folio: 0,
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
            visibility: Visibility::Private,
            columns: BTreeMap::new(),
            values: vec![],
            tags: Self::check_tags(entity, &input.tags)?,
        };
        self.validate_values(entity, &input.values)?;
        Self::merge_values(entity, &mut row, &input.values)?;

        let share = input.share.unwrap_or_else(|| ShareSettings {
            visibility: if tenant_id.is_some() {
                Visibility::Tenant
            } else {
                Visibility::Private
            },
            targets: vec![],
            flags: Default::default(),
        });
        row.visibility = share.visibility;
        let grants = permissions::grants_for(&row, &share)?;

        let folio = self
            .counters_tree
            .update_and_fetch(format!("folio/{}", entity.id).as_bytes(), increment)?
            .and_then(|v| <[u8; 8]>::try_from(&v[..]).ok())
            .map(u64::from_be_bytes)
            .unwrap_or(1);
        row.folio = folio;

        let key = row_key(&entity.id, &row.id);
        let row_bytes = to_json(&row)?;
        let grant_bytes = to_json(&grants)?;
        let tx = (&self.rows_tree, &self.grants_tree).transaction(
            |(rows, grants_tx)| -> ConflictableTransactionResult<(), Error> {
                rows.insert(key.as_bytes(), row_bytes.clone())?;
                grants_tx.insert(row.id.as_bytes(), grant_bytes.clone())?;
                Ok(())
            },
        );
        unwrap_tx(tx)?;

        tracing::info!(entity = %entity.slug, row = %row.id, folio, "row created");
        Ok(row)
    }

    pub fn get_row(&self, entity: &Entity, row_id: &str) -> Result<Option<Row>> {
        self.rows_tree
            .get(row_key(&entity.id, row_id).as_bytes())?
            .map(|bytes| from_json(&bytes))
            .transpose()
    }

    pub fn list_rows(&self, entity: &Entity) -> Result<Vec<Row>> {
        let prefix = format!("{}/", entity.id);
        let mut rows = vec![];
        for item in self.rows_tree.scan_prefix(prefix.as_bytes()) {
            let (_, v) = item?;
            rows.push(from_json(&v)?);
        }
        Ok(rows)
    }

    /// Merge new values and tags into the stored row.
    ///
    /// The read-modify-write runs in a transaction on the rows tree, which
    /// conflicts with sharing changes and deletes; only values, tags and
    /// `updated_at` are written back.
    pub fn update_row(&self, entity: &Entity, row_id: &str, update: RowUpdate) -> Result<Row> {
        self.validate_values(entity, &update.values)?;
        let tags = update
            .tags
            .as_deref()
            .map(|tags| Self::check_tags(entity, tags))
            .transpose()?;

        let key = row_key(&entity.id, row_id);
        let tx = self.rows_tree.transaction(
            |rows| -> ConflictableTransactionResult<Row, Error> {
                let bytes = rows
                    .get(key.as_bytes())?
                    .ok_or_else(|| abort(Error::not_found(format!("row {}", row_id))))?;
                let mut row: Row = from_json(&bytes).map_err(abort)?;
                Self::merge_values(entity, &mut row, &update.values).map_err(abort)?;
                if let Some(tags) = &tags {
                    row.tags = tags.clone();
                }
                row.updated_at = Utc::now();
                rows.insert(key.as_bytes(), to_json(&row).map_err(abort)?)?;
                Ok(row)
            },
        );
        let row = unwrap_tx(tx)?;

        tracing::info!(entity = %entity.slug, row = %row.id, "row updated");
        Ok(row)
    }

    /// Remove a row and every grant on it.
    pub fn delete_row(&self, entity: &Entity, row_id: &str) -> Result<()> {
        let key = row_key(&entity.id, row_id);
        let tx = (&self.rows_tree, &self.grants_tree).transaction(
            |(rows, grants)| -> ConflictableTransactionResult<(), Error> {
                if rows.remove(key.as_bytes())?.is_none() {
                    return Err(abort(Error::not_found(format!("row {}", row_id))));
                }
                grants.remove(row_id.as_bytes())?;
                Ok(())
            },
        );
        unwrap_tx(tx)?;
        tracing::info!(entity = %entity.slug, row = %row_id, "row deleted");
        Ok(())
    }

    pub fn get_grants(&self, row_id: &str) -> Result<Vec<RowPermission>> {
        match self.grants_tree.get(row_id.as_bytes())? {
            Some(bytes) => from_json(&bytes),
            None => Ok(vec![]),
        }
    }

    /// What `actor` may do with `row`, reading its current grants.
    pub fn capabilities(&self, row: &Row, actor: Option<&Actor>) -> Result<Capabilities> {
        let grants = self.get_grants(&row.id)?;
        Ok(permissions::resolve(row, &grants, actor))
    }

    /// Replace a row's sharing: new visibility and the full grant set are
    /// written in one transaction, so readers never see a partial set.
    pub fn set_row_visibility(
        &self,
        entity: &Entity,
        row_id: &str,
        settings: &ShareSettings,
    ) -> Result<Vec<RowPermission>> {
        let key = row_key(&entity.id, row_id);
        let tx = (&self.rows_tree, &self.grants_tree).transaction(
            |(rows, grants)| -> ConflictableTransactionResult<Vec<RowPermission>, Error> {
                let bytes = rows
                    .get(key.as_bytes())?
                    .ok_or_else(|| abort(Error::not_found(format!("row {}", row_id))))?;
                let mut row: Row = from_json(&bytes).map_err(abort)?;
                let new_grants = permissions::grants_for(&row, settings).map_err(abort)?;

                row.visibility = settings.visibility;
                row.updated_at = Utc::now();
                rows.insert(key.as_bytes(), to_json(&row).map_err(abort)?)?;
                grants.remove(row_id.as_bytes())?;
                grants.insert(row_id.as_bytes(), to_json(&new_grants).map_err(abort)?)?;
                Ok(new_grants)
            },
        );
        let grants = unwrap_tx(tx)?;

        tracing::info!(
            entity = %entity.slug,
            row = %row_id,
            visibility = %settings.visibility,
            grants = grants.len(),
            "row sharing replaced"
        );
        Ok(grants)
    }

    /// List the rows of `entity` visible to `actor`, filtered, sorted and paged.
    ///
    /// With a tenant, rows of that tenant and global rows are considered;
    /// without one (anonymous listing) every row is, and only public ones survive
    /// the permission check.
    pub fn query_rows(
        &self,
        entity: &Entity,
        tenant_id: Option<&str>,
        actor: Option<&Actor>,
        condition: Option<&Condition>,
        params: &PaginationParams,
    ) -> Result<Page<RowView>> {
        let mut rows: Vec<(Row, Capabilities)> = Vec::new();
        for row in self.list_rows(entity)? {
            if let Some(tenant) = tenant_id {
                if row.tenant_id.as_deref().is_some_and(|t| t != tenant) {
                    continue;
                }
            }
            if condition.is_some_and(|c| !c.matches(&row)) {
                continue;
            }
            let caps = self.capabilities(&row, actor)?;
            if caps.can_read {
                rows.push((row, caps));
            }
        }

        let mut ordered: Vec<Row> = rows.iter().map(|(r, _)| r.clone()).collect();
        sort_rows(&mut ordered, entity, &params.sorted_by);
        let caps_by_id: BTreeMap<String, Capabilities> =
            rows.into_iter().map(|(r, c)| (r.id, c)).collect();

        let views = ordered
            .into_iter()
            .map(|row| {
                let capabilities = caps_by_id.get(&row.id).copied().unwrap_or_default();
                RowView { row, capabilities }
            })
            .collect();

        tracing::debug!(entity = %entity.slug, tenant = ?tenant_id, "rows queried");
        Ok(paginate(views, params))
    }
}
