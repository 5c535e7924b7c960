use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub username: String,
    pub password_hash: String,
    pub tenants: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub owner_id: String,
}

/// A user's membership in a tenant, with the roles and groups it carries there.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TenantMember {
    pub tenant_id: String,
    pub user_id: String,
    #[serde(default)]
    pub role_ids: Vec<String>,
    #[serde(default)]
    pub group_ids: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum PropertyType {
    Text,
    Number,
    Date,
    Select,
    Boolean,
    Entity,
    Media,
}

/// Field descriptor of an entity.
///
/// Dynamic properties live in the row's EAV value list, keyed by property id;
/// the rest are native columns keyed by name.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Property {
    pub id: String,
    pub name: String,
    pub title: String,
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
    /// Referenced entity id for `ENTITY` properties.
    #[serde(default)]
    pub parent_id: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Property {
    /// Only TEXT and SELECT properties take part in search and filtering.
    pub fn is_searchable(&self) -> bool {
        self.is_filterable
            && matches!(self.property_type, PropertyType::Text | PropertyType::Select)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub properties: Vec<Property>,
    #[serde(default)]
    pub has_tags: bool,
    #[serde(default)]
    pub has_comments: bool,
    #[serde(default)]
    pub has_workflow: bool,
    pub created_at: DateTime<Utc>,
}

impl Entity {
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PropertyValue {
    pub property_id: String,
    pub text_value: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Tenant,
    Roles,
    Groups,
    Users,
    Public,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Visibility::Private => "private",
            Visibility::Tenant => "tenant",
            Visibility::Roles => "roles",
            Visibility::Groups => "groups",
            Visibility::Users => "users",
            Visibility::Public => "public",
        };
        f.write_str(s)
    }
}

impl FromStr for Visibility {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Visibility::Private),
            "tenant" => Ok(Visibility::Tenant),
            "roles" => Ok(Visibility::Roles),
            "groups" => Ok(Visibility::Groups),
            "users" => Ok(Visibility::Users),
            "public" => Ok(Visibility::Public),
            other => Err(crate::error::Error::validation(format!(
                "invalid visibility: {}",
                other
            ))),
        }
    }
}

/// An instance of an entity.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Row {
    pub id: String,
    pub entity_id: String,
    /// None for global rows.
    pub tenant_id: Option<String>,
    pub folio: u64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub columns: BTreeMap<String, String>,
    #[serde(default)]
    pub values: Vec<PropertyValue>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Row {
    pub fn dynamic_value(&self, property_id: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.property_id == property_id)
            .map(|v| v.text_value.as_str())
    }

    /// Value of a property wherever it is stored.
    pub fn value_of<'a>(&'a self, property: &Property) -> Option<&'a str> {
        if property.is_dynamic {
            self.dynamic_value(&property.id)
        } else {
            self.columns.get(&property.name).map(String::as_str)
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum GrantScope {
    Tenant(String),
    Role(String),
    Group(String),
    User(String),
}

impl GrantScope {
    pub fn key(&self) -> String {
        match self {
            GrantScope::Tenant(id) => format!("tenant:{}", id),
            GrantScope::Role(id) => format!("role:{}", id),
            GrantScope::Group(id) => format!("group:{}", id),
            GrantScope::User(id) => format!("user:{}", id),
        }
    }
}

/// Access grant on a row (a row permission).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RowPermission {
    pub id: String,
    pub row_id: String,
    pub scope: GrantScope,
    pub can_comment: bool,
    pub can_update: bool,
    pub can_delete: bool,
}

/// The identity a request acts as. Anonymous requests carry no actor.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Actor {
    pub user_id: String,
    pub tenant_id: Option<String>,
    pub role_ids: Vec<String>,
    pub group_ids: Vec<String>,
}

impl Actor {
    pub fn for_member(member: &TenantMember) -> Self {
        Self {
            user_id: member.user_id.clone(),
            tenant_id: Some(member.tenant_id.clone()),
            role_ids: member.role_ids.clone(),
            group_ids: member.group_ids.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthPayload {
    pub sub: String, // username
    pub exp: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prop(name: &str, property_type: PropertyType) -> Property {
        Property {
            id: format!("p-{}", name),
            name: name.to_string(),
            title: name.to_string(),
            property_type,
            is_dynamic: false,
            is_filterable: true,
            is_required: false,
            options: vec![],
            parent_id: None,
        }
    }

    #[test]
    fn test_searchable_property_types() {
        assert!(prop("email", PropertyType::Text).is_searchable());
        assert!(prop("status", PropertyType::Select).is_searchable());
        assert!(!prop("owner", PropertyType::Entity).is_searchable());
        assert!(!prop("photo", PropertyType::Media).is_searchable());
        assert!(!prop("born", PropertyType::Date).is_searchable());

        let mut hidden = prop("notes", PropertyType::Text);
        hidden.is_filterable = false;
        assert!(!hidden.is_searchable());
    }

    #[test]
    fn test_visibility_parse_and_display() {
        for v in ["private", "tenant", "roles", "groups", "users", "public"] {
            let parsed: Visibility = v.parse().unwrap();
            assert_eq!(parsed.to_string(), v);
        }
        assert!("everyone".parse::<Visibility>().is_err());
    }

    #[test]
    fn test_property_json_shape() {
        let json = serde_json::json!({
            "id": "p1",
            "name": "status",
            "title": "Status",
            "type": "SELECT",
            "options": ["active", "inactive"]
        });
        let p: Property = serde_json::from_value(json).unwrap();
        assert_eq!(p.property_type, PropertyType::Select);
        assert!(p.is_filterable);
        assert!(!p.is_dynamic);
    }
}
