//! Row filter conditions for dynamic entities.
//!
//! A list request carries a free-text query, per-property filter values and a
//! tag selection. `build_condition` turns them into a condition tree:
//!
//! ```text
//! AND( OR(query on each searchable property), AND(explicit filters), HAS_ANY_TAG(tags) )
//! ```
//!
//! Empty groups are left out. Each leaf targets either a native column or a
//! dynamic (EAV) property value, so the store knows where to look.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::models::{Entity, Property, Row};

/// Side table holding dynamic property values.
pub const DYNAMIC_VALUE_TABLE: &str = "row_values";

/// Query-string keys that never name a property.
pub const RESERVED_PARAMS: &[&str] = &["q", "tags", "page", "pageSize", "sortedBy"];

/// Where a condition leaf reads its value from.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldTarget {
    StaticColumn { name: String },
    DynamicProperty { property_id: String, value_table: String },
}

impl FieldTarget {
    pub fn for_property(property: &Property) -> Self {
        if property.is_dynamic {
            FieldTarget::DynamicProperty {
                property_id: property.id.clone(),
                value_table: DYNAMIC_VALUE_TABLE.to_string(),
            }
        } else {
            FieldTarget::StaticColumn {
                name: property.name.clone(),
            }
        }
    }

    fn read<'a>(&self, row: &'a Row) -> Option<&'a str> {
        match self {
            FieldTarget::StaticColumn { name } => row.columns.get(name).map(String::as_str),
            FieldTarget::DynamicProperty { property_id, .. } => row.dynamic_value(property_id),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    And { conditions: Vec<Condition> },
    Or { conditions: Vec<Condition> },
    Contains { target: FieldTarget, value: String },
    Equals { target: FieldTarget, value: String },
    HasAnyTag { values: Vec<String> },
}

impl Condition {
    pub fn and(conditions: Vec<Condition>) -> Self {
        Condition::And { conditions }
    }

    pub fn or(conditions: Vec<Condition>) -> Self {
        Condition::Or { conditions }
    }

    /// Evaluate the tree against a stored row.
    ///
    /// `Contains` is a case-insensitive substring match, `Equals` is exact.
    /// A missing value never matches.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Condition::And { conditions } => conditions.iter().all(|c| c.matches(row)),
            Condition::Or { conditions } => conditions.iter().any(|c| c.matches(row)),
            Condition::Contains { target, value } => target
                .read(row)
                .map(|v| v.to_lowercase().contains(&value.to_lowercase()))
                .unwrap_or(false),
            Condition::Equals { target, value } => {
                target.read(row).map(|v| v == value).unwrap_or(false)
            }
            Condition::HasAnyTag { values } => row.tags.iter().any(|t| values.contains(t)),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FilterSelection {
    pub property: String,
    pub value: String,
}

/// Filter state of one list request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub filters: Vec<FilterSelection>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl FilterRequest {
    /// Read filter state from query-string pairs.
    ///
    /// `q` is the free-text query, `tags` may repeat or be comma-separated,
    /// and any other key equal to one of the entity's property names becomes
    /// a filter. Unrelated keys are ignored.
    pub fn from_query_pairs(entity: &Entity, pairs: &[(String, String)]) -> Self {
        let mut request = FilterRequest::default();
        for (key, value) in pairs {
            match key.as_str() {
                "q" => {
                    if !value.trim().is_empty() {
                        request.query = Some(value.trim().to_string());
                    }
                }
                "tags" => request.tags.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_string),
                ),
                k if RESERVED_PARAMS.contains(&k) => {}
                k => {
                    if entity.property(k).is_some() {
                        request.filters.push(FilterSelection {
                            property: k.to_string(),
                            value: value.clone(),
                        });
                    }
                }
            }
        }
        let mut seen = HashSet::new();
        request.tags.retain(|t| seen.insert(t.clone()));
        request
    }
}

/// Build the composite condition for `request` against `entity`.
///
/// Returns `Ok(None)` when the request filters nothing. A filter naming a
/// property the entity lacks is a validation error; a filter on a property
/// that is not searchable is dropped.
pub fn build_condition(entity: &Entity, request: &FilterRequest) -> Result<Option<Condition>> {
    let mut groups = Vec::new();

    if let Some(query) = request.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let searches: Vec<Condition> = entity
            .properties
            .iter()
            .filter(|p| p.is_searchable())
            .map(|p| Condition::Contains {
                target: FieldTarget::for_property(p),
                value: query.to_string(),
            })
            .collect();
        if !searches.is_empty() {
            groups.push(Condition::or(searches));
        }
    }

    let mut filters = Vec::new();
    for selection in &request.filters {
        let property = entity.property(&selection.property).ok_or_else(|| {
            Error::validation(format!(
                "unknown property '{}' for entity '{}'",
                selection.property, entity.slug
            ))
        })?;
        if !property.is_searchable() || selection.value.trim().is_empty() {
            tracing::debug!(property = %property.name, "skipping non-searchable or blank filter");
            continue;
        }
        let target = FieldTarget::for_property(property);
        let value = selection.value.trim().to_string();
        filters.push(if property.is_dynamic {
            Condition::Equals { target, value }
        } else {
            Condition::Contains { target, value }
        });
    }
    if !filters.is_empty() {
        groups.push(Condition::and(filters));
    }

    if entity.has_tags && !request.tags.is_empty() {
        groups.push(Condition::HasAnyTag {
            values: request.tags.clone(),
        });
    }

    if groups.is_empty() {
        Ok(None)
    } else {
        Ok(Some(Condition::and(groups)))
    }
}
