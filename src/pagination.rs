//! Page and sort state read from the request's query string, plus the pure
//! URL arithmetic list views use for navigation links.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use url::form_urlencoded;

use crate::models::{Entity, PropertyType, Row};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SortedBy {
    pub name: String,
    pub direction: SortDirection,
}

impl SortedBy {
    /// `name` sorts ascending, `-name` descending.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (name, direction) = match raw.strip_prefix('-') {
            Some(rest) => (rest, SortDirection::Desc),
            None => (raw, SortDirection::Asc),
        };
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            direction,
        })
    }

    pub fn to_param(&self) -> String {
        match self.direction {
            SortDirection::Asc => self.name.clone(),
            SortDirection::Desc => format!("-{}", self.name),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PaginationParams {
    pub page: u32,
    pub page_size: u32,
    pub sorted_by: Vec<SortedBy>,
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sorted_by: Vec::new(),
        }
    }
}

impl PaginationParams {
    /// Read `page`, `pageSize` and `sortedBy` from query pairs.
    ///
    /// Unparseable values fall back to the defaults rather than failing.
    pub fn from_query_pairs(pairs: &[(String, String)]) -> Self {
        let mut params = Self::default();
        for (key, value) in pairs {
            match key.as_str() {
                "page" => {
                    params.page = value.trim().parse::<u32>().unwrap_or(1).max(1);
                }
                "pageSize" => {
                    params.page_size = value
                        .trim()
                        .parse::<u32>()
                        .unwrap_or(DEFAULT_PAGE_SIZE)
                        .clamp(1, MAX_PAGE_SIZE);
                }
                "sortedBy" => {
                    params.sorted_by = value.split(',').filter_map(SortedBy::parse).collect();
                }
                _ => {}
            }
        }
        params
    }

    pub fn skip(&self) -> usize {
        (self.page.saturating_sub(1) as usize) * self.page_size as usize
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PaginationResult {
    pub page: u32,
    pub page_size: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

impl PaginationResult {
    pub fn new(params: &PaginationParams, total_items: u64) -> Self {
        let size = u64::from(params.page_size.max(1));
        let total_pages = total_items.div_ceil(size).max(1) as u32;
        Self {
            page: params.page,
            page_size: params.page_size,
            total_items,
            total_pages,
        }
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: PaginationResult,
}

/// Slice an already ordered list down to the requested page.
pub fn paginate<T>(items: Vec<T>, params: &PaginationParams) -> Page<T> {
    let pagination = PaginationResult::new(params, items.len() as u64);
    let items = items
        .into_iter()
        .skip(params.skip())
        .take(params.page_size as usize)
        .collect();
    Page { items, pagination }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaginationChange {
    Page(u32),
    /// Replaces the sort keys; an empty list clears sorting.
    Sort(Vec<SortedBy>),
}

pub fn parse_query(query: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
        .into_owned()
        .collect()
}

/// Compute the URL a list view navigates to after a page or sort change.
///
/// Every other parameter is kept in order. A sort change resets the page.
/// Page 1 and an empty sort are expressed by leaving the parameter out.
pub fn next_url(path: &str, pairs: &[(String, String)], change: &PaginationChange) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    let mut sorted_by = None;

    for (key, value) in pairs {
        match key.as_str() {
            "page" => {}
            "sortedBy" => sorted_by = Some(value.clone()),
            _ => {
                serializer.append_pair(key, value);
            }
        }
    }

    let page = match change {
        PaginationChange::Page(n) => (*n > 1).then(|| n.to_string()),
        PaginationChange::Sort(keys) => {
            sorted_by = (!keys.is_empty()).then(|| {
                keys.iter().map(SortedBy::to_param).collect::<Vec<_>>().join(",")
            });
            None
        }
    };

    if let Some(sorted_by) = sorted_by {
        serializer.append_pair("sortedBy", &sorted_by);
    }
    if let Some(page) = page {
        serializer.append_pair("page", &page);
    }

    let query = serializer.finish();
    if query.is_empty() {
        path.to_string()
    } else {
        format!("{}?{}", path, query)
    }
}

fn compare_by(a: &Row, b: &Row, entity: &Entity, key: &SortedBy) -> Ordering {
    let ordering = match key.name.as_str() {
        "folio" => a.folio.cmp(&b.folio),
        "createdAt" => a.created_at.cmp(&b.created_at),
        "updatedAt" => a.updated_at.cmp(&b.updated_at),
        name => match entity.property(name) {
            Some(property) => {
                let (va, vb) = (a.value_of(property), b.value_of(property));
                if property.property_type == PropertyType::Number {
                    let na = va.and_then(|v| v.trim().parse::<f64>().ok());
                    let nb = vb.and_then(|v| v.trim().parse::<f64>().ok());
                    na.partial_cmp(&nb).unwrap_or(Ordering::Equal)
                } else {
                    va.cmp(&vb)
                }
            }
            None => Ordering::Equal,
        },
    };
    match key.direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}

/// Order rows by the requested keys; ties and the unsorted case use folio.
pub fn sort_rows(rows: &mut [Row], entity: &Entity, sorted_by: &[SortedBy]) {
    rows.sort_by(|a, b| {
        sorted_by
            .iter()
            .map(|key| compare_by(a, b, entity, key))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| a.folio.cmp(&b.folio))
    });
}
