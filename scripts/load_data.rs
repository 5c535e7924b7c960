//! Seed script for rowkeeper
//!
//! Populates the store with:
//! - an `admin` user (password `admin123`) owning the `demo` tenant
//! - a `sales` member with the `sales` role and `emea` group
//! - a `contacts` entity mixing native and dynamic properties
//! - ten rows with varied visibility
//!
//! Run: cargo run --bin load_data

use std::collections::BTreeMap;

use rowkeeper::auth::hash_password;
use rowkeeper::config::Config;
use rowkeeper::error::Error;
use rowkeeper::filters::{build_condition, FilterRequest};
use rowkeeper::models::{Actor, PropertyType, Tenant, TenantMember, User, Visibility};
use rowkeeper::pagination::PaginationParams;
use rowkeeper::permissions::{GrantFlags, ShareSettings};
use rowkeeper::storage::{NewEntity, NewProperty, NewRow, Storage};

fn property(name: &str, property_type: PropertyType, is_dynamic: bool, options: &[&str]) -> NewProperty {
    NewProperty {
        name: name.to_string(),
        title: None,
        property_type,
        is_dynamic,
        is_filterable: true,
        is_required: false,
        options: options.iter().map(|o| o.to_string()).collect(),
        parent_id: None,
    }
}

/// Ignore "already exists" so the script can run twice.
fn tolerate_conflict<T>(result: Result<T, Error>) -> Result<(), Error> {
    match result {
        Ok(_) | Err(Error::Conflict(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    let _log_guard = rowkeeper::logging::init(&config);
    let storage = Storage::open(&config.data_dir)?;

    for name in ["admin", "sales"] {
        tolerate_conflict(storage.create_user(User {
            username: name.to_string(),
            password_hash: hash_password(&format!("{}123", name))?,
            tenants: vec![],
        }))?;
    }

    tolerate_conflict(storage.create_tenant(Tenant {
        id: "demo".to_string(),
        name: "Demo Tenant".to_string(),
        owner_id: "admin".to_string(),
    }))?;
    let sales = TenantMember {
        tenant_id: "demo".to_string(),
        user_id: "sales".to_string(),
        role_ids: vec!["sales".to_string()],
        group_ids: vec!["emea".to_string()],
    };
    storage.upsert_member(sales.clone())?;

    let entity = match storage.get_entity("contacts")? {
        Some(entity) => entity,
        None => storage.create_entity(NewEntity {
            name: "Contacts".to_string(),
            slug: "contacts".to_string(),
            properties: vec![
                property("name", PropertyType::Text, false, &[]),
                property("email", PropertyType::Text, false, &[]),
                property("status", PropertyType::Select, true, &["lead", "active", "churned"]),
                property("score", PropertyType::Number, true, &[]),
            ],
            has_tags: true,
            has_comments: true,
            has_workflow: false,
        })?,
    };

    let visibilities = [
        (Visibility::Tenant, vec![]),
        (Visibility::Private, vec![]),
        (Visibility::Roles, vec!["sales".to_string()]),
        (Visibility::Groups, vec!["emea".to_string()]),
        (Visibility::Public, vec![]),
    ];
    for i in 0..10 {
        let (visibility, targets) = visibilities[i % visibilities.len()].clone();
        let values: BTreeMap<String, String> = [
            ("name", format!("Contact {}", i)),
            ("email", format!("contact{}@{}.io", i, if i % 2 == 0 { "acme" } else { "globex" })),
            ("status", ["lead", "active", "churned"][i % 3].to_string()),
            ("score", (i * 10).to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        storage.insert_row(
            &entity,
            Some("demo"),
            "admin",
            NewRow {
                values,
                tags: vec![if i % 2 == 0 { "vip" } else { "newsletter" }.to_string()],
                share: Some(ShareSettings {
                    visibility,
                    targets,
                    flags: GrantFlags {
                        can_comment: true,
                        can_update: i % 3 == 0,
                        can_delete: false,
                    },
                }),
            },
        )?;
    }
    storage.flush()?;
    println!("✅ Loaded 10 contacts into tenant 'demo'");

    // Demo: what the sales member sees when searching for "acme"
    let actor = Actor::for_member(&sales);
    let request = FilterRequest {
        query: Some("acme".to_string()),
        ..Default::default()
    };
    let condition = build_condition(&entity, &request)?;
    let page = storage.query_rows(
        &entity,
        Some("demo"),
        Some(&actor),
        condition.as_ref(),
        &PaginationParams::default(),
    )?;
    println!(
        "✅ 'sales' sees {} of the acme contacts (page {}/{})",
        page.pagination.total_items, page.pagination.page, page.pagination.total_pages
    );

    Ok(())
}
