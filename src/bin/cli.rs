use clap::{Parser, Subcommand};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;

const TOKEN_FILE: &str = ".rowkeeper_token";

#[derive(Parser)]
#[command(name = "rowkeeper-cli")]
#[command(about = "CLI for rowkeeper", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, default_value = "http://localhost:11111")]
    url: String,
}

#[derive(Subcommand)]
enum Commands {
    Register {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    Logout,
    CreateTenant {
        #[arg(short, long)]
        id: String,
        #[arg(short, long)]
        name: String,
    },
    Tenants,
    Health,
    Members {
        #[arg(short = 't', long)]
        tenant_id: String,
    },
    AddMember {
        #[arg(short = 't', long)]
        tenant_id: String,
        #[arg(short, long)]
        user: String,
        #[arg(short, long, value_delimiter = ',')]
        roles: Vec<String>,
        #[arg(short, long, value_delimiter = ',')]
        groups: Vec<String>,
    },
    /// Create an entity from a JSON definition file
    CreateEntity {
        #[arg(short, long)]
        file: String,
    },
    Entities,
    Entity {
        #[arg(short, long)]
        slug: String,
    },
    Insert {
        #[arg(short = 't', long)]
        tenant_id: String,
        #[arg(short, long)]
        entity: String,
        /// property=value, repeatable
        #[arg(short = 'v', long = "value", value_parser = parse_key_value)]
        values: Vec<(String, String)>,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
    Update {
        #[arg(short = 't', long)]
        tenant_id: String,
        #[arg(short, long)]
        entity: String,
        #[arg(short, long)]
        id: String,
        #[arg(short = 'v', long = "value", value_parser = parse_key_value)]
        values: Vec<(String, String)>,
    },
    GetRow {
        #[arg(short = 't', long)]
        tenant_id: String,
        #[arg(short, long)]
        entity: String,
        #[arg(short, long)]
        id: String,
    },
    /// List rows; extra filters go through --param (e.g. status=active)
    ListRows {
        #[arg(short = 't', long)]
        tenant_id: String,
        #[arg(short, long)]
        entity: String,
        #[arg(short, long)]
        query: Option<String>,
        #[arg(long, value_parser = parse_key_value)]
        param: Vec<(String, String)>,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        sorted_by: Option<String>,
    },
    /// List public rows without logging in
    PublicRows {
        #[arg(short, long)]
        entity: String,
        #[arg(short, long)]
        query: Option<String>,
        #[arg(long, value_parser = parse_key_value)]
        param: Vec<(String, String)>,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        sorted_by: Option<String>,
    },
    DeleteRow {
        #[arg(short = 't', long)]
        tenant_id: String,
        #[arg(short, long)]
        entity: String,
        #[arg(short, long)]
        id: String,
    },
    Share {
        #[arg(short = 't', long)]
        tenant_id: String,
        #[arg(short, long)]
        entity: String,
        #[arg(short, long)]
        id: String,
        /// private | tenant | roles | groups | users | public
        #[arg(long)]
        visibility: String,
        #[arg(long, value_delimiter = ',')]
        targets: Vec<String>,
        #[arg(long)]
        can_comment: bool,
        #[arg(long)]
        can_update: bool,
        #[arg(long)]
        can_delete: bool,
    },
    Permissions {
        #[arg(short = 't', long)]
        tenant_id: String,
        #[arg(short, long)]
        entity: String,
        #[arg(short, long)]
        id: String,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

/// Query pairs for a row listing: extra filters first, then q, page and sortedBy.
fn list_params(
    param: &[(String, String)],
    query: Option<&str>,
    page: Option<u32>,
    sorted_by: Option<&str>,
) -> Vec<(String, String)> {
    let mut params = param.to_vec();
    if let Some(q) = query {
        params.push(("q".to_string(), q.to_string()));
    }
    if let Some(page) = page {
        params.push(("page".to_string(), page.to_string()));
    }
    if let Some(sorted_by) = sorted_by {
        params.push(("sortedBy".to_string(), sorted_by.to_string()));
    }
    params
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

fn authed(req: RequestBuilder) -> RequestBuilder {
    let token = fs::read_to_string(TOKEN_FILE).unwrap_or_default();
    req.header("Authorization", format!("Bearer {}", token.trim()))
}

async fn print_response(req: RequestBuilder) -> Result<(), Box<dyn std::error::Error>> {
    let res = req.send().await?;
    let status = res.status();
    let body = res.text().await?;
    match serde_json::from_str::<Value>(&body) {
        Ok(v) => println!("{} {}", status, serde_json::to_string_pretty(&v)?),
        Err(_) => println!("{} {}", status, body),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = Client::new();
    let rows_url = |tenant: &str, entity: &str| {
        format!("{}/tenants/{}/entities/{}/rows", cli.url, tenant, entity)
    };

    match &cli.command {
        Commands::Register { username, password } => {
            let req = client
                .post(format!("{}/register", cli.url))
                .json(&json!({ "username": username, "password": password }));
            print_response(req).await?;
        }
        Commands::Login { username, password } => {
            let res = client
                .post(format!("{}/login", cli.url))
                .json(&json!({ "username": username, "password": password }))
                .send()
                .await?;
            if res.status().is_success() {
                let body: LoginResponse = res.json().await?;
                fs::write(TOKEN_FILE, body.token)?;
                println!("Logged in. Token saved to {}", TOKEN_FILE);
            } else {
                println!("Login failed: {}", res.text().await?);
            }
        }
        Commands::Logout => {
            let _ = fs::remove_file(TOKEN_FILE);
            println!("Logged out (token removed).");
        }
        Commands::CreateTenant { id, name } => {
            let req = client
                .post(format!("{}/tenants", cli.url))
                .json(&json!({ "id": id, "name": name }));
            print_response(authed(req)).await?;
        }
        Commands::Tenants => {
            print_response(authed(client.get(format!("{}/tenants", cli.url)))).await?;
        }
        Commands::Health => {
            print_response(client.get(format!("{}/health", cli.url))).await?;
        }
        Commands::Members { tenant_id } => {
            let req = client.get(format!("{}/tenants/{}/members", cli.url, tenant_id));
            print_response(authed(req)).await?;
        }
        Commands::AddMember { tenant_id, user, roles, groups } => {
            let req = client
                .post(format!("{}/tenants/{}/members", cli.url, tenant_id))
                .json(&json!({ "user_id": user, "role_ids": roles, "group_ids": groups }));
            print_response(authed(req)).await?;
        }
        Commands::CreateEntity { file } => {
            let definition: Value = serde_json::from_str(&fs::read_to_string(file)?)?;
            let req = client
                .post(format!("{}/entities", cli.url))
                .json(&definition);
            print_response(authed(req)).await?;
        }
        Commands::Entities => {
            print_response(authed(client.get(format!("{}/entities", cli.url)))).await?;
        }
        Commands::Entity { slug } => {
            let req = client.get(format!("{}/entities/{}", cli.url, slug));
            print_response(authed(req)).await?;
        }
        Commands::Insert { tenant_id, entity, values, tags } => {
            let values: BTreeMap<_, _> = values.iter().cloned().collect();
            let req = client
                .post(rows_url(tenant_id, entity))
                .json(&json!({ "values": values, "tags": tags }));
            print_response(authed(req)).await?;
        }
        Commands::Update { tenant_id, entity, id, values } => {
            let values: BTreeMap<_, _> = values.iter().cloned().collect();
            let req = client
                .put(format!("{}/{}", rows_url(tenant_id, entity), id))
                .json(&json!({ "values": values }));
            print_response(authed(req)).await?;
        }
        Commands::GetRow { tenant_id, entity, id } => {
            let req = client.get(format!("{}/{}", rows_url(tenant_id, entity), id));
            print_response(authed(req)).await?;
        }
        Commands::ListRows { tenant_id, entity, query, param, page, sorted_by } => {
            let params = list_params(param, query.as_deref(), *page, sorted_by.as_deref());
            let req = client.get(rows_url(tenant_id, entity)).query(&params);
            print_response(authed(req)).await?;
        }
        Commands::PublicRows { entity, query, param, page, sorted_by } => {
            let params = list_params(param, query.as_deref(), *page, sorted_by.as_deref());
            let req = client
                .get(format!("{}/public/entities/{}/rows", cli.url, entity))
                .query(&params);
            print_response(req).await?;
        }
        Commands::DeleteRow { tenant_id, entity, id } => {
            let req = client.delete(format!("{}/{}", rows_url(tenant_id, entity), id));
            print_response(authed(req)).await?;
        }
        Commands::Share {
            tenant_id,
            entity,
            id,
            visibility,
            targets,
            can_comment,
            can_update,
            can_delete,
        } => {
            let req = client
                .put(format!("{}/{}/permissions", rows_url(tenant_id, entity), id))
                .json(&json!({
                    "visibility": visibility,
                    "targets": targets,
                    "flags": {
                        "can_comment": can_comment,
                        "can_update": can_update,
                        "can_delete": can_delete
                    }
                }));
            print_response(authed(req)).await?;
        }
        Commands::Permissions { tenant_id, entity, id } => {
            let req = client.get(format!("{}/{}/permissions", rows_url(tenant_id, entity), id));
            print_response(authed(req)).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_rows_args_and_params() {
        let cli = Cli::try_parse_from([
            "rowkeeper-cli",
            "public-rows",
            "-e",
            "contacts",
            "-q",
            "acme",
            "--param",
            "status=active",
            "--page",
            "2",
        ])
        .unwrap();
        let Commands::PublicRows { entity, query, param, page, sorted_by } = cli.command else {
            panic!("expected public-rows");
        };
        assert_eq!(entity, "contacts");
        assert_eq!(
            list_params(&param, query.as_deref(), page, sorted_by.as_deref()),
            vec![
                ("status".to_string(), "active".to_string()),
                ("q".to_string(), "acme".to_string()),
                ("page".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_read_only_subcommands_parse() {
        assert!(matches!(
            Cli::try_parse_from(["rowkeeper-cli", "health"]).unwrap().command,
            Commands::Health
        ));
        assert!(matches!(
            Cli::try_parse_from(["rowkeeper-cli", "members", "-t", "acme"]).unwrap().command,
            Commands::Members { tenant_id } if tenant_id == "acme"
        ));
        assert!(matches!(
            Cli::try_parse_from(["rowkeeper-cli", "entity", "-s", "contacts"]).unwrap().command,
            Commands::Entity { slug } if slug == "contacts"
        ));
        assert!(parse_key_value("novalue").is_err());
    }
}
