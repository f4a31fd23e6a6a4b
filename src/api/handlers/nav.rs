//! Navigation tree management.
//!
//! Entries reference their parent by id, `0` marking a root. Deleting an entry
//! removes its whole subtree, and an update may not move an entry below itself.

use axum::{
    Json,
    extract::{
        Extension, Path,
        rejection::{JsonRejection, PathRejection},
    },
    http::{HeaderMap, StatusCode},
    response::Response,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::info;
use utoipa::ToSchema;

use super::auth::principal::require_auth;
use crate::api::error::{ApiError, ResponseCode, respond};
use crate::storage::{DynStorage, NavInput, NavItem};

const ROOT_PARENT_ID: i64 = 0;
const MAX_NAV_NAME_LEN: usize = 64;
const MAX_NAV_DESCRIPTION_LEN: usize = 255;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NavRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parent_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NavNode {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub parent_id: i64,
    #[schema(no_recursion)]
    pub children: Vec<NavNode>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NavView {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub parent_id: i64,
}

impl From<NavItem> for NavView {
    fn from(item: NavItem) -> Self {
        Self {
            id: item.id,
            name: item.name,
            description: item.description,
            parent_id: item.parent_id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct NavDeleted {
    pub deleted: u64,
}

#[utoipa::path(
    get,
    path = "/api/nav",
    responses(
        (status = 200, description = "Navigation tree", body = [NavNode]),
        (status = 401, description = "Missing or invalid session")
    ),
    tag = "nav"
)]
pub async fn list_nav(
    headers: HeaderMap,
    storage: Extension<DynStorage>,
) -> Result<Response, ApiError> {
    require_auth(&headers, &storage).await?;
    let items = load_nav(&storage).await?;
    Ok(respond(StatusCode::OK, build_tree(items)))
}

#[utoipa::path(
    post,
    path = "/api/nav",
    request_body = NavRequest,
    responses(
        (status = 201, description = "Entry created", body = NavView),
        (status = 400, description = "Invalid name or unknown parent"),
        (status = 401, description = "Missing or invalid session")
    ),
    tag = "nav"
)]
pub async fn create_nav(
    headers: HeaderMap,
    storage: Extension<DynStorage>,
    payload: Result<Json<NavRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    require_auth(&headers, &storage).await?;
    let Json(request) = payload?;
    let input = nav_input(request)?;

    if input.parent_id != ROOT_PARENT_ID && find_nav(&storage, input.parent_id).await?.is_none() {
        return Err(ApiError::invalid("Parent entry does not exist"));
    }

    let item = storage
        .insert_nav(input)
        .await
        .map_err(|err| ApiError::internal("Failed to create nav entry", err))?;
    info!(nav_id = item.id, "nav entry created");
    Ok(respond(StatusCode::CREATED, NavView::from(item)))
}

#[utoipa::path(
    put,
    path = "/api/nav/{id}",
    params(
        ("id" = i64, Path, description = "Entry id")
    ),
    request_body = NavRequest,
    responses(
        (status = 200, description = "Entry updated", body = NavView),
        (status = 400, description = "Invalid name, unknown parent or cycle"),
        (status = 401, description = "Missing or invalid session"),
        (status = 404, description = "Entry not found")
    ),
    tag = "nav"
)]
pub async fn update_nav(
    headers: HeaderMap,
    storage: Extension<DynStorage>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<NavRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    require_auth(&headers, &storage).await?;
    let Path(id) = id?;
    let Json(request) = payload?;
    let input = nav_input(request)?;

    let items = load_nav(&storage).await?;
    if !items.iter().any(|item| item.id == id) {
        return Err(ResponseCode::NotFound.into());
    }
    if input.parent_id != ROOT_PARENT_ID {
        if !items.iter().any(|item| item.id == input.parent_id) {
            return Err(ApiError::invalid("Parent entry does not exist"));
        }
        if descendants(&items, id).contains(&input.parent_id) {
            return Err(ApiError::invalid("An entry cannot be moved below itself"));
        }
    }

    let item = storage
        .update_nav(id, input)
        .await
        .map_err(|err| ApiError::internal("Failed to update nav entry", err))?
        .ok_or_else(|| ApiError::from_code(ResponseCode::NotFound))?;
    Ok(respond(StatusCode::OK, NavView::from(item)))
}

#[utoipa::path(
    delete,
    path = "/api/nav/{id}",
    params(
        ("id" = i64, Path, description = "Entry id")
    ),
    responses(
        (status = 200, description = "Entry and its descendants deleted", body = NavDeleted),
        (status = 401, description = "Missing or invalid session"),
        (status = 404, description = "Entry not found")
    ),
    tag = "nav"
)]
pub async fn delete_nav(
    headers: HeaderMap,
    storage: Extension<DynStorage>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Response, ApiError> {
    require_auth(&headers, &storage).await?;
    let Path(id) = id?;

    let items = load_nav(&storage).await?;
    if !items.iter().any(|item| item.id == id) {
        return Err(ResponseCode::NotFound.into());
    }
    let ids = descendants(&items, id);
    let deleted = storage
        .delete_nav(&ids)
        .await
        .map_err(|err| ApiError::internal("Failed to delete nav entries", err))?;
    info!(nav_id = id, deleted, "nav subtree deleted");
    Ok(respond(StatusCode::OK, NavDeleted { deleted }))
}

fn nav_input(request: NavRequest) -> Result<NavInput, ApiError> {
    let name = request.name.trim().to_string();
    if name.is_empty() || name.chars().count() > MAX_NAV_NAME_LEN {
        return Err(ApiError::invalid("Invalid nav name"));
    }
    if request.description.chars().count() > MAX_NAV_DESCRIPTION_LEN {
        return Err(ApiError::invalid("Nav description is too long"));
    }
    if request.parent_id < ROOT_PARENT_ID {
        return Err(ApiError::invalid("Invalid parent id"));
    }
    Ok(NavInput {
        name,
        description: request.description,
        parent_id: request.parent_id,
    })
}

async fn load_nav(storage: &DynStorage) -> Result<Vec<NavItem>, ApiError> {
    storage
        .list_nav()
        .await
        .map_err(|err| ApiError::internal("Failed to list nav entries", err))
}

async fn find_nav(storage: &DynStorage, id: i64) -> Result<Option<NavItem>, ApiError> {
    storage
        .find_nav(id)
        .await
        .map_err(|err| ApiError::internal("Failed to lookup nav entry", err))
}

/// Nest entries under their parents, ordered by id. Entries whose parent is
/// missing are promoted to roots.
fn build_tree(mut items: Vec<NavItem>) -> Vec<NavNode> {
    items.sort_by_key(|item| item.id);
    let ids: HashSet<i64> = items.iter().map(|item| item.id).collect();

    let mut children: HashMap<i64, Vec<NavItem>> = HashMap::new();
    for item in items {
        let parent = if ids.contains(&item.parent_id) && item.parent_id != item.id {
            item.parent_id
        } else {
            ROOT_PARENT_ID
        };
        children.entry(parent).or_default().push(item);
    }

    attach(ROOT_PARENT_ID, &mut children)
}

fn attach(parent: i64, children: &mut HashMap<i64, Vec<NavItem>>) -> Vec<NavNode> {
    let Some(items) = children.remove(&parent) else {
        return Vec::new();
    };
    items
        .into_iter()
        .map(|item| NavNode {
            children: attach(item.id, children),
            id: item.id,
            name: item.name,
            description: item.description,
            parent_id: item.parent_id,
        })
        .collect()
}

/// `root` and every entry below it.
fn descendants(items: &[NavItem], root: i64) -> Vec<i64> {
    let mut found = vec![root];
    let mut seen = HashSet::from([root]);
    let mut queue = VecDeque::from([root]);
    while let Some(parent) = queue.pop_front() {
        for item in items.iter().filter(|item| item.parent_id == parent) {
            if seen.insert(item.id) {
                found.push(item.id);
                queue.push_back(item.id);
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, parent_id: i64) -> NavItem {
        NavItem {
            id,
            name: format!("nav-{id}"),
            description: String::new(),
            parent_id,
        }
    }

    #[test]
    fn build_tree_nests_by_parent() {
        let tree = build_tree(vec![item(3, 1), item(1, 0), item(2, 0), item(4, 3)]);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].id, 1);
        assert_eq!(tree[0].children.len(), 1);
        assert_eq!(tree[0].children[0].id, 3);
        assert_eq!(tree[0].children[0].children[0].id, 4);
        assert_eq!(tree[1].id, 2);
        assert!(tree[1].children.is_empty());
    }

    #[test]
    fn build_tree_promotes_orphans() {
        let tree = build_tree(vec![item(1, 0), item(5, 99)]);
        assert_eq!(tree.iter().map(|n| n.id).collect::<Vec<_>>(), vec![1, 5]);
    }

    #[test]
    fn descendants_include_whole_subtree() {
        let items = vec![item(1, 0), item(2, 1), item(3, 2), item(4, 0), item(5, 1)];
        let mut ids = descendants(&items, 1);
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3, 5]);
        assert_eq!(descendants(&items, 4), vec![4]);
    }

    #[test]
    fn nav_input_validates() {
        let request = |name: &str, parent_id| NavRequest {
            name: name.to_string(),
            description: String::new(),
            parent_id,
        };
        assert!(nav_input(request("  ", 0)).is_err());
        assert!(nav_input(request("Home", -1)).is_err());
        assert!(nav_input(request(&"x".repeat(65), 0)).is_err());
        let input = nav_input(request(" Home ", 0));
        assert!(matches!(input, Ok(NavInput { ref name, .. }) if name == "Home"));
    }
}
