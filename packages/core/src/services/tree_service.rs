//! Page Tree Service - Ordered Hierarchy Operations
//!
//! This module keeps pages in a re-orderable tree on top of the primary
//! document store:
//!
//! - Insert at an index, append, reorder and move (re-parent)
//! - Delete with re-parenting of children to the deleted page's parent
//! - Slugs with history, so renamed pages keep resolving
//! - Nested menu tree for navigation
//!
//! # Ordering
//!
//! Siblings are ordered by ascending `position` (see
//! [`FractionalOrderCalculator`]). Every mutation reads a fresh snapshot of
//! the affected sibling group, computes a position and writes the page back
//! at the revision it was read at.
//!
//! # Concurrency
//!
//! Within a process, mutations that compute a position hold a lock for the
//! destination sibling group, so two inserts under the same parent cannot
//! allocate from the same snapshot. Only one group lock is held at a time.
//! Writers in other processes are caught by the store's revision check and
//! surface as a retryable [`TreeError::StoreWrite`] conflict (see
//! [`SiblingOperationQueue`](crate::operations::SiblingOperationQueue)).

use crate::db::{
    Document, DocumentStore, FractionalOrderCalculator, InsertAt, Selector, StoreError,
};
use crate::models::{MenuNode, NewPage, PageNode, SlugResolution, PAGE_DOC_TYPE};
use crate::services::error::TreeError;
use crate::utils::{numbered_slug, slugify};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Tree ordering configuration
///
/// # Examples
///
/// ```
/// use folio_core::services::TreeConfig;
///
/// let config = TreeConfig::default();
/// assert_eq!(config.gap_size, 10000.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TreeConfig {
    /// Spacing between freshly appended (or renormalized) siblings
    pub gap_size: f64,

    /// Smallest distance allowed between neighbouring positions before the
    /// sibling group is renormalized
    pub min_gap: f64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            gap_size: 10000.0,
            min_gap: 1e-6,
        }
    }
}

/// Siblings found sharing one position
#[derive(Debug, Clone, PartialEq)]
pub struct PositionCollision {
    pub position: f64,
    pub node_ids: Vec<String>,
}

type GroupKey = Option<String>;

/// Service for ordered page-tree mutations
///
/// Constructed explicitly by the composition root and shared behind `Arc`.
///
/// # Examples
///
/// ```no_run
/// use folio_core::db::LibsqlDocumentStore;
/// use folio_core::models::NewPage;
/// use folio_core::services::{PageTreeService, TreeConfig};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = Arc::new(LibsqlDocumentStore::new("./data/folio.db".into()).await?);
///     let tree = PageTreeService::new(store, TreeConfig::default());
///
///     let home = tree.append_as_child(None, NewPage::new("Home", "")).await?;
///     tree.append_as_child(Some(&home.id), NewPage::new("About", "")).await?;
///
///     let menu = tree.build_menu_tree(None).await?;
///     assert_eq!(menu[0].children[0].link, "/home/about");
///     Ok(())
/// }
/// ```
pub struct PageTreeService {
    store: Arc<dyn DocumentStore>,
    config: TreeConfig,
    group_locks: Mutex<HashMap<GroupKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl PageTreeService {
    pub fn new(store: Arc<dyn DocumentStore>, config: TreeConfig) -> Self {
        Self {
            store,
            config,
            group_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Insert a new page under `parent_id` at `at`
    ///
    /// # Arguments
    ///
    /// * `parent_id` - Parent page, `None` for a top-level page
    /// * `at` - Target index among the existing children, or `Append`
    /// * `new_page` - Title, content and optional explicit slug
    ///
    /// # Errors
    ///
    /// - `NodeNotFound` if the parent does not exist
    /// - `PositionCollision` if the sibling group already contains ties
    /// - `StoreRead`/`StoreWrite` on store failures
    pub async fn insert_as_child(
        &self,
        parent_id: Option<&str>,
        at: InsertAt,
        new_page: NewPage,
    ) -> Result<PageNode, TreeError> {
        if let Some(parent) = parent_id {
            self.get_page(parent).await?;
        }

        let base_slug = slugify(new_page.slug.as_deref().unwrap_or(&new_page.title));
        let slug = self.unique_slug(&base_slug, None).await?;

        let group = group_key(parent_id);
        let lock = self.group_lock(&group);
        let _guard = lock.lock().await;

        // The parent may have been deleted while we waited
        if let Some(parent) = parent_id {
            self.get_page(parent).await?;
        }

        let mut siblings = self.load_children(parent_id).await?;
        self.ensure_no_collisions(parent_id, &siblings)?;
        let position = self.allocate_position(parent_id, &mut siblings, at).await?;

        let mut page = PageNode::new(
            new_page.title,
            new_page.content,
            slug,
            group,
            position,
        );
        self.write_page(&mut page).await?;

        tracing::debug!(
            "Inserted page {} under {:?} at position {}",
            page.id,
            page.parent_id,
            page.position
        );
        Ok(page)
    }

    /// Append a new page after the last child of `parent_id`
    pub async fn append_as_child(
        &self,
        parent_id: Option<&str>,
        new_page: NewPage,
    ) -> Result<PageNode, TreeError> {
        self.insert_as_child(parent_id, InsertAt::Append, new_page)
            .await
    }

    /// Move a page to `target_index` among its current siblings
    ///
    /// Only the page's `position` changes.
    pub async fn reorder(&self, node_id: &str, target_index: usize) -> Result<PageNode, TreeError> {
        let parent_id = self.get_page(node_id).await?.parent_id;

        let lock = self.group_lock(&parent_id);
        let _guard = lock.lock().await;

        // Re-read under the lock; the page may have moved meanwhile
        let mut page = self.get_page(node_id).await?;
        if page.parent_id != parent_id {
            return Err(TreeError::from_store_write(StoreError::write_conflict(
                node_id, None, page.rev,
            )));
        }

        let mut siblings = self.load_children(parent_id.as_deref()).await?;
        siblings.retain(|s| s.id != page.id);
        self.ensure_no_collisions(parent_id.as_deref(), &siblings)?;

        page.position = self
            .allocate_position(
                parent_id.as_deref(),
                &mut siblings,
                InsertAt::Index(target_index),
            )
            .await?;
        self.write_page(&mut page).await?;

        tracing::debug!(
            "Reordered page {} to index {} (position {})",
            page.id,
            target_index,
            page.position
        );
        Ok(page)
    }

    /// Re-parent a page, appending it after the new parent's last child
    ///
    /// # Errors
    ///
    /// - `InvalidParent` if `new_parent_id` is the page itself or one of its
    ///   descendants
    /// - `NodeNotFound` if the page or the new parent does not exist
    pub async fn move_page(
        &self,
        node_id: &str,
        new_parent_id: Option<&str>,
    ) -> Result<PageNode, TreeError> {
        self.get_page(node_id).await?;

        if let Some(parent) = new_parent_id {
            if parent == node_id {
                return Err(TreeError::invalid_parent(
                    node_id,
                    "a page cannot be its own parent",
                ));
            }
            self.get_page(parent).await?;
            if self.is_descendant(parent, node_id).await? {
                return Err(TreeError::invalid_parent(
                    node_id,
                    format!("{} is a descendant of the page", parent),
                ));
            }
        }

        let group = group_key(new_parent_id);
        let lock = self.group_lock(&group);
        let _guard = lock.lock().await;

        if let Some(parent) = new_parent_id {
            self.get_page(parent).await?;
        }
        let mut page = self.get_page(node_id).await?;
        let mut siblings = self.load_children(new_parent_id).await?;
        siblings.retain(|s| s.id != page.id);
        self.ensure_no_collisions(new_parent_id, &siblings)?;

        page.position = self
            .allocate_position(new_parent_id, &mut siblings, InsertAt::Append)
            .await?;
        page.parent_id = group;
        self.write_page(&mut page).await?;

        tracing::debug!(
            "Moved page {} under {:?} at position {}",
            page.id,
            page.parent_id,
            page.position
        );
        Ok(page)
    }

    /// Delete a page, re-parenting its children to the page's parent
    ///
    /// Children keep their positions, except a child whose position is
    /// already used in the destination group, which is appended instead.
    /// Children are re-parented one write at a time before the page itself
    /// is removed, so a failure part-way leaves the page in place with some
    /// of its children already moved up.
    ///
    /// Locks the page's own child group, then its parent's group. Locks are
    /// always taken child first, so deletes never wait on each other in a
    /// cycle.
    pub async fn delete_page(&self, node_id: &str) -> Result<(), TreeError> {
        let parent_id = self.get_page(node_id).await?.parent_id;

        let child_lock = self.group_lock(&group_key(Some(node_id)));
        let _child_guard = child_lock.lock().await;
        let lock = self.group_lock(&parent_id);
        let _guard = lock.lock().await;

        let page = self.get_page(node_id).await?;
        if page.parent_id != parent_id {
            return Err(TreeError::from_store_write(StoreError::write_conflict(
                node_id, None, page.rev,
            )));
        }
        let children = self.load_children(Some(node_id)).await?;

        let mut used: Vec<f64> = self
            .load_children(parent_id.as_deref())
            .await?
            .into_iter()
            .filter(|s| s.id != page.id)
            .map(|s| s.position)
            .collect();

        for mut child in children {
            child.parent_id = parent_id.clone();
            if used.contains(&child.position) {
                let last = used.iter().copied().fold(0.0, f64::max);
                let position = FractionalOrderCalculator::calculate_order(
                    Some(last),
                    None,
                    self.config.gap_size,
                );
                tracing::info!(
                    "Re-parented page {} collides at position {}; appending at {}",
                    child.id,
                    child.position,
                    position
                );
                child.position = position;
            }
            used.push(child.position);
            self.write_page(&mut child).await?;
        }

        let doc = page
            .to_document()
            .map_err(|e| TreeError::invalid_page(&page.id, e.to_string()))?;
        self.store
            .remove(&doc)
            .await
            .map_err(TreeError::from_store_write)?;

        tracing::debug!("Deleted page {}", node_id);
        Ok(())
    }

    /// Get a page by ID
    pub async fn get_page(&self, id: &str) -> Result<PageNode, TreeError> {
        let doc = self
            .store
            .get_by_id(id)
            .await
            .map_err(TreeError::from_store_read)?
            .filter(|d| d.doc_type == PAGE_DOC_TYPE)
            .ok_or_else(|| TreeError::node_not_found(id))?;
        decode_page(&doc)
    }

    /// Children of `parent_id` in display order
    pub async fn children(&self, parent_id: Option<&str>) -> Result<Vec<PageNode>, TreeError> {
        self.load_children(parent_id).await
    }

    /// Nested, ordered menu of the pages below `parent_id`
    ///
    /// Each entry's `link` is `/` followed by the slug path from the top of
    /// the tree, so `parent_id` does not change the links it produces.
    pub async fn build_menu_tree(&self, parent_id: Option<&str>) -> Result<Vec<MenuNode>, TreeError> {
        let docs = self
            .store
            .find_by_type(PAGE_DOC_TYPE, &Selector::new(), None)
            .await
            .map_err(TreeError::from_store_read)?;

        let mut by_id: HashMap<String, PageNode> = HashMap::new();
        let mut adjacency: HashMap<GroupKey, Vec<String>> = HashMap::new();
        for doc in &docs {
            let page = decode_page(doc)?;
            adjacency
                .entry(page.parent_id.clone())
                .or_default()
                .push(page.id.clone());
            by_id.insert(page.id.clone(), page);
        }
        for ids in adjacency.values_mut() {
            ids.sort_by(|a, b| sibling_order(&by_id[a], &by_id[b]));
        }

        let mut prefix = String::new();
        let mut on_path = HashSet::new();
        if let Some(parent) = parent_id {
            let mut ancestors = Vec::new();
            let mut cursor = by_id.get(parent);
            while let Some(page) = cursor {
                if !on_path.insert(page.id.clone()) {
                    break;
                }
                ancestors.push(page.slug.as_str());
                cursor = page.parent_id.as_ref().and_then(|p| by_id.get(p));
            }
            for slug in ancestors.iter().rev() {
                prefix.push('/');
                prefix.push_str(slug);
            }
        }

        Ok(build_menu_level(
            &group_key(parent_id),
            &prefix,
            &by_id,
            &adjacency,
            &mut on_path,
        ))
    }

    /// Change a page's slug, keeping the old one in its history
    ///
    /// The requested slug is normalized and de-duplicated like a new page's.
    pub async fn rename_slug(&self, node_id: &str, new_slug: &str) -> Result<PageNode, TreeError> {
        let mut page = self.get_page(node_id).await?;
        let slug = self.unique_slug(&slugify(new_slug), Some(node_id)).await?;
        if slug == page.slug {
            return Ok(page);
        }

        let old = std::mem::replace(&mut page.slug, slug);
        page.slug_history.retain(|s| s != &page.slug && s != &old);
        page.slug_history.push(old);
        self.write_page(&mut page).await?;
        Ok(page)
    }

    /// Look a page up by current or historical slug
    pub async fn resolve_slug(&self, slug: &str) -> Result<Option<SlugResolution>, TreeError> {
        let current = self
            .store
            .find_by_type(
                PAGE_DOC_TYPE,
                &Selector::new().eq("slug", json!(slug)),
                Some(1),
            )
            .await
            .map_err(TreeError::from_store_read)?;
        if let Some(doc) = current.first() {
            return Ok(Some(SlugResolution::Current(decode_page(doc)?)));
        }

        let all = self
            .store
            .find_by_type(PAGE_DOC_TYPE, &Selector::new(), None)
            .await
            .map_err(TreeError::from_store_read)?;
        let mut redirect: Option<PageNode> = None;
        for doc in &all {
            let page = decode_page(doc)?;
            if page.slug_history.iter().any(|s| s == slug)
                && redirect
                    .as_ref()
                    .map_or(true, |r| page.modified_at > r.modified_at)
            {
                redirect = Some(page);
            }
        }
        Ok(redirect.map(SlugResolution::Redirect))
    }

    /// Report siblings under `parent_id` that share a position
    pub async fn find_position_collisions(
        &self,
        parent_id: Option<&str>,
    ) -> Result<Vec<PositionCollision>, TreeError> {
        let siblings = self.load_children(parent_id).await?;
        Ok(collisions_in(&siblings))
    }

    /// Reassign evenly spaced positions to the children of `parent_id`
    ///
    /// Current order is kept; ties are broken by creation time. Returns the
    /// number of pages rewritten.
    pub async fn renormalize_children(&self, parent_id: Option<&str>) -> Result<usize, TreeError> {
        let group = group_key(parent_id);
        let lock = self.group_lock(&group);
        let _guard = lock.lock().await;

        let mut siblings = self.load_children(parent_id).await?;
        self.renormalize_group(parent_id, &mut siblings).await
    }

    fn group_lock(&self, group: &GroupKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .group_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Drop locks nobody holds or waits on
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(group.clone()).or_default().clone()
    }

    async fn load_children(&self, parent_id: Option<&str>) -> Result<Vec<PageNode>, TreeError> {
        let docs = self
            .store
            .find_by_type(
                PAGE_DOC_TYPE,
                &Selector::new().eq("parentId", json!(parent_id)),
                None,
            )
            .await
            .map_err(TreeError::from_store_read)?;

        let mut pages = docs.iter().map(decode_page).collect::<Result<Vec<_>, _>>()?;
        pages.sort_by(sibling_order);
        Ok(pages)
    }

    async fn write_page(&self, page: &mut PageNode) -> Result<(), TreeError> {
        page.touch();
        let doc = page
            .to_document()
            .map_err(|e| TreeError::invalid_page(&page.id, e.to_string()))?;
        let rev = self
            .store
            .put(doc)
            .await
            .map_err(TreeError::from_store_write)?;
        page.rev = Some(rev);
        Ok(())
    }

    fn ensure_no_collisions(
        &self,
        parent_id: Option<&str>,
        siblings: &[PageNode],
    ) -> Result<(), TreeError> {
        match collisions_in(siblings).into_iter().next() {
            None => Ok(()),
            Some(collision) => {
                tracing::error!(
                    "Position collision under {:?}: pages {:?} share position {}",
                    parent_id,
                    collision.node_ids,
                    collision.position
                );
                Err(TreeError::PositionCollision {
                    parent: parent_id.map(str::to_string),
                    position: collision.position,
                    node_ids: collision.node_ids,
                })
            }
        }
    }

    /// Compute a position at `at`, renormalizing the group if the gap is spent
    async fn allocate_position(
        &self,
        parent_id: Option<&str>,
        siblings: &mut [PageNode],
        at: InsertAt,
    ) -> Result<f64, TreeError> {
        let positions: Vec<f64> = siblings.iter().map(|s| s.position).collect();
        let (prev, next) = FractionalOrderCalculator::neighbours(&positions, at);
        let position = FractionalOrderCalculator::calculate_order(prev, next, self.config.gap_size);

        if !FractionalOrderCalculator::is_too_close(prev, next, position, self.config.min_gap) {
            return Ok(position);
        }

        tracing::info!(
            "Sibling gap exhausted under {:?} (position {}); renormalizing {} pages",
            parent_id,
            position,
            siblings.len()
        );
        self.renormalize_group(parent_id, siblings).await?;

        let positions: Vec<f64> = siblings.iter().map(|s| s.position).collect();
        Ok(FractionalOrderCalculator::compute_insert_position(
            &positions,
            at,
            self.config.gap_size,
        ))
    }

    /// Rewrite `siblings` (sorted) to evenly spaced positions; caller holds the group lock
    async fn renormalize_group(
        &self,
        parent_id: Option<&str>,
        siblings: &mut [PageNode],
    ) -> Result<usize, TreeError> {
        let targets = FractionalOrderCalculator::rebalance(siblings.len(), self.config.gap_size);
        let mut rewritten = 0;
        for (page, target) in siblings.iter_mut().zip(targets) {
            if page.position != target {
                page.position = target;
                self.write_page(page).await?;
                rewritten += 1;
            }
        }
        if rewritten > 0 {
            tracing::info!(
                "Renormalized {} of {} pages under {:?}",
                rewritten,
                siblings.len(),
                parent_id
            );
        }
        Ok(rewritten)
    }

    /// Whether `candidate` lies in the subtree below `ancestor_id`
    async fn is_descendant(&self, candidate: &str, ancestor_id: &str) -> Result<bool, TreeError> {
        let mut seen = HashSet::new();
        let mut cursor = Some(candidate.to_string());
        while let Some(id) = cursor {
            if id == ancestor_id {
                return Ok(true);
            }
            if !seen.insert(id.clone()) {
                tracing::error!("Cycle detected in parent chain at page {}", id);
                return Ok(false);
            }
            cursor = match self.get_page(&id).await {
                Ok(page) => page.parent_id,
                Err(TreeError::NodeNotFound { .. }) => None,
                Err(e) => return Err(e),
            };
        }
        Ok(false)
    }

    /// First free slug among `base`, `base-2`, ... (ignoring `owner`'s own slug)
    async fn unique_slug(&self, base: &str, owner: Option<&str>) -> Result<String, TreeError> {
        let mut n = 1;
        loop {
            let candidate = numbered_slug(base, n);
            let holders = self
                .store
                .find_by_type(
                    PAGE_DOC_TYPE,
                    &Selector::new().eq("slug", json!(candidate)),
                    Some(1),
                )
                .await
                .map_err(TreeError::from_store_read)?;
            match holders.first() {
                None => return Ok(candidate),
                Some(doc) if Some(doc.id.as_str()) == owner => return Ok(candidate),
                Some(_) => n += 1,
            }
        }
    }
}

fn group_key(parent_id: Option<&str>) -> GroupKey {
    parent_id.map(str::to_string)
}

fn decode_page(doc: &Document) -> Result<PageNode, TreeError> {
    PageNode::from_document(doc).map_err(|e| TreeError::invalid_page(&doc.id, e.to_string()))
}

fn sibling_order(a: &PageNode, b: &PageNode) -> std::cmp::Ordering {
    a.position
        .total_cmp(&b.position)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

fn collisions_in(siblings: &[PageNode]) -> Vec<PositionCollision> {
    let positions: Vec<f64> = siblings.iter().map(|s| s.position).collect();
    FractionalOrderCalculator::find_ties(&positions)
        .into_iter()
        .map(|position| PositionCollision {
            position,
            node_ids: siblings
                .iter()
                .filter(|s| s.position == position)
                .map(|s| s.id.clone())
                .collect(),
        })
        .collect()
}

fn build_menu_level(
    group: &GroupKey,
    prefix: &str,
    by_id: &HashMap<String, PageNode>,
    adjacency: &HashMap<GroupKey, Vec<String>>,
    on_path: &mut HashSet<String>,
) -> Vec<MenuNode> {
    let Some(ids) = adjacency.get(group) else {
        return Vec::new();
    };

    let mut level = Vec::with_capacity(ids.len());
    for id in ids {
        let page = &by_id[id];
        if !on_path.insert(page.id.clone()) {
            tracing::error!("Cycle detected in page tree at {}", page.id);
            continue;
        }
        let link = format!("{}/{}", prefix, page.slug);
        let children = build_menu_level(&Some(page.id.clone()), &link, by_id, adjacency, on_path);
        on_path.remove(&page.id);

        level.push(MenuNode {
            id: page.id.clone(),
            title: page.title.clone(),
            link,
            position: page.position,
            children,
        });
    }
    level
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LibsqlDocumentStore;
    use tempfile::TempDir;

    async fn create_test_service() -> (PageTreeService, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = LibsqlDocumentStore::new(temp_dir.path().join("tree.db"))
            .await
            .unwrap();
        let service = PageTreeService::new(Arc::new(store), TreeConfig::default());
        (service, temp_dir)
    }

    fn ids(pages: &[PageNode]) -> Vec<&str> {
        pages.iter().map(|p| p.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_insert_at_index() {
        let (service, _temp_dir) = create_test_service().await;

        let a = service.append_as_child(None, NewPage::new("A", "")).await.unwrap();
        let c = service.append_as_child(None, NewPage::new("C", "")).await.unwrap();
        let b = service
            .insert_as_child(None, InsertAt::Index(1), NewPage::new("B", ""))
            .await
            .unwrap();
        let first = service
            .insert_as_child(None, InsertAt::Index(0), NewPage::new("First", ""))
            .await
            .unwrap();

        assert_eq!(b.position, 15000.0);
        assert_eq!(first.position, 5000.0);

        let children = service.children(None).await.unwrap();
        assert_eq!(ids(&children), vec![&first.id, &a.id, &b.id, &c.id]);
    }

    #[tokio::test]
    async fn test_insert_under_missing_parent() {
        let (service, _temp_dir) = create_test_service().await;

        let result = service
            .append_as_child(Some("missing"), NewPage::new("Orphan", ""))
            .await;
        assert!(matches!(result, Err(TreeError::NodeNotFound { .. })));
    }

    #[tokio::test]
    async fn test_move_rejects_self_and_descendants() {
        let (service, _temp_dir) = create_test_service().await;

        let root = service.append_as_child(None, NewPage::new("Root", "")).await.unwrap();
        let child = service
            .append_as_child(Some(&root.id), NewPage::new("Child", ""))
            .await
            .unwrap();
        let grandchild = service
            .append_as_child(Some(&child.id), NewPage::new("Grandchild", ""))
            .await
            .unwrap();

        assert!(matches!(
            service.move_page(&root.id, Some(&root.id)).await,
            Err(TreeError::InvalidParent { .. })
        ));
        assert!(matches!(
            service.move_page(&root.id, Some(&grandchild.id)).await,
            Err(TreeError::InvalidParent { .. })
        ));
        assert!(matches!(
            service.move_page(&root.id, Some("missing")).await,
            Err(TreeError::NodeNotFound { .. })
        ));

        let moved = service.move_page(&grandchild.id, None).await.unwrap();
        assert_eq!(moved.parent_id, None);
        assert_eq!(moved.position, 20000.0);
    }

    #[tokio::test]
    async fn test_repeated_front_inserts_trigger_renormalization() {
        let temp_dir = TempDir::new().unwrap();
        let store = LibsqlDocumentStore::new(temp_dir.path().join("tree.db"))
            .await
            .unwrap();
        let config = TreeConfig {
            gap_size: 8.0,
            min_gap: 1.0,
        };
        let service = PageTreeService::new(Arc::new(store), config);

        let mut expected = Vec::new();
        expected.push(
            service
                .append_as_child(None, NewPage::new("Last", ""))
                .await
                .unwrap()
                .id,
        );
        // 8 -> 4 -> 2 -> 1, then 0.5 is closer than min_gap
        for i in 0..5 {
            let page = service
                .insert_as_child(None, InsertAt::Index(0), NewPage::new(format!("P{}", i), ""))
                .await
                .unwrap();
            expected.insert(0, page.id);
        }

        let children = service.children(None).await.unwrap();
        assert_eq!(ids(&children), expected.iter().map(String::as_str).collect::<Vec<_>>());
        assert!(children.iter().all(|p| p.position > 0.0));
        assert!(service.find_position_collisions(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_collisions_block_insert_until_renormalized() {
        let (service, _temp_dir) = create_test_service().await;

        let a = service.append_as_child(None, NewPage::new("A", "")).await.unwrap();
        let mut b = service.append_as_child(None, NewPage::new("B", "")).await.unwrap();

        // Simulate a lost race by writing a tie directly to the store
        b.position = a.position;
        service.store().put(b.to_document().unwrap()).await.unwrap();

        let collisions = service.find_position_collisions(None).await.unwrap();
        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions[0].node_ids.len(), 2);

        let result = service.append_as_child(None, NewPage::new("C", "")).await;
        assert!(matches!(result, Err(TreeError::PositionCollision { .. })));

        assert_eq!(service.renormalize_children(None).await.unwrap(), 1);
        assert!(service.find_position_collisions(None).await.unwrap().is_empty());
        service.append_as_child(None, NewPage::new("C", "")).await.unwrap();
    }

    #[tokio::test]
    async fn test_slugs_are_unique_and_keep_history() {
        let (service, _temp_dir) = create_test_service().await;

        let first = service
            .append_as_child(None, NewPage::new("Getting Started", ""))
            .await
            .unwrap();
        let second = service
            .append_as_child(None, NewPage::new("Getting started!", ""))
            .await
            .unwrap();
        assert_eq!(first.slug, "getting-started");
        assert_eq!(second.slug, "getting-started-2");

        let renamed = service.rename_slug(&first.id, "Quick Start").await.unwrap();
        assert_eq!(renamed.slug, "quick-start");
        assert_eq!(renamed.slug_history, vec!["getting-started".to_string()]);

        match service.resolve_slug("getting-started").await.unwrap() {
            Some(SlugResolution::Redirect(page)) => assert_eq!(page.id, first.id),
            other => panic!("expected redirect, got {:?}", other),
        }
        match service.resolve_slug("quick-start").await.unwrap() {
            Some(SlugResolution::Current(page)) => assert_eq!(page.id, first.id),
            other => panic!("expected current, got {:?}", other),
        }
        assert!(service.resolve_slug("nowhere").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_rechecks_parent_after_waiting_for_group() {
        let (service, _temp_dir) = create_test_service().await;
        let parent = service.append_as_child(None, NewPage::new("Drafts", "")).await.unwrap();

        let lock = service.group_lock(&Some(parent.id.clone()));
        let guard = lock.lock().await;

        let insert = service.append_as_child(Some(&parent.id), NewPage::new("Outline", ""));
        let remove = async {
            tokio::task::yield_now().await;
            let doc = parent.to_document().unwrap();
            service.store().remove(&doc).await.unwrap();
            drop(guard);
        };
        let (inserted, ()) = tokio::join!(insert, remove);

        assert!(matches!(inserted, Err(TreeError::NodeNotFound { .. })));
        assert!(service.children(Some(&parent.id)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_idle_group_locks_are_pruned() {
        let (service, _temp_dir) = create_test_service().await;
        let mut parents = Vec::new();
        for i in 0..5 {
            let parent = service
                .append_as_child(None, NewPage::new(format!("Volume {}", i), ""))
                .await
                .unwrap();
            service
                .append_as_child(Some(&parent.id), NewPage::new(format!("Chapter {}", i), ""))
                .await
                .unwrap();
            parents.push(parent);
        }

        let held = service.group_lock(&Some(parents[0].id.clone()));
        let _other = service.group_lock(&None);
        {
            let locks = service.group_locks.lock().unwrap();
            assert_eq!(locks.len(), 2);
            assert!(locks.contains_key(&Some(parents[0].id.clone())));
        }

        drop(held);
        let _again = service.group_lock(&None);
        assert_eq!(service.group_locks.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_menu_tree_links_and_order() {
        let (service, _temp_dir) = create_test_service().await;

        let docs = service.append_as_child(None, NewPage::new("Docs", "")).await.unwrap();
        let guide = service
            .append_as_child(Some(&docs.id), NewPage::new("Guide", ""))
            .await
            .unwrap();
        let intro = service
            .insert_as_child(Some(&docs.id), InsertAt::Index(0), NewPage::new("Intro", ""))
            .await
            .unwrap();
        service
            .append_as_child(Some(&guide.id), NewPage::new("Setup", ""))
            .await
            .unwrap();

        let menu = service.build_menu_tree(None).await.unwrap();
        assert_eq!(menu.len(), 1);
        assert_eq!(menu[0].link, "/docs");
        assert_eq!(menu[0].children[0].id, intro.id);
        assert_eq!(menu[0].children[1].link, "/docs/guide");
        assert_eq!(menu[0].children[1].children[0].link, "/docs/guide/setup");

        let sub = service.build_menu_tree(Some(&guide.id)).await.unwrap();
        assert_eq!(sub.len(), 1);
        assert_eq!(sub[0].link, "/docs/guide/setup");
    }
}
