//! Page Tree Integration Tests
//!
//! End-to-end ordering scenarios through `PageTreeService` backed by an
//! on-disk libsql store: append spacing, reorder to the front, delete with
//! re-parenting, concurrent inserts and the menu view.

#[cfg(test)]
mod page_tree_tests {
    use anyhow::Result;
    use folio_core::db::{ChangeEvent, DocumentStore, LibsqlDocumentStore};
    use folio_core::models::{NewPage, PAGE_DOC_TYPE};
    use folio_core::services::{PageTreeService, TreeConfig, TreeError};
    use folio_core::SlugResolution;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::time::{timeout, Duration};
    use tokio_stream::StreamExt;

    /// Helper to create a tree service over a fresh store
    async fn create_tree() -> Result<(Arc<PageTreeService>, Arc<LibsqlDocumentStore>, TempDir)> {
        let temp_dir = TempDir::new()?;
        let store = Arc::new(LibsqlDocumentStore::new(temp_dir.path().join("tree.db")).await?);
        let tree = Arc::new(PageTreeService::new(store.clone(), TreeConfig::default()));
        Ok((tree, store, temp_dir))
    }

    #[tokio::test]
    async fn test_append_spacing_and_reorder_to_front() -> Result<()> {
        let (tree, _store, _temp_dir) = create_tree().await?;
        let parent = tree.append_as_child(None, NewPage::new("Guides", "")).await?;

        let first = tree
            .append_as_child(Some(&parent.id), NewPage::new("Install", ""))
            .await?;
        let second = tree
            .append_as_child(Some(&parent.id), NewPage::new("Configure", ""))
            .await?;
        let third = tree
            .append_as_child(Some(&parent.id), NewPage::new("Upgrade", ""))
            .await?;

        assert_eq!(first.position, 10000.0);
        assert_eq!(second.position, 20000.0);
        assert_eq!(third.position, 30000.0);

        let moved = tree.reorder(&third.id, 0).await?;
        assert_eq!(moved.position, 5000.0);

        let order: Vec<String> = tree
            .children(Some(&parent.id))
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(order, vec![third.id, first.id, second.id]);

        Ok(())
    }

    #[tokio::test]
    async fn test_delete_reparents_children_keeping_positions() -> Result<()> {
        let (tree, _store, _temp_dir) = create_tree().await?;
        let root = tree.append_as_child(None, NewPage::new("Handbook", "")).await?;
        let section = tree
            .append_as_child(Some(&root.id), NewPage::new("Policies", ""))
            .await?;
        let leave = tree
            .append_as_child(Some(&section.id), NewPage::new("Leave", ""))
            .await?;
        let expenses = tree
            .append_as_child(Some(&section.id), NewPage::new("Expenses", ""))
            .await?;
        // Move expenses to the front so both positions are non-trivial
        let expenses = tree.reorder(&expenses.id, 0).await?;

        tree.delete_page(&section.id).await?;

        assert!(matches!(
            tree.get_page(&section.id).await,
            Err(TreeError::NodeNotFound { .. })
        ));

        let leave_after = tree.get_page(&leave.id).await?;
        let expenses_after = tree.get_page(&expenses.id).await?;
        assert_eq!(leave_after.parent_id.as_deref(), Some(root.id.as_str()));
        assert_eq!(expenses_after.parent_id.as_deref(), Some(root.id.as_str()));
        assert_eq!(leave_after.position, leave.position);
        assert_eq!(expenses_after.position, expenses.position);

        Ok(())
    }

    #[tokio::test]
    async fn test_delete_appends_child_that_collides_with_new_sibling() -> Result<()> {
        let (tree, _store, _temp_dir) = create_tree().await?;
        let archive = tree.append_as_child(None, NewPage::new("Archive", "")).await?;
        let news = tree.append_as_child(None, NewPage::new("News", "")).await?;
        let early = tree
            .append_as_child(Some(&archive.id), NewPage::new("Early Posts", ""))
            .await?;
        // Second child of archive sits at 20000, the same position as news
        let late = tree
            .append_as_child(Some(&archive.id), NewPage::new("Late Posts", ""))
            .await?;
        assert_eq!(late.position, news.position);

        tree.delete_page(&archive.id).await?;

        let early_after = tree.get_page(&early.id).await?;
        let late_after = tree.get_page(&late.id).await?;
        assert_eq!(early_after.parent_id, None);
        assert_eq!(early_after.position, early.position);
        assert_eq!(late_after.parent_id, None);
        assert_eq!(late_after.position, 30000.0);
        assert!(tree.find_position_collisions(None).await?.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_inserts_keep_distinct_positions() -> Result<()> {
        let (tree, _store, _temp_dir) = create_tree().await?;
        tree.append_as_child(None, NewPage::new("Start", "")).await?;
        tree.append_as_child(None, NewPage::new("Finish", "")).await?;

        let mut handles = Vec::new();
        for i in 0..8 {
            let tree = tree.clone();
            handles.push(tokio::spawn(async move {
                tree.insert_as_child(
                    None,
                    folio_core::db::InsertAt::Index(1),
                    NewPage::new(format!("Step {}", i), ""),
                )
                .await
            }));
        }
        for handle in handles {
            handle.await??;
        }

        let children = tree.children(None).await?;
        assert_eq!(children.len(), 10);
        assert!(tree.find_position_collisions(None).await?.is_empty());
        assert!(children.windows(2).all(|w| w[0].position < w[1].position));

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_insert_racing_parent_delete_leaves_no_orphans() -> Result<()> {
        let (tree, store, _temp_dir) = create_tree().await?;

        for round in 0..10 {
            let parent = tree
                .append_as_child(None, NewPage::new(format!("Archive {}", round), ""))
                .await?;

            let deleter = {
                let tree = tree.clone();
                let id = parent.id.clone();
                tokio::spawn(async move { tree.delete_page(&id).await })
            };
            let inserter = {
                let tree = tree.clone();
                let id = parent.id.clone();
                tokio::spawn(async move {
                    tree.append_as_child(Some(&id), NewPage::new(format!("Entry {}", round), ""))
                        .await
                })
            };

            deleter.await??;
            match inserter.await? {
                Ok(child) => {
                    // Inserted first, then re-parented by the delete
                    assert_eq!(tree.get_page(&child.id).await?.parent_id, None);
                }
                Err(TreeError::NodeNotFound { .. }) => {}
                Err(other) => return Err(other.into()),
            }
        }

        // Every page is reachable from the top level
        let total = store.count_by_type(PAGE_DOC_TYPE).await?;
        assert_eq!(tree.children(None).await?.len() as u64, total);

        Ok(())
    }

    #[tokio::test]
    async fn test_menu_tree_and_slug_redirects() -> Result<()> {
        let (tree, _store, _temp_dir) = create_tree().await?;
        let docs = tree.append_as_child(None, NewPage::new("Docs", "")).await?;
        let api = tree
            .append_as_child(Some(&docs.id), NewPage::new("API Reference", ""))
            .await?;

        let menu = tree.build_menu_tree(None).await?;
        assert_eq!(menu.len(), 1);
        assert_eq!(menu[0].link, "/docs");
        assert_eq!(menu[0].children[0].link, "/docs/api-reference");

        tree.rename_slug(&api.id, "api").await?;
        match tree.resolve_slug("api-reference").await? {
            Some(SlugResolution::Redirect(page)) => assert_eq!(page.slug, "api"),
            other => panic!("Expected redirect, got {:?}", other),
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_tree_writes_appear_on_change_feed() -> Result<()> {
        let (tree, store, _temp_dir) = create_tree().await?;
        let mut feed = store.subscribe_changes(None).await?;

        let page = tree.append_as_child(None, NewPage::new("Welcome", "")).await?;
        tree.delete_page(&page.id).await?;

        let created: ChangeEvent = timeout(Duration::from_secs(1), feed.next())
            .await?
            .expect("feed should stay open")?;
        let deleted: ChangeEvent = timeout(Duration::from_secs(1), feed.next())
            .await?
            .expect("feed should stay open")?;

        assert_eq!(created.event_type(), "document:created");
        assert_eq!(created.document_id, page.id);
        assert_eq!(deleted.event_type(), "document:deleted");
        assert!(deleted.seq > created.seq);

        Ok(())
    }
}
