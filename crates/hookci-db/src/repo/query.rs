//! Lazy relationship queries.
//!
//! Each helper returns a stream that pulls pages from the store on demand.
//! Nothing is fetched until the stream is polled, and calling the helper
//! again starts a fresh query from the beginning.

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use hookci_core::{Build, Deploy, EntityId, Project};
use std::sync::Arc;

use super::store::{BuildFilter, Cursor, DeployFilter, EntityStore, Timestamped};
use crate::DbResult;

pub const DEFAULT_PAGE_SIZE: usize = 100;

type PageFn<T> =
    Box<dyn FnMut(Option<Cursor>, usize) -> BoxFuture<'static, DbResult<Vec<T>>> + Send>;

struct Pager<T> {
    fetch: PageFn<T>,
    after: Option<Cursor>,
    page_size: usize,
    done: bool,
}

/// Turn a page fetcher into a flat stream of records.
fn paged<T>(page_size: usize, fetch: PageFn<T>) -> BoxStream<'static, DbResult<T>>
where
    T: Timestamped + Send + 'static,
{
    let pager = Pager {
        fetch,
        after: None,
        page_size: page_size.max(1),
        done: false,
    };

    stream::unfold(pager, |mut pager| async move {
        if pager.done {
            return None;
        }
        let page = match (pager.fetch)(pager.after.clone(), pager.page_size).await {
            Ok(page) => page,
            Err(e) => {
                pager.done = true;
                return Some((vec![Err(e)], pager));
            }
        };
        if page.len() < pager.page_size {
            pager.done = true;
        }
        match page.last() {
            Some(last) => pager.after = Some(last.cursor()),
            None => return None,
        }
        let items: Vec<DbResult<T>> = page.into_iter().map(Ok).collect();
        Some((items, pager))
    })
    .flat_map(stream::iter)
    .boxed()
}

/// All builds of a project, oldest first.
pub fn project_builds(
    store: Arc<dyn EntityStore>,
    project_id: EntityId,
) -> BoxStream<'static, DbResult<Build>> {
    project_builds_paged(store, project_id, DEFAULT_PAGE_SIZE)
}

pub fn project_builds_paged(
    store: Arc<dyn EntityStore>,
    project_id: EntityId,
    page_size: usize,
) -> BoxStream<'static, DbResult<Build>> {
    let filter = BuildFilter::Project(project_id);
    paged(
        page_size,
        Box::new(move |after, limit| {
            let store = store.clone();
            let filter = filter.clone();
            Box::pin(async move { store.list_builds(&filter, after.as_ref(), limit).await })
        }),
    )
}

/// All deploys of a project, oldest first.
pub fn project_deploys(
    store: Arc<dyn EntityStore>,
    project_id: EntityId,
) -> BoxStream<'static, DbResult<Deploy>> {
    deploys_matching(store, DeployFilter::Project(project_id), DEFAULT_PAGE_SIZE)
}

/// All deploys of a build, oldest first.
pub fn build_deploys(
    store: Arc<dyn EntityStore>,
    build_id: EntityId,
) -> BoxStream<'static, DbResult<Deploy>> {
    deploys_matching(store, DeployFilter::Build(build_id), DEFAULT_PAGE_SIZE)
}

fn deploys_matching(
    store: Arc<dyn EntityStore>,
    filter: DeployFilter,
    page_size: usize,
) -> BoxStream<'static, DbResult<Deploy>> {
    paged(
        page_size,
        Box::new(move |after, limit| {
            let store = store.clone();
            let filter = filter.clone();
            Box::pin(async move { store.list_deploys(&filter, after.as_ref(), limit).await })
        }),
    )
}

/// Every project, oldest first.
pub fn all_projects(store: Arc<dyn EntityStore>) -> BoxStream<'static, DbResult<Project>> {
    paged(
        DEFAULT_PAGE_SIZE,
        Box::new(move |after, limit| {
            let store = store.clone();
            Box::pin(async move { store.list_projects(after.as_ref(), limit).await })
        }),
    )
}
