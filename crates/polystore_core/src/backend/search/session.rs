//! Search requests and sessions.

use super::index::{Hit, IndexOutcome, SearchIndex};
use crate::config::Settings;
use crate::error::{RepoError, RepoResult};
use crate::session::{NativeSession, SessionFactory};
use crate::spec::OrderBy;
use serde_json::Value;
use std::sync::Arc;

/// One action of a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkAction {
    Create { id: Option<String>, source: Value },
    Index { id: String, source: Value },
    Update { id: String, doc: Value },
    Delete { id: String },
}

/// Native request language of the search backend.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchRequest {
    Get {
        index: String,
        id: String,
    },
    MultiGet {
        index: String,
        ids: Vec<String>,
    },
    Search {
        index: String,
        query: Value,
        sort: Vec<OrderBy>,
        from: u64,
        size: u64,
    },
    Count {
        index: String,
        query: Value,
    },
    Index {
        index: String,
        id: Option<String>,
        source: Value,
        create: bool,
    },
    Update {
        index: String,
        id: String,
        doc: Value,
    },
    Delete {
        index: String,
        id: String,
    },
    DeleteByQuery {
        index: String,
        query: Value,
    },
    Bulk {
        index: String,
        actions: Vec<BulkAction>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchResponse {
    Found(Option<Hit>),
    Hits(Vec<Hit>),
    Count(u64),
    Written(IndexOutcome),
    Bulk(Vec<IndexOutcome>),
}

impl SearchResponse {
    pub fn into_found(self) -> RepoResult<Option<Hit>> {
        match self {
            Self::Found(hit) => Ok(hit),
            other => Err(unexpected("a single hit", &other)),
        }
    }

    pub fn into_hits(self) -> RepoResult<Vec<Hit>> {
        match self {
            Self::Hits(hits) => Ok(hits),
            other => Err(unexpected("hits", &other)),
        }
    }

    pub fn into_count(self) -> RepoResult<u64> {
        match self {
            Self::Count(count) => Ok(count),
            other => Err(unexpected("a count", &other)),
        }
    }

    pub fn into_written(self) -> RepoResult<IndexOutcome> {
        match self {
            Self::Written(outcome) => Ok(outcome),
            other => Err(unexpected("a write outcome", &other)),
        }
    }

    pub fn into_bulk(self) -> RepoResult<Vec<IndexOutcome>> {
        match self {
            Self::Bulk(items) => Ok(items),
            other => Err(unexpected("bulk items", &other)),
        }
    }
}

fn unexpected(expected: &str, actual: &SearchResponse) -> RepoError {
    RepoError::backend("search", format!("expected {expected}, got {actual:?}"))
}

/// Stateless session over one index. Writes are visible immediately, so
/// `commit` has nothing to flush.
pub struct SearchSession {
    index: Arc<SearchIndex>,
}

impl NativeSession for SearchSession {
    type Command = SearchRequest;
    type Output = SearchResponse;

    fn execute(&mut self, request: SearchRequest) -> RepoResult<SearchResponse> {
        let engine = &self.index;
        Ok(match request {
            SearchRequest::Get { index, id } => SearchResponse::Found(engine.get(&index, &id)?),
            SearchRequest::MultiGet { index, ids } => {
                SearchResponse::Hits(engine.multi_get(&index, &ids)?)
            }
            SearchRequest::Search {
                index,
                query,
                sort,
                from,
                size,
            } => SearchResponse::Hits(engine.search(&index, &query, &sort, from, size)?),
            SearchRequest::Count { index, query } => {
                SearchResponse::Count(engine.count(&index, &query)?)
            }
            SearchRequest::Index {
                index,
                id,
                source,
                create,
            } => SearchResponse::Written(engine.index(&index, id, source, create)?),
            SearchRequest::Update { index, id, doc } => {
                SearchResponse::Written(engine.update(&index, &id, doc)?)
            }
            SearchRequest::Delete { index, id } => {
                SearchResponse::Written(engine.delete(&index, &id)?)
            }
            SearchRequest::DeleteByQuery { index, query } => {
                SearchResponse::Count(engine.delete_by_query(&index, &query)?)
            }
            SearchRequest::Bulk { index, actions } => SearchResponse::Bulk(
                actions
                    .into_iter()
                    .map(|action| match action {
                        BulkAction::Create { id, source } => engine.index(&index, id, source, true),
                        BulkAction::Index { id, source } => {
                            engine.index(&index, Some(id), source, false)
                        }
                        BulkAction::Update { id, doc } => engine.update(&index, &id, doc),
                        BulkAction::Delete { id } => engine.delete(&index, &id),
                    })
                    .collect::<RepoResult<Vec<_>>>()?,
            ),
        })
    }

    fn commit(&mut self) -> RepoResult<()> {
        Ok(())
    }

    fn dispose(&mut self) {}
}

/// One configured search store.
#[derive(Debug, Clone)]
pub struct SearchStore {
    prefix: String,
    index: Arc<SearchIndex>,
}

impl SearchStore {
    pub fn new(prefix: impl Into<String>, index: Arc<SearchIndex>) -> Self {
        Self {
            prefix: prefix.into(),
            index,
        }
    }

    /// Creates a store with a fresh index named by the address configured
    /// for `prefix`.
    ///
    /// # Errors
    /// - `Configuration` when neither `<prefix>` nor `<prefix>.Url` is set.
    pub fn from_settings(settings: &Settings, prefix: &str) -> RepoResult<Self> {
        let address = settings.store_address(prefix).ok_or_else(|| {
            RepoError::Configuration(format!("no search index configured for `{prefix}`"))
        })?;
        Ok(Self::new(prefix, Arc::new(SearchIndex::new(address))))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn index(&self) -> &Arc<SearchIndex> {
        &self.index
    }
}

impl SessionFactory for SearchStore {
    type Session = SearchSession;

    fn open_session(&self) -> RepoResult<SearchSession> {
        Ok(SearchSession {
            index: Arc::clone(&self.index),
        })
    }

    fn source(&self) -> String {
        self.index.name().to_string()
    }
}
