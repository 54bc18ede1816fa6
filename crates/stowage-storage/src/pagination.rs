//! Flattening of token-paged listings.

use std::future::Future;

use stowage_core::cancel::cancellable;
use stowage_core::error::{Result, StowageError};
use tokio_util::sync::CancellationToken;

/// One page of a provider listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub names: Vec<String>,
    pub is_truncated: bool,
    pub next_token: Option<String>,
}

/// Position in a paged listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    Start,
    Continue(String),
    Done,
}

impl Cursor {
    /// Token to send with the next request; `None` for the first page.
    pub fn token(&self) -> Option<String> {
        match self {
            Cursor::Continue(token) => Some(token.clone()),
            Cursor::Start | Cursor::Done => None,
        }
    }

    /// The cursor after receiving `page`.
    pub fn advance(self, page: &ListPage) -> Result<Cursor> {
        if let Cursor::Done = self {
            return Ok(Cursor::Done);
        }
        if !page.is_truncated {
            return Ok(Cursor::Done);
        }
        match &page.next_token {
            Some(token) if !token.is_empty() => Ok(Cursor::Continue(token.clone())),
            _ => Err(StowageError::MissingContinuationToken),
        }
    }
}

/// Fetch pages until the listing is exhausted, concatenating names in page order.
///
/// Any failed page aborts the whole listing; names from earlier pages are dropped.
pub async fn collect_pages<F, Fut>(cancel: &CancellationToken, mut fetch: F) -> Result<Vec<String>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<ListPage>>,
{
    let mut names = Vec::new();
    let mut cursor = Cursor::Start;
    let mut pages = 0usize;

    while cursor != Cursor::Done {
        let page = cancellable(cancel, fetch(cursor.token())).await?;
        pages += 1;
        tracing::debug!(page = pages, entries = page.names.len(), "received listing page");
        cursor = cursor.advance(&page)?;
        names.extend(page.names);
    }

    Ok(names)
}
