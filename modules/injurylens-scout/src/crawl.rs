use futures::stream::{self, Stream, StreamExt};

use injurylens_common::{CallError, Item, SearchQuery};

use crate::traits::ItemSource;

enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Pull-based crawl of one query. A page is only requested once the
/// consumer has drained the previous one, and nothing more is requested
/// after `query.limit` items. An error ends the stream.
pub fn crawl<'a>(
    source: &'a dyn ItemSource,
    query: &'a SearchQuery,
) -> impl Stream<Item = Result<Item, CallError>> + Send + 'a {
    let pages = stream::unfold(Cursor::Start, move |state| async move {
        let cursor = match state {
            Cursor::Done => return None,
            Cursor::Start => None,
            Cursor::Next(c) => Some(c),
        };
        match source.fetch_page(query, cursor.as_deref()).await {
            Ok(page) => {
                let next = page.next_cursor.map_or(Cursor::Done, Cursor::Next);
                Some((Ok(page.items), next))
            }
            Err(e) => Some((Err(e), Cursor::Done)),
        }
    });

    pages
        .flat_map(|page| {
            let results: Vec<Result<Item, CallError>> = match page {
                Ok(items) => items.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            };
            stream::iter(results)
        })
        .take(query.limit as usize)
}
