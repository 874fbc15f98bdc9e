//! Pull-based search results.

use crate::error::Result;
use crate::index::types::Hit;
use crate::query::merge::{IncrementalMerge, PostingSource};
use crate::store::Session;
use lru::LruCache;
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::ops::Range;

#[derive(Debug, Clone)]
enum State {
    /// Nothing matched
    Empty,
    /// A single term: its posting list already is the ranking
    Direct {
        source: Box<PostingSource>,
        lookahead: usize,
    },
    Merging(Box<IncrementalMerge>),
    /// Ranking computed up front
    Ranked(VecDeque<Hit>),
    Exhausted,
}

/// Cursor over the hits of one search, best first.
///
/// Holds no borrow of the index, so it can be stored and resumed later in
/// the same session. Dropping it part way leaves nothing behind.
#[derive(Debug, Clone)]
pub struct Hits {
    state: State,
    produced: usize,
}

impl Hits {
    pub fn empty() -> Self {
        Self {
            state: State::Empty,
            produced: 0,
        }
    }

    pub fn direct(source: PostingSource, lookahead: usize) -> Self {
        Self {
            state: State::Direct {
                source: Box::new(source),
                lookahead,
            },
            produced: 0,
        }
    }

    pub fn merging(merge: IncrementalMerge) -> Self {
        Self {
            state: State::Merging(Box::new(merge)),
            produced: 0,
        }
    }

    /// Hits already in final order
    pub fn ranked(hits: Vec<Hit>) -> Self {
        Self {
            state: State::Ranked(hits.into()),
            produced: 0,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, State::Empty | State::Exhausted)
    }

    /// Hits returned so far
    pub fn produced(&self) -> usize {
        self.produced
    }

    pub fn next_hit(&mut self, session: &mut Session) -> Result<Option<Hit>> {
        let hit = match &mut self.state {
            State::Empty | State::Exhausted => return Ok(None),
            State::Direct { source, lookahead } => source.next_weighted(session, *lookahead)?,
            State::Merging(merge) => merge.next(session)?,
            State::Ranked(hits) => hits.pop_front(),
        };
        match hit {
            Some(hit) => {
                self.produced += 1;
                Ok(Some(hit))
            }
            None => {
                self.state = State::Exhausted;
                Ok(None)
            }
        }
    }

    /// Up to `count` further hits
    pub fn take(&mut self, session: &mut Session, count: usize) -> Result<Vec<Hit>> {
        let mut hits = Vec::with_capacity(count.min(1024));
        while hits.len() < count {
            match self.next_hit(session)? {
                Some(hit) => hits.push(hit),
                None => break,
            }
        }
        Ok(hits)
    }

    /// Every remaining hit
    pub fn collect_all(&mut self, session: &mut Session) -> Result<Vec<Hit>> {
        self.take(session, usize::MAX)
    }
}

/// Random access over a search's hits.
///
/// Hits are cached by position; asking for a position behind the stream
/// that has fallen out of the cache restarts the search from a pristine
/// copy of its cursor.
pub struct Sliceable {
    initial: Hits,
    current: Hits,
    position: usize,
    cache: LruCache<usize, Hit>,
    restarts: usize,
}

impl Sliceable {
    pub fn new(hits: Hits, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            current: hits.clone(),
            initial: hits,
            position: 0,
            cache: LruCache::new(capacity),
            restarts: 0,
        }
    }

    /// Times the underlying search was started over
    pub fn restarts(&self) -> usize {
        self.restarts
    }

    pub fn get(&mut self, session: &mut Session, index: usize) -> Result<Option<Hit>> {
        if let Some(hit) = self.cache.get(&index) {
            return Ok(Some(*hit));
        }
        if index < self.position {
            self.current = self.initial.clone();
            self.position = 0;
            self.restarts += 1;
        }
        while self.position <= index {
            let Some(hit) = self.current.next_hit(session)? else {
                return Ok(None);
            };
            self.cache.put(self.position, hit);
            self.position += 1;
            if self.position > index {
                return Ok(Some(hit));
            }
        }
        Ok(None)
    }

    /// Hits in `range`, stopping early at the end of the results
    pub fn slice(&mut self, session: &mut Session, range: Range<usize>) -> Result<Vec<Hit>> {
        let mut hits = Vec::with_capacity(range.len().min(1024));
        for index in range {
            match self.get(session, index)? {
                Some(hit) => hits.push(hit),
                None => break,
            }
        }
        Ok(hits)
    }
}
