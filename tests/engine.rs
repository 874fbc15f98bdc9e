//! End-to-end behaviour of the search engine over an in-memory store.

mod fixtures;

use fixtures::{FlakyStore, corpus, exhaustive_ranking, new_engine, small_config};
use std::collections::BTreeMap;
use std::sync::Arc;
use veilsearch::index::{DocId, ScoringKind};
use veilsearch::store::{MemoryStore, ObjectStore, Session};
use veilsearch::{Error, SearchEngine};

fn index_all(session: &mut Session, engine: &SearchEngine, docs: &[(DocId, String)]) {
    let batch: Vec<(DocId, &str)> = docs.iter().map(|(d, t)| (*d, t.as_str())).collect();
    engine.index_many(session, &batch).unwrap();
    session.commit().unwrap();
}

fn ranking(session: &mut Session, engine: &SearchEngine, query: &str) -> Vec<(DocId, f64)> {
    engine
        .search(session, query)
        .unwrap()
        .collect_all(session)
        .unwrap()
        .into_iter()
        .map(|hit| (hit.doc_id, hit.score))
        .collect()
}

#[test]
fn finds_the_needle_documents_longest_first() {
    let (_store, mut s, engine) = new_engine(ScoringKind::Ranked);
    let filler = corpus(1000, 7);
    let mut docs = Vec::with_capacity(1000);
    for (doc, text) in filler {
        if doc % 100 == 0 {
            let repeats = (doc / 100) as usize;
            docs.push((doc, "something we're looking for ".repeat(repeats)));
        } else {
            docs.push((doc, text));
        }
    }
    index_all(&mut s, &engine, &docs);

    let hits = ranking(&mut s, &engine, "something looking");
    let ids: Vec<DocId> = hits.iter().map(|(d, _)| *d).collect();
    assert_eq!(ids, vec![1000, 900, 800, 700, 600, 500, 400, 300, 200, 100]);
    assert!(hits.windows(2).all(|w| w[0].1 > w[1].1));
}

#[test]
fn unknown_terms_weigh_nothing() {
    for kind in [ScoringKind::Ranked, ScoringKind::Okapi] {
        let (_store, mut s, engine) = new_engine(kind);
        index_all(&mut s, &engine, &corpus(20, 1));
        assert_eq!(engine.query_weight(&mut s, "nonexistentword").unwrap(), 0.0);
        assert!(engine.query_weight(&mut s, "river nonexistentword").unwrap() > 0.0);
        assert!(
            engine
                .search(&mut s, "nonexistentword")
                .unwrap()
                .collect_all(&mut s)
                .unwrap()
                .is_empty()
        );
    }
}

#[test]
fn merge_matches_exhaustive_ranking() {
    let (_store, mut s, engine) = new_engine(ScoringKind::Ranked);
    let docs = corpus(300, 42);
    index_all(&mut s, &engine, &docs);

    for query in [
        "river stone",
        "cloud ember frost maple",
        "orbit orbit pixel",
        "harbor zephyr nonexistentword willow",
        "quartz",
    ] {
        let expected = exhaustive_ranking(&mut s, &engine, &docs, query);
        let actual = ranking(&mut s, &engine, query);
        assert!(!expected.is_empty(), "{query}");
        assert_eq!(
            actual.iter().map(|(d, _)| *d).collect::<Vec<_>>(),
            expected.iter().map(|(d, _)| *d).collect::<Vec<_>>(),
            "{query}"
        );
        for ((_, got), (_, want)) in actual.iter().zip(&expected) {
            assert!((got - want).abs() < 1e-12, "{query}: {got} != {want}");
        }
    }
}

#[test]
fn reindex_and_unindex_keep_exhaustive_ranking() {
    let (_store, mut s, engine) = new_engine(ScoringKind::Ranked);
    let mut docs = corpus(120, 3);
    index_all(&mut s, &engine, &docs);

    // Rewrite every third document and drop every seventh
    let rewritten = corpus(120, 99);
    for (i, (doc, text)) in docs.iter_mut().enumerate() {
        if i % 3 == 0 {
            *text = rewritten[i].1.clone();
            engine.reindex(&mut s, *doc, text).unwrap();
        }
    }
    let dropped: Vec<DocId> = docs.iter().map(|(d, _)| *d).filter(|d| d % 7 == 0).collect();
    engine.unindex_many(&mut s, &dropped).unwrap();
    docs.retain(|(d, _)| d % 7 != 0);
    s.commit().unwrap();

    assert_eq!(engine.document_count(&mut s).unwrap(), docs.len() as u64);
    for query in ["river maple", "sable tundra violet", "yarrow"] {
        let expected: Vec<DocId> = exhaustive_ranking(&mut s, &engine, &docs, query)
            .into_iter()
            .map(|(d, _)| d)
            .collect();
        let actual: Vec<DocId> = ranking(&mut s, &engine, query).into_iter().map(|(d, _)| d).collect();
        assert_eq!(actual, expected, "{query}");
    }
}

#[test]
fn document_frequency_counts_documents() {
    for kind in [ScoringKind::Ranked, ScoringKind::Okapi] {
        let (_store, mut s, engine) = new_engine(kind);
        let mut docs = corpus(80, 11);
        index_all(&mut s, &engine, &docs);
        engine.reindex(&mut s, 5, "tundra tundra harbor").unwrap();
        docs[4].1 = "tundra tundra harbor".into();
        engine.unindex(&mut s, 6).unwrap();
        docs.remove(5);
        s.commit().unwrap();

        let vocabulary = engine.lexicon().word_count(&mut s).unwrap() as u32;
        let mut live = 0;
        for term in 1..=vocabulary {
            let word = engine.lexicon().get_word(&mut s, term).unwrap().unwrap();
            let containing = docs
                .iter()
                .filter(|(_, text)| text.split(' ').any(|w| w == word))
                .count() as u64;
            assert_eq!(engine.doc_frequency(&mut s, term).unwrap(), containing, "{word}");
            if containing > 0 {
                live += 1;
            }
        }
        assert_eq!(engine.word_count(&mut s).unwrap(), live);
    }
}

#[test]
fn unindex_then_index_restores_membership() {
    for kind in [ScoringKind::Ranked, ScoringKind::Okapi] {
        let (_store, mut s, engine) = new_engine(kind);
        let docs = corpus(60, 5);
        index_all(&mut s, &engine, &docs);

        let words = ["river", "stone", "cloud", "ember", "frost", "maple", "orbit", "pixel"];
        let before: BTreeMap<&str, Vec<(DocId, f64)>> =
            words.iter().map(|w| (*w, ranking(&mut s, &engine, w))).collect();

        for (doc, text) in docs.iter().filter(|(d, _)| d % 4 == 0) {
            engine.unindex(&mut s, *doc).unwrap();
            assert!(!engine.has_doc(&mut s, *doc).unwrap());
            engine.index(&mut s, *doc, text).unwrap();
        }
        s.commit().unwrap();

        let after: BTreeMap<&str, Vec<(DocId, f64)>> =
            words.iter().map(|w| (*w, ranking(&mut s, &engine, w))).collect();
        assert_eq!(before, after);
    }
}

#[test]
fn unindex_twice_is_a_no_op() {
    let (_store, mut s, engine) = new_engine(ScoringKind::Ranked);
    index_all(&mut s, &engine, &corpus(30, 2));
    engine.unindex(&mut s, 10).unwrap();
    assert!(s.has_pending_changes());
    s.commit().unwrap();

    engine.unindex(&mut s, 10).unwrap();
    engine.unindex(&mut s, 12345).unwrap();
    assert!(!s.has_pending_changes());
    assert_eq!(engine.document_count(&mut s).unwrap(), 29);
}

#[test]
fn unchanged_reindex_writes_nothing() {
    for kind in [ScoringKind::Ranked, ScoringKind::Okapi] {
        let (store, mut s, engine) = new_engine(kind);
        let docs = corpus(100, 8);
        index_all(&mut s, &engine, &docs);
        let snapshot_commits = store.stats().commits;

        for (doc, text) in &docs {
            engine.reindex(&mut s, *doc, text).unwrap();
        }
        let batch: Vec<(DocId, &str)> = docs.iter().map(|(d, t)| (*d, t.as_str())).collect();
        engine.index_many(&mut s, &batch).unwrap();

        assert!(!s.has_pending_changes());
        assert_eq!(s.commit().unwrap(), 0);
        assert_eq!(store.stats().commits, snapshot_commits);
    }
}

#[test]
fn glob_search_unions_matching_terms() {
    let (_store, mut s, engine) = new_engine(ScoringKind::Ranked);
    let docs = corpus(150, 21);
    index_all(&mut s, &engine, &docs);

    let hits = engine
        .search_glob(&mut s, "riv* sto?e")
        .unwrap()
        .collect_all(&mut s)
        .unwrap();
    let mut found: Vec<DocId> = hits.iter().map(|h| h.doc_id).collect();
    found.sort_unstable();

    let mut expected: Vec<DocId> = docs
        .iter()
        .filter(|(_, t)| t.split(' ').any(|w| w == "river" || w == "stone"))
        .map(|(d, _)| *d)
        .collect();
    expected.sort_unstable();
    assert_eq!(found, expected);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
}

#[test]
fn phrase_search_is_unsupported() {
    for kind in [ScoringKind::Ranked, ScoringKind::Okapi] {
        let (_store, mut s, engine) = new_engine(kind);
        let err = engine.search_phrase(&mut s, "river stone").unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }
}

#[test]
fn store_failures_propagate() {
    let (store, mut s, engine) = new_engine(ScoringKind::Ranked);
    index_all(&mut s, &engine, &corpus(200, 4));

    let mut fresh = Session::new(store.clone());
    let reopened = SearchEngine::open(&mut fresh, engine.root(), small_config(ScoringKind::Ranked)).unwrap();

    store.inject_failures(1);
    let result = reopened
        .search(&mut fresh, "river stone cloud")
        .and_then(|mut hits| hits.collect_all(&mut fresh));
    assert!(matches!(result, Err(Error::Store(_))));

    // Nothing is retried internally; the next call simply works
    let hits = ranking(&mut fresh, &reopened, "river stone cloud");
    assert_eq!(hits, ranking(&mut s, &engine, "river stone cloud"));
}

#[test]
fn interrupted_writes_retry_cleanly() {
    const REWRITE: &str = "tundra glacier tundra harbor";
    for kind in [ScoringKind::Ranked, ScoringKind::Okapi] {
        let mut fail_at = 1;
        loop {
            let (store, mut s, engine) = new_engine(kind);
            let mut docs = corpus(80, 11);
            index_all(&mut s, &engine, &docs);

            let flaky = Arc::new(FlakyStore::new(store.clone()));
            let mut cold = Session::new(flaky.clone());
            let reopened = SearchEngine::open(&mut cold, engine.root(), small_config(kind)).unwrap();
            cold.clear_cache();
            flaky.arm(fail_at);

            if reopened.reindex(&mut cold, 3, REWRITE).is_err() {
                reopened.reindex(&mut cold, 3, REWRITE).unwrap();
            }
            if reopened.unindex(&mut cold, 4).is_err() {
                reopened.unindex(&mut cold, 4).unwrap();
            }
            cold.commit().unwrap();
            docs[2].1 = REWRITE.into();
            docs.remove(3);

            let mut fresh = Session::new(store.clone());
            let context = format!("{kind:?}, failing load {fail_at}");
            assert_eq!(engine.document_count(&mut fresh).unwrap(), 79, "{context}");
            assert!(!engine.has_doc(&mut fresh, 4).unwrap(), "{context}");
            assert!(engine.has_doc(&mut fresh, 3).unwrap(), "{context}");

            let vocabulary = engine.lexicon().word_count(&mut fresh).unwrap() as u32;
            let mut live = 0;
            for term in 1..=vocabulary {
                let word = engine.lexicon().get_word(&mut fresh, term).unwrap();
                let Some(word) = word else {
                    panic!("term id {term} of {vocabulary} has no word, {context}");
                };
                let containing = docs
                    .iter()
                    .filter(|(_, text)| text.split(' ').any(|w| w == word))
                    .count() as u64;
                assert_eq!(engine.doc_frequency(&mut fresh, term).unwrap(), containing, "{word}, {context}");
                if containing > 0 {
                    live += 1;
                }
            }
            assert_eq!(engine.word_count(&mut fresh).unwrap(), live, "{context}");

            // Same answers as an index built from the final documents
            let (_, mut rs, rebuilt) = new_engine(kind);
            index_all(&mut rs, &rebuilt, &docs);
            for query in ["tundra harbor", "glacier river", "maple"] {
                let actual = ranking(&mut fresh, &engine, query);
                let expected = ranking(&mut rs, &rebuilt, query);
                assert_eq!(
                    actual.iter().map(|(d, _)| *d).collect::<Vec<_>>(),
                    expected.iter().map(|(d, _)| *d).collect::<Vec<_>>(),
                    "{query}, {context}"
                );
                for ((_, got), (_, want)) in actual.iter().zip(&expected) {
                    assert!((got - want).abs() < 1e-9, "{query}, {context}: {got} != {want}");
                }
            }

            if !flaky.tripped() {
                break;
            }
            fail_at += 1;
        }
        assert!(fail_at > 3, "{kind:?} writes used too few loads");
    }
}

#[test]
fn overlong_tokens_count_but_are_not_searchable() {
    for kind in [ScoringKind::Ranked, ScoringKind::Okapi] {
        let (_store, mut s, engine) = new_engine(kind);
        let long = "x".repeat(200);
        let text = format!("alpha {long}");
        assert_eq!(engine.index(&mut s, 1, &text).unwrap(), 2);
        s.commit().unwrap();

        assert_eq!(engine.lexicon().word_count(&mut s).unwrap(), 1);
        assert_eq!(engine.word_count(&mut s).unwrap(), 1);
        assert!(ranking(&mut s, &engine, &long).is_empty());
        assert_eq!(ranking(&mut s, &engine, "alpha").len(), 1);
    }
}

#[test]
fn okapi_prefers_dense_short_documents() {
    let (_store, mut s, engine) = new_engine(ScoringKind::Okapi);
    let mut docs = corpus(50, 13);
    docs.push((1000, "zebra zebra".into()));
    docs.push((1001, "zebra river stone cloud ember frost maple orbit pixel".into()));
    index_all(&mut s, &engine, &docs);

    let hits = ranking(&mut s, &engine, "zebra");
    assert_eq!(hits.iter().map(|(d, _)| *d).collect::<Vec<_>>(), vec![1000, 1001]);
    assert!(engine.query_weight(&mut s, "zebra").unwrap() >= hits[0].1);
}

#[test]
fn snapshot_reopens_with_same_results() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.bin");
    for kind in [ScoringKind::Ranked, ScoringKind::Okapi] {
        let (store, mut s, engine) = new_engine(kind);
        index_all(&mut s, &engine, &corpus(90, 17));
        store.save(&path).unwrap();

        let restored = Arc::new(MemoryStore::open(&path).unwrap());
        let mut fresh = Session::new(restored.clone());
        let reopened = SearchEngine::open(&mut fresh, engine.root(), small_config(kind)).unwrap();
        for query in ["river", "stone cloud", "violet willow yarrow"] {
            assert_eq!(ranking(&mut fresh, &reopened, query), ranking(&mut s, &engine, query));
        }

        // New nodes never collide with restored ones
        reopened.index(&mut fresh, 5000, "freshly added words").unwrap();
        fresh.commit().unwrap();
        assert_eq!(ranking(&mut fresh, &reopened, "freshly").len(), 1);
        let docs = |hits: Vec<(DocId, f64)>| {
            let mut ids: Vec<DocId> = hits.into_iter().map(|(d, _)| d).collect();
            ids.sort_unstable();
            ids
        };
        assert_eq!(
            docs(ranking(&mut fresh, &reopened, "river")),
            docs(ranking(&mut s, &engine, "river"))
        );
    }
}

#[test]
fn sliceable_pages_through_results() {
    let (_store, mut s, engine) = new_engine(ScoringKind::Ranked);
    let docs = corpus(200, 23);
    index_all(&mut s, &engine, &docs);

    let all = ranking(&mut s, &engine, "ember frost");
    let hits = engine.search(&mut s, "ember frost").unwrap();
    let mut window = engine.sliceable(hits);
    let page = window.slice(&mut s, 10..20).unwrap();
    let first = window.slice(&mut s, 0..10).unwrap();

    let paged: Vec<(DocId, f64)> = first
        .iter()
        .chain(&page)
        .map(|h| (h.doc_id, h.score))
        .collect();
    assert_eq!(paged, all[..20].to_vec());
}
