//! Integration tests for draft/resolve, cascades and hydration

mod common;

use std::sync::{Arc, Mutex};

use common::{graph, record, FlakyProvider};
use elif_graph::{
    CascadeOptions, CascadePhase, CreateOptions, EntityDraft, GraphError, MatchMode,
    MemoryProvider, Phase, Provider, ResolveOptions,
};
use serde_json::{json, Value};

fn shop_schema() -> Value {
    json!({
        "Product": { "title": "string", "category": "Which category? ~>Category" },
        "Category": { "name": "string" }
    })
}

fn blog_schema() -> Value {
    json!({
        "Post": { "title": "string", "author": "->Author" },
        "Author": { "name": "string", "publisher": "->Publisher" },
        "Publisher": { "name": "string", "country": "->Country" },
        "Country": { "name": "string" }
    })
}

#[tokio::test]
async fn test_draft_then_resolve_reuses_existing_entity() {
    let provider = Arc::new(MemoryProvider::new());
    provider
        .create("Category", Some("c1"), record(json!({ "name": "Electronics" })))
        .await
        .unwrap();
    let graph = graph(shop_schema(), provider.clone());

    let chunks = Arc::new(Mutex::new(Vec::new()));
    let sink = chunks.clone();
    let options = elif_graph::DraftOptions::default().on_chunk(move |field, text| {
        sink.lock().unwrap().push(format!("{}={}", field, text));
    });

    let draft = graph
        .draft(
            "Product",
            record(json!({ "title": "TV", "categoryHint": "electronics" })),
            &options,
        )
        .await
        .unwrap();

    assert_eq!(draft.phase, Phase::Draft);
    assert_eq!(draft.data["category"], "electronics");
    assert!(draft.data.get("categoryHint").is_none());
    let spec = &draft.refs["category"].specs()[0];
    assert!(!spec.resolved);
    assert_eq!(spec.entity_type, "Category");
    assert_eq!(spec.match_mode, MatchMode::Fuzzy);
    assert_eq!(*chunks.lock().unwrap(), vec!["category=electronics".to_string()]);

    let resolved_fields = Arc::new(Mutex::new(Vec::new()));
    let seen = resolved_fields.clone();
    let resolved = graph
        .resolve(
            draft,
            &ResolveOptions::default().on_resolved(move |field, id| {
                seen.lock().unwrap().push((field.to_string(), id.to_string()));
            }),
        )
        .await
        .unwrap();

    assert_eq!(resolved.phase, Phase::Resolved);
    assert_eq!(resolved.data["category"], "c1");
    assert!(resolved.errors.is_none());
    assert!(resolved.refs["category"].specs()[0].resolved);
    assert_eq!(
        *resolved_fields.lock().unwrap(),
        vec![("category".to_string(), "c1".to_string())]
    );
    assert_eq!(provider.count("Category"), 1);
}

#[tokio::test]
async fn test_draft_without_hint_uses_prompt_and_generates() {
    let provider = Arc::new(MemoryProvider::new());
    let graph = graph(shop_schema(), provider.clone());

    let draft = graph
        .draft("Product", record(json!({ "title": "TV" })), &Default::default())
        .await
        .unwrap();
    assert_eq!(draft.data["category"], "Which category");

    let resolved = graph.resolve(draft, &ResolveOptions::default()).await.unwrap();
    let category_id = resolved.data["category"].as_str().unwrap();
    let category = provider.get("Category", category_id).await.unwrap().unwrap();
    assert_eq!(category["$generatedBy"], "Product.category");
}

#[tokio::test]
async fn test_resolve_rejects_non_draft() {
    let graph = graph(shop_schema(), Arc::new(MemoryProvider::new()));
    let not_a_draft: EntityDraft = serde_json::from_value(json!({
        "$phase": "resolved",
        "$id": "p1",
        "$type": "Product",
        "$refs": {},
        "title": "TV"
    }))
    .unwrap();

    let err = graph
        .resolve(not_a_draft, &ResolveOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::InvalidPhase { .. }));
    assert!(err.to_string().contains("draft"));
}

#[tokio::test]
async fn test_resolve_error_modes() {
    let provider = Arc::new(FlakyProvider::failing_on("Category"));
    let graph = graph(shop_schema(), provider.clone());

    let draft = graph
        .draft(
            "Product",
            record(json!({ "title": "TV", "categoryHint": "electronics" })),
            &Default::default(),
        )
        .await
        .unwrap();

    let err = graph
        .resolve(draft.clone(), &ResolveOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::Resolution { ref field, .. } if field == "category"));

    let resolved = graph
        .resolve(draft, &ResolveOptions::default().skip_errors())
        .await
        .unwrap();
    assert_eq!(resolved.phase, Phase::Resolved);
    let errors = resolved.errors.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].field, "category");
    assert_eq!(resolved.data["category"], "electronics");
    assert!(!resolved.refs["category"].specs()[0].resolved);
}

#[tokio::test]
async fn test_create_two_phase_persists_edges() {
    let provider = Arc::new(MemoryProvider::new());
    provider
        .create("Category", Some("c1"), record(json!({ "name": "Electronics" })))
        .await
        .unwrap();
    let graph = graph(shop_schema(), provider.clone());

    let product = graph
        .create_two_phase(
            "Product",
            record(json!({ "title": "TV", "categoryHint": "electronics" })),
            &ResolveOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(product["category"], "c1");
    let relations = provider.relations().await;
    assert_eq!(relations.len(), 1);
    assert_eq!(relations[0].to_id, "c1");
    assert_eq!(relations[0].meta.and_then(|m| m.similarity), Some(1.0));
}

#[tokio::test]
async fn test_cascade_respects_max_depth_and_is_idempotent() {
    let provider = Arc::new(MemoryProvider::new());
    provider
        .create("Post", Some("p1"), record(json!({ "title": "Hello" })))
        .await
        .unwrap();
    let graph = graph(blog_schema(), provider.clone());

    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = progress.clone();
    let options = CascadeOptions::new()
        .with_max_depth(2)
        .on_progress(move |p| sink.lock().unwrap().push((p.phase, p.depth)));

    let report = graph.cascade("Post", "p1", options.clone()).await.unwrap();
    assert_eq!(report.total_entities_created, 2);
    assert_eq!(report.types_generated, vec!["Author", "Publisher"]);
    assert_eq!(provider.count("Country"), 0);

    let events = progress.lock().unwrap().clone();
    assert!(events.iter().all(|(_, depth)| *depth < 2));
    assert_eq!(events.last().map(|e| e.0), Some(CascadePhase::Complete));

    let post = provider.get("Post", "p1").await.unwrap().unwrap();
    let author = provider
        .get("Author", post["author"].as_str().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(author["publisher"].is_string());

    let again = graph.cascade("Post", "p1", options).await.unwrap();
    assert_eq!(again.total_entities_created, 0);
    assert_eq!(provider.count("Author"), 1);
}

#[tokio::test]
async fn test_cascade_allow_list() {
    let provider = Arc::new(MemoryProvider::new());
    let graph = graph(blog_schema(), provider.clone());
    provider
        .create("Post", Some("p1"), record(json!({ "title": "Hello" })))
        .await
        .unwrap();

    let report = graph
        .cascade("Post", "p1", CascadeOptions::new().with_types(["Author"]))
        .await
        .unwrap();

    assert_eq!(report.types_generated, vec!["Author"]);
    assert_eq!(provider.count("Publisher"), 0);
}

#[tokio::test]
async fn test_cascade_errors_continue_or_stop() {
    let provider = Arc::new(FlakyProvider::failing_on("Publisher"));
    let graph = graph(blog_schema(), provider.clone());
    provider
        .create("Post", Some("p1"), record(json!({ "title": "One" })))
        .await
        .unwrap();
    provider
        .create("Post", Some("p2"), record(json!({ "title": "Two" })))
        .await
        .unwrap();

    let failures = Arc::new(Mutex::new(Vec::new()));
    let sink = failures.clone();
    let options = CascadeOptions::new().on_error(move |f| {
        sink.lock()
            .unwrap()
            .push((f.entity_type.clone(), f.field.clone(), f.depth));
    });

    let report = graph.cascade("Post", "p1", options.clone()).await.unwrap();
    assert_eq!(report.total_entities_created, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(
        *failures.lock().unwrap(),
        vec![("Author".to_string(), "publisher".to_string(), 1)]
    );

    let result = graph
        .cascade("Post", "p2", options.stop_on_error(true))
        .await;
    assert!(matches!(result, Err(GraphError::Provider(_))));
}

#[tokio::test]
async fn test_cascade_dangling_link_is_a_field_failure() {
    let provider = Arc::new(MemoryProvider::new());
    let graph = graph(
        json!({
            "Post": { "title": "string", "author": "->Author", "editor": "->Editor" },
            "Author": { "name": "string" },
            "Editor": { "name": "string" }
        }),
        provider.clone(),
    );
    provider
        .create(
            "Post",
            Some("p1"),
            record(json!({ "title": "One", "author": "missing-author" })),
        )
        .await
        .unwrap();
    provider
        .create(
            "Post",
            Some("p2"),
            record(json!({ "title": "Two", "author": "missing-author" })),
        )
        .await
        .unwrap();

    let failures = Arc::new(Mutex::new(Vec::new()));
    let sink = failures.clone();
    let options = CascadeOptions::new().on_error(move |f| {
        sink.lock()
            .unwrap()
            .push((f.entity_type.clone(), f.field.clone(), f.depth));
    });

    let report = graph.cascade("Post", "p1", options.clone()).await.unwrap();
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        &report.failures[0].error,
        GraphError::NotFound { entity, id } if entity == "Author" && id == "missing-author"
    ));
    assert_eq!(
        *failures.lock().unwrap(),
        vec![("Post".to_string(), "author".to_string(), 0)]
    );
    assert_eq!(provider.count("Editor"), 1);
    assert_eq!(provider.count("Author"), 0);

    let result = graph
        .cascade("Post", "p2", options.stop_on_error(true))
        .await;
    assert!(matches!(result, Err(GraphError::NotFound { .. })));
    assert_eq!(failures.lock().unwrap().len(), 2);
    assert_eq!(provider.count("Editor"), 1);
}

#[tokio::test]
async fn test_create_with_cascade_option() {
    let provider = Arc::new(MemoryProvider::new());
    let graph = graph(blog_schema(), provider.clone());

    let post = graph
        .create(
            "Post",
            record(json!({ "title": "Hello" })),
            CreateOptions::new().with_cascade(CascadeOptions::new().with_max_depth(3)),
        )
        .await
        .unwrap();

    assert!(post["author"].is_string());
    assert_eq!(provider.count("Author"), 1);
    assert_eq!(provider.count("Publisher"), 1);
    assert_eq!(provider.count("Country"), 1);
}

#[tokio::test]
async fn test_hydrated_relations() {
    let provider = Arc::new(MemoryProvider::new());
    let graph = graph(
        json!({
            "Book": { "title": "string", "publisher": "->Publisher", "author": "Author.books" },
            "Publisher": { "name": "string", "book": "<-Book" },
            "Author": { "name": "string" }
        }),
        provider.clone(),
    );
    provider
        .create("Author", Some("a1"), record(json!({ "name": "Frank" })))
        .await
        .unwrap();

    graph
        .create(
            "Book",
            record(json!({ "title": "Dune", "author": "a1" })),
            CreateOptions::new().with_id("b1"),
        )
        .await
        .unwrap();

    let book = graph.get("Book", "b1").await.unwrap().unwrap();
    let mut fields = book.relation_fields();
    fields.sort();
    assert_eq!(fields, vec!["author", "publisher"]);

    let publisher_ref = book.forward_ref("publisher").unwrap().unwrap();
    assert_eq!(Some(publisher_ref.id.as_str()), book.get("publisher").and_then(Value::as_str));
    let publisher = publisher_ref.resolve().await.unwrap().unwrap();
    assert_eq!(publisher.entity_type(), "Publisher");

    let back = publisher.relation("book").await.unwrap().into_one().unwrap();
    assert_eq!(back.id(), Some("b1"));

    let author = book.relation("author").await.unwrap().into_one().unwrap();
    let books = author.relation("books").await.unwrap().into_many();
    assert_eq!(books.len(), 1);
    assert_eq!(books[0].get("title"), Some(&json!("Dune")));
}

#[tokio::test]
async fn test_hydrated_forward_array_reads_relation_rows() {
    let provider = Arc::new(MemoryProvider::new());
    let graph = graph(
        json!({
            "Playlist": { "name": "string", "songs": ["->Song"] },
            "Song": { "title": "string" }
        }),
        provider.clone(),
    );
    for (id, title) in [("s1", "Intro"), ("s2", "Outro")] {
        provider
            .create("Song", Some(id), record(json!({ "title": title })))
            .await
            .unwrap();
    }

    graph
        .create(
            "Playlist",
            record(json!({ "name": "Mix", "songs": ["s1", "s2"] })),
            CreateOptions::new().with_id("pl1"),
        )
        .await
        .unwrap();
    // Only the relation rows still point at the songs
    provider
        .update("Playlist", "pl1", record(json!({ "songs": [] })))
        .await
        .unwrap();

    let playlist = graph.get("Playlist", "pl1").await.unwrap().unwrap();
    let songs = playlist.relation("songs").await.unwrap().into_many();
    let mut titles: Vec<_> = songs
        .iter()
        .filter_map(|song| song.get("title").and_then(Value::as_str))
        .collect();
    titles.sort();
    assert_eq!(titles, vec!["Intro", "Outro"]);
    assert!(songs.iter().all(|song| song.entity_type() == "Song"));
}

#[tokio::test]
async fn test_hydrated_backward_array_reads_stored_matches() {
    let provider = Arc::new(MemoryProvider::new());
    for (id, title) in [("laptop", "Laptop Pro"), ("lamp", "Desk Lamp"), ("hose", "Garden Hose")] {
        provider
            .create("Product", Some(id), record(json!({ "title": title })))
            .await
            .unwrap();
    }
    let graph = graph(
        json!({
            "Product": { "title": "string" },
            "Collection": {
                "$fuzzyThreshold": 0.7,
                "name": "string",
                "items": ["<~Product"]
            }
        }),
        provider.clone(),
    );

    graph
        .create(
            "Collection",
            record(json!({ "name": "Office", "itemsHint": ["laptop", "lamp"] })),
            CreateOptions::new().with_id("office"),
        )
        .await
        .unwrap();

    let collection = graph.get("Collection", "office").await.unwrap().unwrap();
    assert_eq!(collection.get("items"), Some(&json!(["laptop", "lamp"])));
    let items = collection.relation("items").await.unwrap().into_many();
    let ids: Vec<_> = items.iter().filter_map(|item| item.id()).collect();
    assert_eq!(ids, vec!["laptop", "lamp"]);
    assert_eq!(items[1].get("title"), Some(&json!("Desk Lamp")));
}
