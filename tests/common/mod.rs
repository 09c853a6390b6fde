//! Shared fixtures for the integration tests
//!
//! A small bookstore: books and authors served by in-memory batch fetchers,
//! plus a few fields that fail, block or record their invocation order.

#![allow(dead_code)]

use anyhow::anyhow;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use this_graphql::prelude::*;

pub const FAR_FUTURE: Duration = Duration::from_secs(3600);

/// The engine plus handles on its fetchers
pub struct Bookstore {
    pub engine: GraphQLEngine,
    pub books: InMemoryFetcher,
    pub authors: InMemoryFetcher,
    pub mutations: Arc<Mutex<Vec<String>>>,
}

/// Request-scoped data read by the `viewer` field
#[derive(Debug, Clone)]
pub struct Viewer(pub String);

pub fn book_values() -> Vec<Value> {
    vec![
        json!({"__typename": "Book", "id": "1", "title": "Dune", "authorId": "a1", "genre": "SCIFI"}),
        json!({"__typename": "Book", "id": "2", "title": "The Left Hand of Darkness", "authorId": "a2", "genre": "SCIFI"}),
        json!({"__typename": "Book", "id": "3", "title": "Children of Dune", "authorId": "a1", "genre": "SCIFI"}),
    ]
}

pub fn author_values() -> Vec<Value> {
    vec![
        json!({"__typename": "Author", "id": "a1", "name": "Frank Herbert"}),
        json!({"__typename": "Author", "id": "a2", "name": "Ursula K. Le Guin"}),
    ]
}

pub fn bookstore_schema(mutations: Arc<Mutex<Vec<String>>>) -> SchemaRegistry {
    SchemaBuilder::new()
        .register(
            TypeDescriptor::object("Query")
                .field(FieldDescriptor::new("hello", "String").resolve_sync(|_ctx| Ok(json!("world"))))
                .field(FieldDescriptor::new("books", "[Book!]!").resolve_sync(|_ctx| Ok(Value::Array(book_values()))))
                .field(
                    FieldDescriptor::new("book", "Book")
                        .argument(ArgumentDescriptor::new("id", "ID!"))
                        .resolve_with(|ctx| {
                            Box::pin(async move {
                                let id: String = ctx.arg("id")?;
                                Ok(ctx.load("Book", id).await?)
                            })
                        }),
                )
                .field(
                    FieldDescriptor::new("author", "Author")
                        .argument(ArgumentDescriptor::new("id", "ID!"))
                        .resolve_with(|ctx| {
                            Box::pin(async move {
                                let id: String = ctx.arg("id")?;
                                Ok(ctx.load("Author", id).await?)
                            })
                        }),
                )
                .field(
                    FieldDescriptor::new("greeting", "String!")
                        .argument(ArgumentDescriptor::new("name", "String").default_value(json!("reader")))
                        .resolve_sync(|ctx| {
                            let name: String = ctx.arg("name")?;
                            Ok(json!(format!("Hello, {}!", name)))
                        }),
                )
                .field(FieldDescriptor::new("failing", "String").resolve_sync(|_ctx| Err(anyhow!("boom"))))
                .field(FieldDescriptor::new("badGenre", "Genre").resolve_sync(|_ctx| Ok(json!("POETRY"))))
                .field(FieldDescriptor::new("search", "[SearchResult!]!").resolve_sync(|_ctx| {
                    Ok(Value::Array(vec![book_values()[0].clone(), author_values()[1].clone()]))
                }))
                .field(FieldDescriptor::new("node", "Node").resolve_sync(|_ctx| {
                    Ok(json!({"id": "a2", "name": "Ursula K. Le Guin", "kind": "author"}))
                }))
                .field(FieldDescriptor::new("viewer", "String").resolve_sync(|ctx| {
                    Ok(ctx
                        .data::<Viewer>()
                        .map_or(Value::Null, |viewer| json!(viewer.0)))
                }))
                .field(FieldDescriptor::new("slow", "String").resolve_with(|_ctx| {
                    Box::pin(async move {
                        tokio::time::sleep(FAR_FUTURE).await;
                        Ok(json!("late"))
                    })
                }))
                .field(FieldDescriptor::new("slowStrict", "String!").resolve_with(|_ctx| {
                    Box::pin(async move {
                        tokio::time::sleep(FAR_FUTURE).await;
                        Ok(json!("late"))
                    })
                })),
        )
        .register(
            TypeDescriptor::object("Mutation").field(
                FieldDescriptor::new("record", "String")
                    .argument(ArgumentDescriptor::new("label", "String!"))
                    .argument(ArgumentDescriptor::new("delayMs", "Int").default_value(json!(0)))
                    .resolve_with(move |ctx| {
                        let mutations = mutations.clone();
                        Box::pin(async move {
                            let label: String = ctx.arg("label")?;
                            let delay: u64 = ctx.arg("delayMs")?;
                            tokio::time::sleep(Duration::from_millis(delay)).await;
                            mutations
                                .lock()
                                .map_err(|e| anyhow!("Failed to acquire lock: {}", e))?
                                .push(label.clone());
                            Ok(json!(label))
                        })
                    }),
            ),
        )
        .register(TypeDescriptor::interface("Node").field(FieldDescriptor::new("id", "ID!")).discriminator(
            |value| match value.get("kind").and_then(Value::as_str) {
                Some("author") => Some("Author".to_string()),
                Some("book") => Some("Book".to_string()),
                _ => None,
            },
        ))
        .register(TypeDescriptor::union("SearchResult", ["Book", "Author"]))
        .register(TypeDescriptor::enumeration("Genre", ["SCIFI", "FANTASY"]))
        .register(
            TypeDescriptor::object("Book")
                .implements("Node")
                .field(FieldDescriptor::new("id", "ID!"))
                .field(FieldDescriptor::new("title", "String!"))
                .field(FieldDescriptor::new("genre", "Genre"))
                .field(FieldDescriptor::new("secret", "String!").resolve_sync(|_ctx| Err(anyhow!("classified"))))
                .field(FieldDescriptor::new("author", "Author").resolve_with(|ctx| {
                    Box::pin(async move {
                        let id = ctx.parent_field("authorId");
                        Ok(ctx.load("Author", id).await?)
                    })
                })),
        )
        .register(
            TypeDescriptor::object("Author")
                .implements("Node")
                .field(FieldDescriptor::new("id", "ID!"))
                .field(FieldDescriptor::new("name", "String!")),
        )
        .query_type("Query")
        .mutation_type("Mutation")
        .build()
        .unwrap()
}

pub fn book_fetcher() -> InMemoryFetcher {
    let fetcher = InMemoryFetcher::new();
    for book in book_values() {
        fetcher.insert("Book", book["id"].clone(), book).unwrap();
    }
    fetcher
}

pub fn author_fetcher() -> InMemoryFetcher {
    let fetcher = InMemoryFetcher::new();
    for author in author_values() {
        fetcher.insert("Author", author["id"].clone(), author).unwrap();
    }
    fetcher
}

pub fn bookstore() -> Bookstore {
    bookstore_with(EngineConfig::default(), book_fetcher(), author_fetcher())
}

pub fn bookstore_with(config: EngineConfig, books: InMemoryFetcher, authors: InMemoryFetcher) -> Bookstore {
    let mutations = Arc::new(Mutex::new(Vec::new()));
    let engine = GraphQLEngine::builder()
        .with_schema(bookstore_schema(mutations.clone()))
        .with_fetcher("Book", books.clone())
        .with_fetcher("Author", authors.clone())
        .with_config(config)
        .build()
        .unwrap();
    Bookstore {
        engine,
        books,
        authors,
        mutations,
    }
}

/// `extensions.code` of every error, in order
pub fn error_codes(response: &Response) -> Vec<String> {
    response
        .errors
        .iter()
        .map(|e| e.code().unwrap_or_default().to_string())
        .collect()
}

/// Path of an error as JSON, for easy comparison
pub fn error_path(error: &GraphQLError) -> Value {
    serde_json::to_value(&error.path).unwrap()
}
