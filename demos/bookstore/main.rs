//! Bookstore example: batched loading on a local schema, then the same
//! catalog split across federated services

use anyhow::anyhow;
use std::time::Duration;
use this_graphql::prelude::*;

fn local_schema() -> Result<SchemaRegistry> {
    let schema = SchemaBuilder::new()
        .register(
            TypeDescriptor::object("Query")
                .field(FieldDescriptor::new("books", "[Book!]!").resolve_with(|ctx| {
                    Box::pin(async move {
                        let books = ctx.load_many("Book", ["1", "2", "3"]).await?;
                        Ok(Value::Array(books))
                    })
                }))
                .field(FieldDescriptor::new("slow", "String").resolve_with(|_ctx| {
                    Box::pin(async move {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(json!("too late"))
                    })
                })),
        )
        .register(
            TypeDescriptor::object("Book")
                .field(FieldDescriptor::new("id", "ID!"))
                .field(FieldDescriptor::new("title", "String!"))
                .field(FieldDescriptor::new("author", "Author").resolve_with(|ctx| {
                    Box::pin(async move {
                        let id = ctx.parent_field("authorId");
                        Ok(ctx.load("Author", id).await?)
                    })
                })),
        )
        .register(
            TypeDescriptor::object("Author")
                .field(FieldDescriptor::new("id", "ID!"))
                .field(FieldDescriptor::new("name", "String!")),
        )
        .build()?;
    Ok(schema)
}

fn federated_schema() -> Result<SchemaRegistry> {
    let schema = SchemaBuilder::new()
        .register(TypeDescriptor::object("Query").field(FieldDescriptor::new("topBooks", "[Book]").service("catalog")))
        .register(
            TypeDescriptor::object("Book")
                .key("id")
                .field(FieldDescriptor::new("id", "ID!"))
                .field(FieldDescriptor::new("title", "String"))
                .field(FieldDescriptor::new("rating", "Float").service("reviews"))
                .field(FieldDescriptor::new("weight", "Int").service("inventory"))
                .field(
                    FieldDescriptor::new("inStock", "Boolean")
                        .service("warehouse")
                        .requires(["weight"]),
                ),
        )
        .build()?;
    Ok(schema)
}

/// Books under 2kg are always in stock
struct Warehouse;

#[async_trait]
impl SubgraphService for Warehouse {
    async fn execute(&self, request: SubgraphRequest) -> Result<SubgraphResponse> {
        let representations = request
            .variables
            .get("representations")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow!("warehouse only resolves entities"))?;
        let entities: Vec<Value> = representations
            .iter()
            .map(|r| json!({"inStock": r["weight"].as_i64().is_some_and(|w| w < 2)}))
            .collect();
        Ok(SubgraphResponse::data(json!({ "_entities": entities })))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("📚 this-graphql bookstore example\n");

    // === Local schema with batch fetchers ===
    let books = InMemoryFetcher::new()
        .with_entity("Book", json!("1"), json!({"id": "1", "title": "Dune", "authorId": "a1"}))?
        .with_entity(
            "Book",
            json!("2"),
            json!({"id": "2", "title": "The Dispossessed", "authorId": "a2"}),
        )?
        .with_entity(
            "Book",
            json!("3"),
            json!({"id": "3", "title": "Children of Dune", "authorId": "a1"}),
        )?;
    let authors = InMemoryFetcher::new()
        .with_entity("Author", json!("a1"), json!({"id": "a1", "name": "Frank Herbert"}))?
        .with_entity("Author", json!("a2"), json!({"id": "a2", "name": "Ursula K. Le Guin"}))?;

    let engine = GraphQLEngine::builder()
        .with_schema(local_schema()?)
        .with_fetcher("Book", books)
        .with_fetcher("Author", authors.clone())
        .build()?;

    let response = engine
        .execute(Request::new("{ books { title author { name } } }"))
        .await;
    println!("Batched query:\n{}", serde_json::to_string_pretty(&response.to_json())?);
    println!("Author fetch calls: {}\n", authors.call_count());

    let response = engine
        .execute(Request::new("{ books { title } slow }").timeout(Duration::from_millis(100)))
        .await;
    println!("With a deadline:\n{}\n", serde_json::to_string_pretty(&response.to_json())?);

    // === Federated services ===
    let catalog = InMemorySubgraph::new().with_root(
        "topBooks",
        json!([
            {"__typename": "Book", "id": "1", "title": "Dune"},
            {"__typename": "Book", "id": "2", "title": "The Dispossessed"},
        ]),
    )?;
    let reviews = InMemorySubgraph::new().with_entities(
        "Book",
        &["id"],
        vec![json!({"id": "1", "rating": 4.6}), json!({"id": "2", "rating": 4.3})],
    )?;
    let inventory = InMemorySubgraph::new().with_entities(
        "Book",
        &["id"],
        vec![json!({"id": "1", "weight": 3}), json!({"id": "2", "weight": 1})],
    )?;

    let federated = GraphQLEngine::builder()
        .with_schema(federated_schema()?)
        .with_service("catalog", catalog)
        .with_service("reviews", reviews)
        .with_service("inventory", inventory)
        .with_service("warehouse", Warehouse)
        .build()?;

    let response = federated
        .execute(Request::new("{ topBooks { title rating inStock } }"))
        .await;
    println!("Federated query:\n{}", serde_json::to_string_pretty(&response.to_json())?);

    Ok(())
}
