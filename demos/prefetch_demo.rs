//! Prefetch Demo Application
//!
//! Seeds an in-memory blog, then prefetches posts with their authors,
//! comments and comment authors, first eagerly and then lazily, and prints
//! how many cache round trips each strategy needed.
//!
//! Usage:
//!   cargo run --example prefetch_demo
//!
//! Environment variables (also read from `.env`):
//!   IDC_NAMESPACE    - cache key namespace (default: IDC:1)
//!   IDC_FILL_LOCK_MS - fill lock wait in milliseconds (default: disabled)
//!   RUST_LOG         - log filter (default: info)

use ouroboros_cache::cache::{CacheConfig, CacheContext, MemoryBackend};
use ouroboros_cache::loader::{AssociationIdsLoader, DomainKey, KeySpace, Loader, MemorySource, PrimaryIndexLoader, Record};
use ouroboros_cache::prefetch::{RelationSpec, Relationship, RelationshipRegistry};
use ouroboros_cache::{CacheEngine, Result};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const POSTS: i64 = 20;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("=== Prefetch Demo ===");

    let config = CacheConfig::from_env()?;
    let source = Arc::new(MemorySource::new());
    seed(&source);
    let space = KeySpace::new(config.namespace.clone(), "v1");

    let spec = RelationSpec::from_json(&json!({"author": [], "comments": "author"}))?;
    let ids: Vec<DomainKey> = (1..=POSTS).map(DomainKey::from).collect();

    // Separate backends so both strategies start cold
    for lazy in [false, true] {
        let backend = MemoryBackend::new();
        let engine = CacheEngine::new(Arc::new(backend.clone()), config.clone(), registry(&source, &space)?)?;
        let posts = engine.entity("Post")?;
        let ctx = CacheContext::default();

        let roots = posts.fetch_multi(&ctx, &ids).await?;
        backend.reset_stats().await;
        source.reset_query_count();

        let (label, result) = if lazy {
            let mut strategy = engine.lazy(ctx.clone());
            let result = posts.prefetch_with(&spec, roots, &mut strategy).await?;
            info!("Lazy strategy flushed {} rounds", strategy.rounds());
            ("lazy", result)
        } else {
            let mut strategy = engine.eager(ctx.clone());
            let result = posts.prefetch_with(&spec, roots, &mut strategy).await?;
            info!("Eager strategy issued {} loads", strategy.loads());
            ("eager", result)
        };

        let stats = backend.stats().await;
        info!("\n--- {} prefetch ---", label);
        for path in result.paths() {
            info!("  {}: {} records", path, result.records(path).len());
        }
        info!(
            "  cache reads: {}, cache writes: {}, source queries: {}",
            stats.reads,
            stats.writes,
            source.query_count()
        );
    }

    info!("\n=== Demo Complete ===");
    Ok(())
}

fn seed(source: &MemorySource) {
    for user in 1..=5 {
        source.insert("users", Record::new(user).with("name", format!("user {}", user)));
    }
    for post in 1..=POSTS {
        source.insert("posts", Record::new(post).with("author_id", post % 5 + 1).with("title", format!("Post {}", post)));
        for n in 0..3 {
            source.insert(
                "comments",
                Record::new(post * 10 + n).with("post_id", post).with("author_id", (post + n) % 5 + 1),
            );
        }
    }
}

fn registry(source: &Arc<MemorySource>, space: &KeySpace) -> Result<RelationshipRegistry> {
    let users: Arc<dyn Loader> = Arc::new(PrimaryIndexLoader::new(source.clone(), space.clone(), "User", "users"));
    let comments: Arc<dyn Loader> =
        Arc::new(PrimaryIndexLoader::new(source.clone(), space.clone(), "Comment", "comments"));
    let comment_ids: Arc<dyn Loader> = Arc::new(AssociationIdsLoader::new(
        source.clone(),
        space.clone(),
        "Post",
        "comments",
        "comments",
        "post_id",
    ));

    let mut registry = RelationshipRegistry::new();
    // Post blobs carry their comment ids, so comments load in the same round as authors
    let posts = PrimaryIndexLoader::new(source.clone(), space.clone(), "Post", "posts")
        .with_child_ids("comment_ids", "comments", "post_id");
    registry.register_entity("Post", Arc::new(posts))?;
    registry.register_entity("User", users.clone())?;
    registry.register_entity("Comment", comments.clone())?;
    registry.register_relationship("Post", Relationship::belongs_to("author", "User", "author_id", users.clone()))?;
    registry.register_relationship(
        "Post",
        Relationship::has_many_ids("comments", "Comment", comment_ids, comments).with_ids_field("comment_ids"),
    )?;
    registry.register_relationship("Comment", Relationship::belongs_to("author", "User", "author_id", users))?;

    Ok(registry)
}
