use std::path::Path;
use tempfile::TempDir;

use recipedb_core::cancel::Generation;
use recipedb_core::config::Settings;
use recipedb_core::corpus::load_recipes;
use recipedb_core::traits::Searcher;
use recipedb_core::types::{Score, SearchMode};
use recipedb_embed::{FakeEmbedder, FAKE_EMBEDDING_DIM};
use recipedb_query::loader::is_fatal;
use recipedb_query::{LoadState, Startup};
use recipedb_vector::{embed_corpus, write_embeddings, EmbeddingMatrix};

const CORPUS: &str = r#"[
  {"id": "r1", "title": "Chocolate Cake", "description": "Rich and moist", "ingredients": ["flour", "cocoa", "sugar"]},
  {"id": "r2", "title": "Tomato Soup", "description": "A warm bowl of comfort", "ingredients": ["tomatoes", "basil"]},
  {"id": 3, "title": "Garlic Bread", "description": "Crusty loaf with chocolate-free butter", "ingredients": ["bread", "garlic", "butter"]}
]"#;

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.data.corpus_json = "recipes.json".into();
    settings.data.embeddings_bin = "data/embeddings.bin".into();
    settings.model.use_fake = true;
    settings
}

fn corpus_embeddings(dir: &Path) -> EmbeddingMatrix {
    let recipes = load_recipes(&dir.join("recipes.json")).unwrap();
    embed_corpus(&FakeEmbedder::new(FAKE_EMBEDDING_DIM), &recipes, 2, false).unwrap()
}

fn write_corpus(dir: &Path) {
    std::fs::write(dir.join("recipes.json"), CORPUS).unwrap();
}

#[tokio::test]
async fn startup_serves_both_modes() {
    let tmp = TempDir::new().unwrap();
    write_corpus(tmp.path());
    write_embeddings(&tmp.path().join("data/embeddings.bin"), &corpus_embeddings(tmp.path())).unwrap();

    let mut startup = Startup::new(settings(), tmp.path());
    assert_eq!(startup.state(), &LoadState::Loading);
    let engine = startup.load().await.unwrap();
    assert_eq!(startup.state(), &LoadState::Ready);
    assert_eq!(engine.len(), 3);

    let generation = Generation::new();
    let soup = engine.recipe(1).unwrap().search_text();
    let semantic = engine.search(soup, SearchMode::Semantic, generation.ticket()).await.unwrap();
    assert_eq!(semantic.len(), 3);
    assert_eq!(semantic[0].record_id, "r2");
    match semantic[0].score {
        Score::Cosine(s) => assert!((s - 1.0).abs() < 1e-4, "self similarity {s}"),
        Score::Lexical(_) => panic!("semantic search returned a lexical score"),
    }

    let lexical = engine
        .search("garlic bread".into(), SearchMode::Lexical, generation.ticket())
        .await
        .unwrap();
    // title terms 20, phrase 20, ingredients 4; nothing else matches
    assert_eq!(lexical.len(), 1);
    assert_eq!(lexical[0].record_id, "3");
    assert_eq!(lexical[0].score, Score::Lexical(44));
}

#[tokio::test]
async fn stale_ticket_cancels_search() {
    let tmp = TempDir::new().unwrap();
    write_corpus(tmp.path());
    write_embeddings(&tmp.path().join("data/embeddings.bin"), &corpus_embeddings(tmp.path())).unwrap();
    let engine = Startup::new(settings(), tmp.path()).load().await.unwrap();

    let generation = Generation::new();
    let ticket = generation.ticket();
    generation.advance();
    let err = engine.search("soup".into(), SearchMode::Lexical, ticket).await.unwrap_err();
    assert!(recipedb_core::error::is_cancelled(&err));
}

#[tokio::test]
async fn missing_embeddings_is_recoverable() {
    let tmp = TempDir::new().unwrap();
    write_corpus(tmp.path());

    let mut startup = Startup::new(settings(), tmp.path());
    let Err(err) = startup.load().await else { panic!("startup should fail") };
    assert!(!is_fatal(&err));
    assert!(matches!(startup.state(), LoadState::Failed { recoverable: true, .. }));

    write_embeddings(&tmp.path().join("data/embeddings.bin"), &corpus_embeddings(tmp.path())).unwrap();
    let engine = startup.retry().await.unwrap();
    assert_eq!(engine.len(), 3);
    assert_eq!(startup.state(), &LoadState::Ready);
}

#[tokio::test]
async fn row_count_mismatch_is_fatal() {
    let tmp = TempDir::new().unwrap();
    write_corpus(tmp.path());
    let full = corpus_embeddings(tmp.path());
    let two_rows: Vec<Vec<f32>> = full.rows().take(2).map(<[f32]>::to_vec).collect();
    write_embeddings(&tmp.path().join("data/embeddings.bin"), &EmbeddingMatrix::from_rows(two_rows).unwrap())
        .unwrap();

    let mut startup = Startup::new(settings(), tmp.path());
    let Err(err) = startup.load().await else { panic!("startup should fail") };
    assert!(is_fatal(&err));
    match startup.state() {
        LoadState::Failed { message, recoverable } => {
            assert!(!recoverable);
            assert!(message.contains("2 rows"), "{message}");
        }
        other => panic!("unexpected state {other:?}"),
    }
    assert!(startup.retry().await.is_err());
}

#[tokio::test]
async fn dimension_mismatch_is_fatal() {
    let tmp = TempDir::new().unwrap();
    write_corpus(tmp.path());
    let recipes = load_recipes(&tmp.path().join("recipes.json")).unwrap();
    let small = embed_corpus(&FakeEmbedder::new(8), &recipes, 4, false).unwrap();
    write_embeddings(&tmp.path().join("data/embeddings.bin"), &small).unwrap();

    let mut startup = Startup::new(settings(), tmp.path());
    let Err(err) = startup.load().await else { panic!("startup should fail") };
    assert!(is_fatal(&err));
    assert!(matches!(startup.state(), LoadState::Failed { recoverable: false, .. }));
}
