use std::fs;
use tempfile::TempDir;

use recipedb_core::config::Config;
use recipedb_core::corpus::{load_recipes, record_ids, Recipe, MAX_SEARCH_TEXT_CHARS};
use recipedb_core::types::{ResultPage, Score, SearchMode, SearchResult};

#[test]
fn load_recipes_accepts_numeric_and_missing_ids() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("recipes.json");
    fs::write(
        &path,
        r#"[
            {"id": 42, "title": "Chocolate Cake", "ingredients": ["flour", "cocoa"], "rating": "4.5"},
            {"title": "Vanilla Cake", "description": "Light and fluffy"}
        ]"#,
    )
    .unwrap();

    let recipes = load_recipes(&path).expect("load");
    assert_eq!(recipes.len(), 2);
    assert_eq!(recipes[0].rating, Some(4.5));
    assert_eq!(record_ids(&recipes), vec!["42".to_string(), "1".to_string()]);
}

#[test]
fn load_recipes_treats_null_fields_as_empty() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("recipes.json");
    fs::write(
        &path,
        r#"[
            {"title": "Soup", "description": null, "ingredients": ["water"], "url": null},
            {"title": "Bread", "ingredients": null, "rating": null},
            {"title": null, "description": "Untitled"}
        ]"#,
    )
    .unwrap();

    let recipes = load_recipes(&path).expect("null fields load");
    assert_eq!(recipes.len(), 3);
    assert_eq!(recipes[0].description, "");
    assert_eq!(recipes[0].ingredients, vec!["water".to_string()]);
    assert!(recipes[1].ingredients.is_empty());
    assert_eq!(recipes[1].rating, None);
    assert_eq!(recipes[2].title, "");
    assert_eq!(recipes[0].search_text(), "Soup Ingredients: water");
    assert_eq!(recipes[1].search_text(), "Bread");
}

#[test]
fn search_text_joins_fields_and_caps_ingredients() {
    let recipe = Recipe {
        title: "Soup".into(),
        description: "Warm".into(),
        ingredients: (0..12).map(|i| format!("i{i}")).collect(),
        ..Recipe::default()
    };
    let text = recipe.search_text();
    assert!(text.starts_with("Soup Warm Ingredients: i0, i1"));
    assert!(text.ends_with("i9"), "only the first ten ingredients: {text}");
}

#[test]
fn search_text_is_truncated() {
    let recipe = Recipe { title: "x".repeat(5000), ..Recipe::default() };
    assert_eq!(recipe.search_text().chars().count(), MAX_SEARCH_TEXT_CHARS);
}

#[test]
fn settings_defaults_and_overrides() {
    let config = Config::from_toml_str("[search]\npage_size = 5\ndefault_mode = \"lexical\"\n")
        .expect("config");
    let settings = config.settings().expect("settings");
    assert_eq!(settings.search.page_size, 5);
    assert_eq!(settings.search.default_mode, SearchMode::Lexical);
    assert_eq!(settings.search.debounce_ms, 150);
    assert_eq!(settings.model.batch_size, 32);

    let page_size: usize = config.get("search.page_size").expect("get");
    assert_eq!(page_size, 5);
}

#[test]
fn zero_page_size_is_rejected() {
    assert!(Config::from_toml_str("[search]\npage_size = 0\n").is_err());
}

#[test]
fn result_page_slices_prefix() {
    let ranked: Vec<SearchResult> = (0..5)
        .map(|i| SearchResult { index: i, record_id: i.to_string(), score: Score::Lexical(10) })
        .collect();

    let first = ResultPage::slice(&ranked, 0, 2);
    assert_eq!(first.results.len(), 2);
    assert_eq!(first.total_count, 5);
    assert!(first.has_more);

    let last = ResultPage::slice(&ranked, 2, 2);
    assert_eq!(last.results, ranked);
    assert!(!last.has_more);
}

#[test]
fn search_mode_parses() {
    assert_eq!("Lexical".parse::<SearchMode>().unwrap(), SearchMode::Lexical);
    assert_eq!("semantic".parse::<SearchMode>().unwrap(), SearchMode::Semantic);
    assert!("fuzzy".parse::<SearchMode>().is_err());
}
