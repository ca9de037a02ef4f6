use recipedb_cli::{excerpt, format_hit, EXCERPT_CHARS};
use recipedb_core::corpus::Recipe;
use recipedb_core::types::{Score, SearchResult};

fn hit() -> SearchResult {
    SearchResult { index: 0, record_id: "r7".into(), score: Score::Cosine(0.8123) }
}

#[test]
fn hit_shows_description_rating_and_link() {
    let recipe = Recipe {
        title: "Tomato Soup".into(),
        description: "A warm bowl".into(),
        rating: Some(4.5),
        url: Some("https://example.org/soup".into()),
        ..Recipe::default()
    };
    let text = format_hit(1, &hit(), Some(&recipe));
    assert_eq!(
        text,
        "\n1. [0.812] Tomato Soup\n   ID: r7\n   A warm bowl\n   ⭐ Rating: 4.5\n   🔗 https://example.org/soup"
    );
}

#[test]
fn missing_optional_fields_are_skipped() {
    let recipe = Recipe { title: "Bread".into(), ..Recipe::default() };
    assert_eq!(format_hit(3, &hit(), Some(&recipe)), "\n3. [0.812] Bread\n   ID: r7");
    assert_eq!(format_hit(2, &hit(), None), "\n2. [0.812] <unknown>\n   ID: r7");
}

#[test]
fn long_descriptions_are_cut_at_char_boundaries() {
    let long = "é".repeat(EXCERPT_CHARS + 5);
    let cut = excerpt(&long, EXCERPT_CHARS);
    assert!(cut.ends_with("..."));
    assert_eq!(cut.chars().count(), EXCERPT_CHARS + 3);

    let exact = "a".repeat(EXCERPT_CHARS);
    assert_eq!(excerpt(&exact, EXCERPT_CHARS), exact);
}
