use std::fs;
use tempfile::TempDir;

use recipedb_core::corpus::Recipe;
use recipedb_core::error::Error;
use recipedb_embed::FakeEmbedder;
use recipedb_vector::{embed_corpus, read_embeddings, write_embeddings, EmbeddingMatrix, VectorIndex};

fn ids(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("r{i}")).collect()
}

fn three_by_four() -> VectorIndex {
    let rows = vec![
        vec![1.0, 0.0, 0.0, 0.0],
        vec![0.0, 1.0, 0.0, 0.0],
        vec![0.7, 0.7, 0.0, 0.0],
    ];
    VectorIndex::from_rows(rows, ids(3)).expect("index")
}

#[test]
fn ranks_three_row_corpus() {
    let index = three_by_four();
    let ranked = index.rank_all(&[1.0, 0.0, 0.0, 0.0]).unwrap();
    let order: Vec<usize> = ranked.iter().map(|(i, _)| *i).collect();
    assert_eq!(order, vec![0, 2, 1]);
    assert!((ranked[0].1 - 1.0).abs() < 1e-6);
    assert!((ranked[1].1 - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-4);
    assert!(ranked[2].1.abs() < 1e-6);
    assert_eq!(index.record_id(2).map(String::as_str), Some("r2"));
}

#[test]
fn query_is_normalized_before_scoring() {
    let index = three_by_four();
    let ranked = index.rank_all(&[5.0, 0.0, 0.0, 0.0]).unwrap();
    assert!((ranked[0].1 - 1.0).abs() < 1e-6);
}

#[test]
fn top_k_is_prefix_of_rank_all() {
    let rows: Vec<Vec<f32>> = (0..50)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let x = i as f32;
            vec![(x * 0.37).sin(), (x * 0.11).cos(), (x % 7.0) - 3.0]
        })
        .collect();
    let index = VectorIndex::from_rows(rows, ids(50)).unwrap();
    let query = [0.3, -0.8, 0.2];
    let all = index.rank_all(&query).unwrap();
    assert_eq!(all.len(), 50);
    assert!(all.windows(2).all(|w| w[0].1 >= w[1].1));
    for k in [0, 1, 7, 49, 50, 80] {
        let top = index.top_k(&query, k).unwrap();
        assert_eq!(top.len(), k.min(50));
        assert_eq!(top[..], all[..k.min(50)]);
    }
}

#[test]
fn ties_keep_row_order() {
    let rows = vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![0.0, 1.0], vec![0.0, 1.0]];
    let index = VectorIndex::from_rows(rows, ids(4)).unwrap();
    let ranked = index.rank_all(&[0.0, 1.0]).unwrap();
    let order: Vec<usize> = ranked.iter().map(|(i, _)| *i).collect();
    assert_eq!(order, vec![0, 2, 3, 1]);
    let top = index.top_k(&[0.0, 1.0], 2).unwrap();
    assert_eq!(top.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 2]);
}

#[test]
fn zero_query_scores_zero_not_nan() {
    let index = three_by_four();
    let ranked = index.rank_all(&[0.0; 4]).unwrap();
    assert!(ranked.iter().all(|(_, s)| *s == 0.0));
    assert_eq!(ranked.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2]);
}

#[test]
fn wrong_query_dimension_is_input_error() {
    let err = three_by_four().top_k(&[1.0, 0.0], 2).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::InputMismatch(_))));
}

#[test]
fn id_count_must_match_rows() {
    let err = VectorIndex::from_rows(vec![vec![1.0, 0.0]], ids(2)).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::InputMismatch(_))));
}

#[test]
fn embeddings_file_round_trips_byte_for_byte() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("nested").join("embeddings.bin");
    let matrix = EmbeddingMatrix { count: 2, dim: 3, data: vec![0.5, -1.0, 2.25, 0.0, 1e-7, -3.5] };
    write_embeddings(&path, &matrix).unwrap();

    let bytes = fs::read(&path).unwrap();
    assert_eq!(bytes.len(), 8 + 6 * 4);
    assert_eq!(&bytes[..4], &2i32.to_le_bytes());
    assert_eq!(&bytes[4..8], &3i32.to_le_bytes());

    let back = read_embeddings(&path).unwrap();
    assert_eq!(back, matrix);
    assert_eq!(back.row(1), Some(&[0.0, 1e-7, -3.5][..]));

    let again = tmp.path().join("again.bin");
    write_embeddings(&again, &back).unwrap();
    assert_eq!(fs::read(&again).unwrap(), bytes);
}

#[test]
fn truncated_file_is_malformed() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("embeddings.bin");
    let mut bytes = 4i32.to_le_bytes().to_vec();
    bytes.extend_from_slice(&2i32.to_le_bytes());
    bytes.extend_from_slice(&[0u8; 12]);
    fs::write(&path, bytes).unwrap();

    let err = read_embeddings(&path).unwrap_err();
    let domain = err.chain().find_map(|c| c.downcast_ref::<Error>());
    assert!(matches!(domain, Some(Error::MalformedEmbeddings(_))));
}

#[test]
fn corpus_embedding_runs_in_batches() {
    let recipes: Vec<Recipe> = (0..5)
        .map(|i| Recipe { title: format!("recipe {i}"), ..Recipe::default() })
        .collect();
    let embedder = FakeEmbedder::new(256);
    let matrix = embed_corpus(&embedder, &recipes, 2, false).unwrap();
    assert_eq!((matrix.count, matrix.dim), (5, 256));

    let index = VectorIndex::from_matrix(&matrix, ids(5), &candle_core::Device::Cpu).unwrap();
    let query = matrix.row(3).unwrap().to_vec();
    assert_eq!(index.top_k(&query, 1).unwrap()[0].0, 3);
}
