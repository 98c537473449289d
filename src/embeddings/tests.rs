use super::*;

#[test]
fn similarity_of_a_vector_with_itself_is_one() {
    let v = vec![0.3, -1.2, 0.05, 2.0];
    let score = cosine_similarity(&v, &v).expect("should compute similarity");
    assert!((score - 1.0).abs() < 1e-6);
}

#[test]
fn similarity_rejects_length_mismatch() {
    let a = vec![1.0, 2.0, 3.0];
    let b = vec![1.0, 2.0];
    let err = cosine_similarity(&a, &b).expect_err("mismatched lengths must error");
    assert!(matches!(err, crate::SemdexError::Shape(_)));
}

#[test]
fn similarity_of_orthogonal_vectors_is_zero() {
    let a = vec![1.0, 0.0];
    let b = vec![0.0, 1.0];
    let score = cosine_similarity(&a, &b).expect("should compute similarity");
    assert!(score.abs() < 1e-6);
}

#[test]
fn zero_vector_has_zero_similarity() {
    let a = vec![0.0, 0.0, 0.0];
    let b = vec![1.0, 2.0, 3.0];
    let score = cosine_similarity(&a, &b).expect("should compute similarity");
    assert_eq!(score, 0.0);
}

#[test]
fn similarity_stays_in_range() {
    let a = vec![1e20, 1e20];
    let b = vec![1e20, 1e20];
    let score = cosine_similarity(&a, &b).expect("should compute similarity");
    assert!((-1.0..=1.0).contains(&score));
}

#[test]
fn hash_embedder_is_deterministic_and_normalized() {
    let embedder = HashEmbedder::new(64);
    let first = embedder.embed("some file contents").expect("should embed");
    let second = embedder.embed("some file contents").expect("should embed");

    assert_eq!(first, second);
    assert_eq!(first.len(), 64);

    let norm: f32 = first.iter().map(|v| v * v).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-4);
}

#[test]
fn hash_embedder_separates_unrelated_texts() {
    let embedder = HashEmbedder::new(128);
    let cooking = embedder
        .embed("recipe for tomato soup with basil and garlic")
        .expect("should embed");
    let cooking_again = embedder
        .embed("tomato soup recipe: basil, garlic, olive oil")
        .expect("should embed");
    let unrelated = embedder
        .embed("quarterly financial report fiscal year 2024")
        .expect("should embed");

    let close = cosine_similarity(&cooking, &cooking_again).expect("should compare");
    let far = cosine_similarity(&cooking, &unrelated).expect("should compare");
    assert!(close > far, "related texts should score higher ({close} vs {far})");
}
