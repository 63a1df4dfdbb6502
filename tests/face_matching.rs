mod common;

use common::*;
use nazr_faces::db::{FaceRepository, SqliteFaceRepository};
use nazr_faces::face::FaceMatcher;
use nazr_faces::models::{BoundingBox, DetectionResult};
use std::sync::Arc;

const DIM: usize = 128;

fn detection(x: f32, embedding: Option<Vec<f32>>) -> DetectionResult {
    DetectionResult {
        bbox: BoundingBox::from_corners(x, 10.0, x + 40.0, 50.0).unwrap(),
        confidence: 0.9,
        quality: Some(1.5),
        landmarks: Vec::new(),
        pose: None,
        embedding,
        model: "retinaface".to_string(),
    }
}

/// Stores one face per vector in a single image and returns their ids in order.
fn store_faces(repo: &SqliteFaceRepository, image: &str, vectors: Vec<Vec<f32>>) -> Vec<i64> {
    let dets: Vec<_> = vectors.into_iter().enumerate().map(|(i, v)| detection(i as f32 * 50.0, Some(v))).collect();
    repo.replace_untagged_faces(image, &dets, "face_recognition").unwrap()
}

fn matcher(repo: &Arc<SqliteFaceRepository>) -> FaceMatcher {
    FaceMatcher::new(repo.clone())
}

#[test]
fn test_identical_embeddings_match_at_one() {
    let env = setup_test_env();
    let ids = store_faces(&env.repo, "/p/a.jpg", vec![unit_x(DIM), unit_x(DIM), vector_with_similarity(0.3, DIM)]);

    let similar = matcher(&env.repo).find_similar_to_face(ids[0], 0.9, 10).unwrap();
    assert_eq!(similar.len(), 1);
    assert_eq!(similar[0].face_id, ids[1]);
    assert!((similar[0].similarity - 1.0).abs() < 1e-5);

    // The threshold is inclusive at exactly 1.0.
    let exact = matcher(&env.repo).find_similar_to_face(ids[0], 1.0, 10).unwrap();
    assert_eq!(exact.len(), 1);
}

#[test]
fn test_similar_faces_are_ranked_and_limited() {
    let env = setup_test_env();
    let ids = store_faces(
        &env.repo,
        "/p/b.jpg",
        vec![
            unit_x(DIM),
            vector_with_similarity(0.6, DIM),
            vector_with_similarity(0.95, DIM),
            vector_with_similarity(0.8, DIM),
        ],
    );

    let all = matcher(&env.repo).find_similar_to_face(ids[0], 0.0, 10).unwrap();
    let order: Vec<i64> = all.iter().map(|s| s.face_id).collect();
    assert_eq!(order, vec![ids[2], ids[3], ids[1]]);

    let top = matcher(&env.repo).find_similar_to_face(ids[0], 0.0, 2).unwrap();
    assert_eq!(top.len(), 2);
    assert!(top.iter().all(|s| s.face_id != ids[0]));
}

#[test]
fn test_face_without_embedding_has_no_matches() {
    let env = setup_test_env();
    let ids = env.repo.replace_untagged_faces("/p/c.jpg", &[detection(0.0, None)], "face_recognition").unwrap();
    store_faces(&env.repo, "/p/d.jpg", vec![unit_x(DIM)]);

    let m = matcher(&env.repo);
    assert!(m.find_similar_to_face(ids[0], 0.0, 10).unwrap().is_empty());
    assert!(m.suggest_person_for_face(ids[0]).unwrap().is_none());
}

#[test]
fn test_tagging_propagates_above_threshold_only() {
    let env = setup_test_env();
    let ids = store_faces(
        &env.repo,
        "/p/e.jpg",
        vec![unit_x(DIM), vector_with_similarity(0.85, DIM), vector_with_similarity(0.5, DIM)],
    );
    let person = env.repo.insert_person(Some("Layla")).unwrap();

    let propagated = matcher(&env.repo).tag_face_with_person(ids[0], person).unwrap();
    assert_eq!(propagated, vec![ids[1]]);

    let f1 = env.repo.get_face(ids[0]).unwrap().unwrap();
    let f2 = env.repo.get_face(ids[1]).unwrap().unwrap();
    let f3 = env.repo.get_face(ids[2]).unwrap().unwrap();
    assert_eq!(f1.person_id, Some(person));
    assert_eq!(f2.person_id, Some(person));
    assert_eq!(f3.person_id, None);
    assert_eq!(env.repo.faces_for_person(person).unwrap().len(), 2);
}

#[test]
fn test_propagation_leaves_other_owners_alone() {
    let env = setup_test_env();
    let ids = store_faces(&env.repo, "/p/f.jpg", vec![unit_x(DIM), vector_with_similarity(0.95, DIM)]);
    let first = env.repo.insert_person(Some("Omar")).unwrap();
    let second = env.repo.insert_person(Some("Yusuf")).unwrap();
    assert!(env.repo.tag_face(ids[1], second).unwrap());

    let propagated = matcher(&env.repo).tag_face_with_person(ids[0], first).unwrap();
    assert!(propagated.is_empty());
    assert_eq!(env.repo.get_face(ids[1]).unwrap().unwrap().person_id, Some(second));
}

#[test]
fn test_tagging_unknown_face_fails() {
    let env = setup_test_env();
    let person = env.repo.insert_person(Some("Nobody")).unwrap();
    assert!(matcher(&env.repo).tag_face_with_person(9999, person).is_err());
}

#[test]
fn test_suggestion_follows_majority() {
    let env = setup_test_env();
    let ids = store_faces(
        &env.repo,
        "/p/g.jpg",
        vec![
            unit_x(DIM),
            vector_with_similarity(0.99, DIM),
            vector_with_similarity(0.7, DIM),
            vector_with_similarity(0.65, DIM),
        ],
    );
    let a = env.repo.insert_person(Some("Aisha")).unwrap();
    let b = env.repo.insert_person(None).unwrap();
    env.repo.add_person_alias(b, "Bibi").unwrap();
    env.repo.tag_face(ids[1], a).unwrap();
    env.repo.tag_face(ids[2], b).unwrap();
    env.repo.tag_face(ids[3], b).unwrap();

    let s = matcher(&env.repo).suggest_person_for_face(ids[0]).unwrap().unwrap();
    assert_eq!(s.person_id, b);
    assert_eq!(s.person_name.as_deref(), Some("Bibi"));
    assert!((s.similarity - 0.7).abs() < 1e-4);
}

#[test]
fn test_suggestion_tie_goes_to_best_match() {
    let env = setup_test_env();
    let ids = store_faces(
        &env.repo,
        "/p/h.jpg",
        vec![unit_x(DIM), vector_with_similarity(0.6, DIM), vector_with_similarity(0.9, DIM)],
    );
    let a = env.repo.insert_person(Some("Aisha")).unwrap();
    let b = env.repo.insert_person(Some("Bilal")).unwrap();
    env.repo.tag_face(ids[1], a).unwrap();
    env.repo.tag_face(ids[2], b).unwrap();

    let s = matcher(&env.repo).suggest_person_for_face(ids[0]).unwrap().unwrap();
    assert_eq!(s.person_id, b);
    assert_eq!(s.person_name.as_deref(), Some("Bilal"));
}

#[test]
fn test_no_suggestion_without_identified_neighbors() {
    let env = setup_test_env();
    let ids = store_faces(&env.repo, "/p/i.jpg", vec![unit_x(DIM), vector_with_similarity(0.9, DIM)]);
    assert!(matcher(&env.repo).suggest_person_for_face(ids[0]).unwrap().is_none());
}

#[test]
fn test_deleted_faces_drop_out_of_matching() {
    let env = setup_test_env();
    let ids = store_faces(&env.repo, "/p/j.jpg", vec![unit_x(DIM), unit_x(DIM)]);
    assert!(env.repo.soft_delete_face(ids[1]).unwrap());

    assert!(matcher(&env.repo).find_similar_to_face(ids[0], 0.5, 10).unwrap().is_empty());
}

#[test]
fn test_untag_makes_face_unowned() {
    let env = setup_test_env();
    let ids = store_faces(&env.repo, "/p/k.jpg", vec![unit_x(DIM)]);
    let person = env.repo.insert_person(Some("Sara")).unwrap();
    matcher(&env.repo).tag_face_with_person(ids[0], person).unwrap();

    assert!(matcher(&env.repo).untag_face(ids[0]).unwrap());
    assert!(env.repo.get_face(ids[0]).unwrap().unwrap().person_id.is_none());
    assert!(env.repo.faces_for_person(person).unwrap().is_empty());
}
