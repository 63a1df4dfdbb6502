use crate::db::FaceRepository;
use crate::face::embedding::calculate_similarity;
use crate::models::EmbeddingCandidate;
use anyhow::{bail, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Neighbours consulted when suggesting a person.
pub const SUGGESTION_NEIGHBORS: usize = 10;
/// Neighbours consulted when propagating a new tag.
pub const AUTO_TAG_NEIGHBORS: usize = 20;
/// Propagation only tags neighbours strictly above this similarity.
pub const AUTO_TAG_THRESHOLD: f32 = 0.8;
/// Suggestion ignores neighbours at or below this similarity.
pub const SUGGESTION_FLOOR: f32 = 0.0;

// Float slack for `>= threshold` so identical vectors match at 1.0.
const SIMILARITY_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarFace {
    pub face_id: i64,
    pub person_id: Option<i64>,
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonSuggestion {
    pub person_id: i64,
    pub person_name: Option<String>,
    pub similarity: f32,
}

/// Scores every candidate against `target` and returns up to `limit` matches
/// at or above `threshold`, best first. `exclude_face` drops the query face.
pub fn find_similar_faces(
    target: &[f32],
    candidates: &[EmbeddingCandidate],
    threshold: f32,
    limit: usize,
    exclude_face: Option<i64>,
) -> Vec<SimilarFace> {
    let mut scored: Vec<SimilarFace> = candidates
        .par_iter()
        .filter(|c| Some(c.face_id) != exclude_face)
        .map(|c| SimilarFace {
            face_id: c.face_id,
            person_id: c.person_id,
            similarity: calculate_similarity(target, &c.vector).clamp(-1.0, 1.0),
        })
        .filter(|s| s.similarity + SIMILARITY_EPSILON >= threshold)
        .collect();
    scored.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(Ordering::Equal));
    scored.truncate(limit);
    scored
}

/// Top-`limit` ranking with no threshold beyond zero similarity.
pub fn rank_similar_faces(
    target: &[f32],
    candidates: &[EmbeddingCandidate],
    limit: usize,
    exclude_face: Option<i64>,
) -> Vec<SimilarFace> {
    find_similar_faces(target, candidates, 0.0, limit, exclude_face)
}

/// Majority vote over the identified neighbours. Ties go to the person with
/// the best single match, then to the lower person id.
pub fn vote_person(neighbors: &[SimilarFace]) -> Option<(i64, f32)> {
    let mut tally: HashMap<i64, (usize, f32)> = HashMap::new();
    for n in neighbors.iter().filter(|n| n.similarity > SUGGESTION_FLOOR) {
        let Some(person_id) = n.person_id else { continue };
        let entry = tally.entry(person_id).or_insert((0, f32::NEG_INFINITY));
        entry.0 += 1;
        entry.1 = entry.1.max(n.similarity);
    }
    tally
        .into_iter()
        .max_by(|(id_a, (count_a, best_a)), (id_b, (count_b, best_b))| {
            count_a
                .cmp(count_b)
                .then(best_a.partial_cmp(best_b).unwrap_or(Ordering::Equal))
                .then(id_b.cmp(id_a))
        })
        .map(|(person_id, (_, best))| (person_id, best))
}

/// Similarity search, suggestion and tagging over a [`FaceRepository`].
#[derive(Clone)]
pub struct FaceMatcher {
    repo: Arc<dyn FaceRepository>,
}

impl FaceMatcher {
    pub fn new(repo: Arc<dyn FaceRepository>) -> Self {
        Self { repo }
    }

    /// Faces resembling `face_id`. A face without an embedding has no matches.
    pub fn find_similar_to_face(&self, face_id: i64, threshold: f32, limit: usize) -> Result<Vec<SimilarFace>> {
        let Some(query) = self.repo.embedding_for_face(face_id)? else {
            return Ok(Vec::new());
        };
        let candidates = self.repo.embedding_candidates()?;
        Ok(find_similar_faces(&query.vector, &candidates, threshold, limit, Some(face_id)))
    }

    fn ranked_neighbors(&self, face_id: i64, limit: usize) -> Result<Vec<SimilarFace>> {
        let Some(query) = self.repo.embedding_for_face(face_id)? else {
            return Ok(Vec::new());
        };
        let candidates = self.repo.embedding_candidates()?;
        Ok(rank_similar_faces(&query.vector, &candidates, limit, Some(face_id)))
    }

    pub fn suggest_person_for_face(&self, face_id: i64) -> Result<Option<PersonSuggestion>> {
        let neighbors = self.ranked_neighbors(face_id, SUGGESTION_NEIGHBORS)?;
        let Some((person_id, similarity)) = vote_person(&neighbors) else {
            return Ok(None);
        };
        let person_name = self.repo.person_display_name(person_id)?;
        Ok(Some(PersonSuggestion { person_id, person_name, similarity }))
    }

    /// Tags the face, then tags untagged look-alikes with the same person.
    /// Returns the ids tagged by propagation; propagation problems are only
    /// logged.
    pub fn tag_face_with_person(&self, face_id: i64, person_id: i64) -> Result<Vec<i64>> {
        if !self.repo.tag_face(face_id, person_id)? {
            bail!("face {} not found", face_id);
        }
        Ok(self.propagate_tag(face_id, person_id))
    }

    pub fn untag_face(&self, face_id: i64) -> Result<bool> {
        self.repo.untag_face(face_id)
    }

    fn propagate_tag(&self, face_id: i64, person_id: i64) -> Vec<i64> {
        let neighbors = match self.ranked_neighbors(face_id, AUTO_TAG_NEIGHBORS) {
            Ok(n) => n,
            Err(e) => {
                warn!("Auto-tag search for face {} failed: {:#}", face_id, e);
                return Vec::new();
            }
        };

        let mut tagged = Vec::new();
        for n in neighbors {
            if n.person_id.is_some() || n.similarity <= AUTO_TAG_THRESHOLD {
                continue;
            }
            match self.repo.tag_untagged_face(n.face_id, person_id) {
                Ok(true) => tagged.push(n.face_id),
                Ok(false) => debug!("Face {} was claimed before auto-tagging", n.face_id),
                Err(e) => warn!("Failed to auto-tag face {} with person {}: {:#}", n.face_id, person_id, e),
            }
        }
        if !tagged.is_empty() {
            info!("Auto-tagged {} faces with person {} from face {}", tagged.len(), person_id, face_id);
        }
        tagged
    }
}
