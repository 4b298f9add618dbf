use mosaic_core::{Descriptors, FeatureMatch, Matches};

/// Lowe's ratio: a best match survives only if it is clearly better than the
/// runner-up.
pub const RATIO_TEST_THRESHOLD: f32 = 0.7;

pub struct Matcher {
    ratio_threshold: f32,
}

impl Default for Matcher {
    fn default() -> Self {
        Self {
            ratio_threshold: RATIO_TEST_THRESHOLD,
        }
    }
}

impl Matcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ratio_test(mut self, threshold: f32) -> Self {
        self.ratio_threshold = threshold;
        self
    }

    /// Brute-force 2-NN search from every query descriptor into `train`,
    /// filtered by the ratio test.
    ///
    /// A query with fewer than two candidates in `train` is rejected: with no
    /// runner-up there is no evidence the best match is distinctive.
    pub fn match_descriptors(&self, query: &Descriptors, train: &Descriptors) -> Matches {
        let knn = knn_match(query, train, 2);
        filter_matches_by_ratio_test(&knn, self.ratio_threshold)
    }
}

pub fn match_descriptors(query: &Descriptors, train: &Descriptors) -> Matches {
    Matcher::new().match_descriptors(query, train)
}

/// The `k` nearest train descriptors of each query descriptor, closest first.
/// Equal distances keep the lower train index first.
pub fn knn_match(query: &Descriptors, train: &Descriptors, k: usize) -> Vec<Vec<FeatureMatch>> {
    let mut all_matches: Vec<Vec<FeatureMatch>> = Vec::with_capacity(query.len());

    for (query_idx, q_desc) in query.iter().enumerate() {
        let mut distances: Vec<(usize, f32)> = train
            .iter()
            .enumerate()
            .map(|(idx, t_desc)| (idx, q_desc.distance(t_desc)))
            .filter(|(_, d)| d.is_finite())
            .collect();

        distances.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        let knn: Vec<FeatureMatch> = distances
            .into_iter()
            .take(k)
            .map(|(train_idx, distance)| FeatureMatch::new(query_idx, train_idx, distance))
            .collect();

        all_matches.push(knn);
    }

    all_matches
}

pub fn filter_matches_by_ratio_test(matches: &[Vec<FeatureMatch>], ratio: f32) -> Matches {
    let mut good_matches = Matches::new();

    for knn in matches {
        if let [best, second, ..] = knn.as_slice() {
            if best.distance < ratio * second.distance {
                good_matches.push(*best);
            }
        }
    }

    good_matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_core::{Descriptor, KeyPoint};

    fn binary(bytes: &[u8]) -> Descriptor {
        Descriptor::binary(bytes.to_vec(), KeyPoint::new(0.0, 0.0))
    }

    #[test]
    fn ratio_test_rejects_ambiguous_best() {
        let mut query = Descriptors::new();
        query.push(binary(&[0b0000_0000]));

        let mut train = Descriptors::new();
        train.push(binary(&[0b0000_0011])); // 2
        train.push(binary(&[0b0000_1100])); // 2
        assert!(match_descriptors(&query, &train).is_empty());

        let mut train = Descriptors::new();
        train.push(binary(&[0b0000_0001])); // 1
        train.push(binary(&[0b0011_1111])); // 6
        let m = match_descriptors(&query, &train);
        assert_eq!(m.len(), 1);
        assert_eq!(m.matches[0].train_idx, 0);
    }

    #[test]
    fn ratio_is_strict() {
        // 7 < 0.7 * 10 is false
        let knn = vec![vec![FeatureMatch::new(0, 0, 7.0), FeatureMatch::new(0, 1, 10.0)]];
        assert!(filter_matches_by_ratio_test(&knn, 0.7).is_empty());
    }

    #[test]
    fn single_candidate_is_rejected() {
        let mut query = Descriptors::new();
        query.push(binary(&[0xAA; 4]));
        let mut train = Descriptors::new();
        train.push(binary(&[0xAA; 4]));
        assert!(match_descriptors(&query, &train).is_empty());
    }

    #[test]
    fn empty_sides_give_no_matches() {
        let mut one = Descriptors::new();
        one.push(binary(&[1, 2, 3]));
        assert!(match_descriptors(&Descriptors::new(), &one).is_empty());
        assert!(match_descriptors(&one, &Descriptors::new()).is_empty());
    }
}
