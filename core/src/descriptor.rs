use crate::KeyPoint;

/// Raw descriptor payload. Binary descriptors compare by Hamming distance,
/// float descriptors by Euclidean distance.
#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorData {
    Binary(Vec<u8>),
    Float(Vec<f32>),
}

#[derive(Debug, Clone)]
pub struct Descriptor {
    pub data: DescriptorData,
    pub keypoint: KeyPoint,
}

impl Descriptor {
    pub fn binary(data: Vec<u8>, keypoint: KeyPoint) -> Self {
        Self {
            data: DescriptorData::Binary(data),
            keypoint,
        }
    }

    pub fn float(data: Vec<f32>, keypoint: KeyPoint) -> Self {
        Self {
            data: DescriptorData::Float(data),
            keypoint,
        }
    }

    pub fn size(&self) -> usize {
        match &self.data {
            DescriptorData::Binary(d) => d.len(),
            DescriptorData::Float(d) => d.len(),
        }
    }

    pub fn hamming_distance(a: &[u8], b: &[u8]) -> u32 {
        let mut chunks_a = a.chunks_exact(8);
        let mut chunks_b = b.chunks_exact(8);
        let mut dist = 0u32;
        for (ca, cb) in (&mut chunks_a).zip(&mut chunks_b) {
            let wa = u64::from_le_bytes([ca[0], ca[1], ca[2], ca[3], ca[4], ca[5], ca[6], ca[7]]);
            let wb = u64::from_le_bytes([cb[0], cb[1], cb[2], cb[3], cb[4], cb[5], cb[6], cb[7]]);
            dist += (wa ^ wb).count_ones();
        }
        dist + chunks_a
            .remainder()
            .iter()
            .zip(chunks_b.remainder())
            .map(|(x, y)| (x ^ y).count_ones())
            .sum::<u32>()
    }

    pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt()
    }

    /// Distance between two descriptors of the same kind. Descriptors of
    /// different kinds (or lengths) are never comparable and sit at infinity.
    pub fn distance(&self, other: &Descriptor) -> f32 {
        match (&self.data, &other.data) {
            (DescriptorData::Binary(a), DescriptorData::Binary(b)) if a.len() == b.len() => {
                Self::hamming_distance(a, b) as f32
            }
            (DescriptorData::Float(a), DescriptorData::Float(b)) if a.len() == b.len() => {
                Self::euclidean_distance(a, b)
            }
            _ => f32::INFINITY,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Descriptors {
    pub descriptors: Vec<Descriptor>,
}

impl Descriptors {
    pub fn new() -> Self {
        Self {
            descriptors: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            descriptors: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, desc: Descriptor) {
        self.descriptors.push(desc);
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.descriptors.iter()
    }

    pub fn get(&self, idx: usize) -> Option<&Descriptor> {
        self.descriptors.get(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn descriptor_hamming_identical_is_zero() {
        let kp = KeyPoint::new(0.0, 0.0);
        let d = Descriptor::binary(vec![0b10101010u8, 0b11110000, 0b00001111], kp);
        assert_eq!(d.distance(&d), 0.0);
    }

    #[test]
    fn descriptor_hamming_all_different_is_max() {
        let kp = KeyPoint::new(0.0, 0.0);
        let a = Descriptor::binary(vec![0xFFu8; 32], kp);
        let b = Descriptor::binary(vec![0x00u8; 32], kp);
        assert_eq!(a.distance(&b), 256.0);
    }

    #[test]
    fn hamming_handles_non_word_lengths() {
        // 8-byte word plus a 3-byte tail
        let a = vec![0xFFu8; 11];
        let mut b = vec![0xFFu8; 11];
        b[0] = 0xFE;
        b[10] = 0x00;
        assert_eq!(Descriptor::hamming_distance(&a, &b), 9);
    }

    #[test]
    fn descriptor_euclidean() {
        let kp = KeyPoint::new(0.0, 0.0);
        let a = Descriptor::float(vec![0.0, 3.0], kp);
        let b = Descriptor::float(vec![4.0, 0.0], kp);
        assert_relative_eq!(a.distance(&b), 5.0);
    }

    #[test]
    fn mixed_kinds_are_incomparable() {
        let kp = KeyPoint::new(0.0, 0.0);
        let a = Descriptor::float(vec![0.0; 4], kp);
        let b = Descriptor::binary(vec![0; 4], kp);
        assert!(a.distance(&b).is_infinite());
        let c = Descriptor::binary(vec![0; 8], kp);
        assert!(b.distance(&c).is_infinite());
    }

    #[test]
    fn descriptors_push_and_len() {
        let mut ds = Descriptors::new();
        assert!(ds.is_empty());
        ds.push(Descriptor::binary(vec![0u8; 8], KeyPoint::new(0.0, 0.0)));
        assert_eq!(ds.len(), 1);
        assert_eq!(ds.get(0).map(|d| d.size()), Some(8));
    }
}
