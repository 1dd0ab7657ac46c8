//! Cutmix augmentation over feature slots

use ndarray::Array2;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::data::EncodedBatch;

/// Pair every row with another row of the batch
///
/// The pairing follows a random cycle through the batch, so no row is its
/// own partner when the batch has more than one row.
pub fn pair_rows<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);
    let mut partner = vec![0; n];
    for (i, &row) in order.iter().enumerate() {
        partner[row] = order[(i + 1) % n];
    }
    partner
}

/// Swap each slot with its partner row's value with probability `probability`
///
/// Returns the mixed batch (targets dropped) and the `[batch, slots]` mask
/// of swapped slots. Slots are ordered categorical first, as in the model.
pub fn cutmix<R: Rng + ?Sized>(
    batch: &EncodedBatch,
    probability: f64,
    rng: &mut R,
) -> (EncodedBatch, Array2<bool>) {
    let n = batch.n_rows();
    let n_cat = batch.categorical.ncols();
    let slots = batch.n_slots();
    let mut mixed = batch.features_only();
    let mut mask = Array2::from_elem((n, slots), false);
    if n < 2 {
        return (mixed, mask);
    }

    let partner = pair_rows(n, rng);
    for (row, &other) in partner.iter().enumerate() {
        for slot in 0..slots {
            if rng.gen::<f64>() >= probability {
                continue;
            }
            mask[[row, slot]] = true;
            if slot < n_cat {
                mixed.categorical[[row, slot]] = batch.categorical[[other, slot]];
            } else {
                let j = slot - n_cat;
                mixed.continuous[[row, j]] = batch.continuous[[other, j]];
            }
        }
    }
    (mixed, mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::EncodedData;
    use ndarray::Array2;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn batch(n: usize) -> EncodedData {
        EncodedData::new(
            Array2::from_shape_fn((n, 2), |(i, j)| i * 10 + j),
            Array2::from_shape_fn((n, 3), |(i, j)| (i * 10 + j) as f64 + 0.5),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_no_row_paired_with_itself() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(9);
        for n in 2..20 {
            let partner = pair_rows(n, &mut rng);
            assert!(partner.iter().enumerate().all(|(i, &p)| i != p));
            let mut sorted = partner.clone();
            sorted.sort_unstable();
            assert_eq!(sorted, (0..n).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_mask_is_reproducible() {
        let b = batch(8);
        let (m1, mask1) = cutmix(&b, 0.3, &mut Xoshiro256PlusPlus::seed_from_u64(1));
        let (m2, mask2) = cutmix(&b, 0.3, &mut Xoshiro256PlusPlus::seed_from_u64(1));
        assert_eq!(mask1, mask2);
        assert_eq!(m1.categorical, m2.categorical);
        assert_eq!(m1.continuous, m2.continuous);
    }

    #[test]
    fn test_only_masked_slots_change() {
        let b = batch(6);
        let (mixed, mask) = cutmix(&b, 0.5, &mut Xoshiro256PlusPlus::seed_from_u64(3));
        assert!(mask.iter().any(|&m| m));
        for i in 0..6 {
            for j in 0..2 {
                let changed = mixed.categorical[[i, j]] != b.categorical[[i, j]];
                assert_eq!(changed, mask[[i, j]]);
            }
            for j in 0..3 {
                let changed = mixed.continuous[[i, j]] != b.continuous[[i, j]];
                assert_eq!(changed, mask[[i, 2 + j]]);
            }
        }
        assert!(mixed.targets.is_none());
    }

    #[test]
    fn test_probability_extremes() {
        let b = batch(5);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let (_, none) = cutmix(&b, 0.0, &mut rng);
        assert!(none.iter().all(|&m| !m));
        let (_, all) = cutmix(&b, 1.0, &mut rng);
        assert!(all.iter().all(|&m| m));

        let (single, mask) = cutmix(&batch(1), 1.0, &mut rng);
        assert!(mask.iter().all(|&m| !m));
        assert_eq!(single.continuous, batch(1).continuous);
    }
}
