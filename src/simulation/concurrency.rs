//! Data-parallel "for each particle run stage X" primitives.
//!
//! Every function returns only after all items were processed, so consecutive calls form the barrier
//! between solver passes. With the `single-threaded` feature the same signatures run sequentially.

pub use internal::*;

#[cfg(feature = "single-threaded")]
mod internal {
    pub fn par_iter_mut0<F: Fn(usize) + Send + Sync>(n: usize, f: F) {
        (0..n).into_iter().for_each(|idx| {
            f(idx);
        });
    }

    pub fn par_iter_mut1<T1: Send + Sync, F: Fn(usize, &mut T1) + Send + Sync>(arr1: &mut [T1], f: F) {
        arr1.iter_mut().enumerate().for_each(|(idx, v1)| {
            f(idx, v1);
        });
    }

    pub fn par_iter_mut2<T1: Send + Sync, T2: Send + Sync, F: Fn(usize, &mut T1, &mut T2) + Send + Sync>(
        arr1: &mut [T1],
        arr2: &mut [T2],
        f: F,
    ) {
        arr1.iter_mut()
            .zip(arr2.iter_mut())
            .enumerate()
            .for_each(|(idx, (v1, v2))| {
                f(idx, v1, v2);
            });
    }
}

#[cfg(not(feature = "single-threaded"))]
mod internal {
    use rayon::prelude::*;

    pub fn par_iter_mut0<F: Fn(usize) + Send + Sync>(n: usize, f: F) {
        (0..n).into_par_iter().for_each(|idx| {
            f(idx);
        });
    }

    pub fn par_iter_mut1<T1: Send + Sync, F: Fn(usize, &mut T1) + Send + Sync>(arr1: &mut [T1], f: F) {
        arr1.into_par_iter().enumerate().for_each(|(idx, v1)| {
            f(idx, v1);
        });
    }

    pub fn par_iter_mut2<T1: Send + Sync, T2: Send + Sync, F: Fn(usize, &mut T1, &mut T2) + Send + Sync>(
        arr1: &mut [T1],
        arr2: &mut [T2],
        f: F,
    ) {
        arr1.into_par_iter()
            .zip(arr2.into_par_iter())
            .enumerate()
            .for_each(|(idx, (v1, v2))| {
                f(idx, v1, v2);
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn every_index_is_visited_once() {
        let counter = AtomicUsize::new(0);
        let mut values = vec![0usize; 1000];
        par_iter_mut1(&mut values, |i, v| {
            *v = i * 2;
            counter.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(counter.load(Ordering::Relaxed), 1000);
        assert!(values.iter().enumerate().all(|(i, &v)| v == i * 2));
    }

    #[test]
    fn zipped_slices_stay_aligned() {
        let mut a = vec![0usize; 64];
        let mut b = vec![0usize; 64];
        par_iter_mut2(&mut a, &mut b, |i, a, b| {
            *a = i;
            *b = i + 1;
        });
        for i in 0..64 {
            assert_eq!((a[i], b[i]), (i, i + 1));
        }
    }
}
