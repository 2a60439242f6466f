use rand::Rng;
use rand_distr::{Dirichlet, Distribution};

/// Sample `len` values from a symmetric Dirichlet distribution.
pub fn dirichlet_noise<R: Rng + ?Sized>(alpha: f32, len: usize, rng: &mut R) -> Vec<f32> {
    match len {
        0 => Vec::new(),
        // The distribution needs at least two categories.
        1 => vec![1.0],
        _ => match Dirichlet::new_with_size(alpha, len) {
            Ok(dirichlet) => dirichlet.sample(rng),
            Err(_) => vec![1.0 / len as f32; len],
        },
    }
}
