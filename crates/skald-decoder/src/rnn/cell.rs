//! GRU and LSTM cell forward passes.
//!
//! Gate weights follow the stacked `[gates * hidden, in]` layout with two
//! bias vectors, gate order `r, z, n` for GRU and `i, f, g, o` for LSTM.

use anyhow::{ensure, Result};
use ndarray::{s, Array1, Array2};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;

use crate::activations::{sigmoid_scalar, tanh_scalar};

pub struct GruCell {
    w_ih: Array2<f32>,
    w_hh: Array2<f32>,
    b_ih: Array1<f32>,
    b_hh: Array1<f32>,
    input_size: usize,
    hidden_size: usize,
}

impl GruCell {
    pub fn new(
        w_ih: Array2<f32>,
        w_hh: Array2<f32>,
        b_ih: Array1<f32>,
        b_hh: Array1<f32>,
    ) -> Result<Self> {
        let hidden_size = w_hh.ncols();
        let input_size = w_ih.ncols();
        ensure!(
            w_ih.nrows() == 3 * hidden_size
                && w_hh.nrows() == 3 * hidden_size
                && b_ih.len() == 3 * hidden_size
                && b_hh.len() == 3 * hidden_size,
            "GRU gate weights must stack 3 * hidden_size rows"
        );
        Ok(Self {
            w_ih,
            w_hh,
            b_ih,
            b_hh,
            input_size,
            hidden_size,
        })
    }

    pub fn random<R: Rng>(input_size: usize, hidden_size: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (hidden_size as f32).sqrt();
        let dist = Uniform::new(-bound, bound);
        Self {
            w_ih: Array2::random_using((3 * hidden_size, input_size), dist, rng),
            w_hh: Array2::random_using((3 * hidden_size, hidden_size), dist, rng),
            b_ih: Array1::random_using(3 * hidden_size, dist, rng),
            b_hh: Array1::random_using(3 * hidden_size, dist, rng),
            input_size,
            hidden_size,
        }
    }

    /// One transition: `h' = (1 - z) * n + z * h`.
    pub fn step(&self, input: &Array2<f32>, h: &Array2<f32>) -> Array2<f32> {
        let hs = self.hidden_size;

        let gi = input.dot(&self.w_ih.t()) + &self.b_ih;
        let gh = h.dot(&self.w_hh.t()) + &self.b_hh;

        let mut r = &gi.slice(s![.., ..hs]) + &gh.slice(s![.., ..hs]);
        r.mapv_inplace(sigmoid_scalar);

        let mut z = &gi.slice(s![.., hs..2 * hs]) + &gh.slice(s![.., hs..2 * hs]);
        z.mapv_inplace(sigmoid_scalar);

        let mut n = &gi.slice(s![.., 2 * hs..]) + &(&r * &gh.slice(s![.., 2 * hs..]));
        n.mapv_inplace(tanh_scalar);

        (1.0 - &z) * &n + &z * h
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }
}

pub struct LstmCell {
    w_ih: Array2<f32>,
    w_hh: Array2<f32>,
    b_ih: Array1<f32>,
    b_hh: Array1<f32>,
    input_size: usize,
    hidden_size: usize,
}

impl LstmCell {
    pub fn new(
        w_ih: Array2<f32>,
        w_hh: Array2<f32>,
        b_ih: Array1<f32>,
        b_hh: Array1<f32>,
    ) -> Result<Self> {
        let hidden_size = w_hh.ncols();
        let input_size = w_ih.ncols();
        ensure!(
            w_ih.nrows() == 4 * hidden_size
                && w_hh.nrows() == 4 * hidden_size
                && b_ih.len() == 4 * hidden_size
                && b_hh.len() == 4 * hidden_size,
            "LSTM gate weights must stack 4 * hidden_size rows"
        );
        Ok(Self {
            w_ih,
            w_hh,
            b_ih,
            b_hh,
            input_size,
            hidden_size,
        })
    }

    pub fn random<R: Rng>(input_size: usize, hidden_size: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (hidden_size as f32).sqrt();
        let dist = Uniform::new(-bound, bound);
        Self {
            w_ih: Array2::random_using((4 * hidden_size, input_size), dist, rng),
            w_hh: Array2::random_using((4 * hidden_size, hidden_size), dist, rng),
            b_ih: Array1::random_using(4 * hidden_size, dist, rng),
            b_hh: Array1::random_using(4 * hidden_size, dist, rng),
            input_size,
            hidden_size,
        }
    }

    /// One transition, returning `(h', c')`.
    pub fn step(
        &self,
        input: &Array2<f32>,
        h: &Array2<f32>,
        c: &Array2<f32>,
    ) -> (Array2<f32>, Array2<f32>) {
        let hs = self.hidden_size;

        let gi = input.dot(&self.w_ih.t()) + &self.b_ih;
        let gh = h.dot(&self.w_hh.t()) + &self.b_hh;
        let gates = gi + gh;

        let mut i = gates.slice(s![.., ..hs]).to_owned();
        i.mapv_inplace(sigmoid_scalar);
        let mut f = gates.slice(s![.., hs..2 * hs]).to_owned();
        f.mapv_inplace(sigmoid_scalar);
        let mut g = gates.slice(s![.., 2 * hs..3 * hs]).to_owned();
        g.mapv_inplace(tanh_scalar);
        let mut o = gates.slice(s![.., 3 * hs..]).to_owned();
        o.mapv_inplace(sigmoid_scalar);

        let c_next = &f * c + &i * &g;
        let mut h_next = c_next.clone();
        h_next.mapv_inplace(tanh_scalar);
        h_next *= &o;

        (h_next, c_next)
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }
}
