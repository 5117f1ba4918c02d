//! Bunch–Kaufman factorization of symmetric indefinite matrices.
//!
//! Matrices are held in upper column-packed storage: element `A[i][j]` with
//! `i <= j` lives at index `i + j*(j+1)/2`. The factorization `A = U·D·Uᵀ`
//! overwrites the packed matrix with `U` and the 1×1 / 2×2 blocks of `D`.
//!
//! Pivot encoding follows the classic packed layout: for a 1×1 block at column
//! `k` the pivot holds the 1-based row interchanged with row `k`; for a 2×2
//! block spanning columns `k-1, k` both entries hold the negated 1-based row
//! interchanged with row `k-1`.

use tracing::debug;

use crate::error::{Error, Result};

/// Pivot-size selection threshold `(1 + sqrt(17)) / 8`.
const ALPHA: f64 = 0.640_388_203_202_208_4;

/// Number of packed elements for an `n × n` symmetric matrix.
pub const fn packed_len(n: usize) -> usize {
    n * (n + 1) / 2
}

/// Packed index of `A[i][j]` for `i <= j`.
#[inline]
pub const fn packed_index(i: usize, j: usize) -> usize {
    i + j * (j + 1) / 2
}

/// Symmetric matrix in upper column-packed storage.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedSymmetricMatrix {
    n: usize,
    data: Vec<f64>,
}

impl PackedSymmetricMatrix {
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            data: vec![0.0; packed_len(n)],
        }
    }

    pub fn from_packed(n: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != packed_len(n) {
            return Err(Error::IncompatibleInputs(format!(
                "packed symmetric matrix of order {n} needs {} elements, got {}",
                packed_len(n),
                data.len()
            )));
        }
        Ok(Self { n, data })
    }

    pub fn order(&self) -> usize {
        self.n
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        let (i, j) = if i <= j { (i, j) } else { (j, i) };
        self.data[packed_index(i, j)]
    }

    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        let (i, j) = if i <= j { (i, j) } else { (j, i) };
        self.data[packed_index(i, j)] = value;
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Matrix-vector product, used to check solutions.
    pub fn multiply(&self, x: &[f64]) -> Vec<f64> {
        (0..self.n)
            .map(|i| (0..self.n).map(|j| self.get(i, j) * x[j]).sum())
            .collect()
    }
}

/// A completed `U·D·Uᵀ` factorization.
#[derive(Debug, Clone)]
pub struct BunchKaufman {
    n: usize,
    ap: Vec<f64>,
    pivots: Vec<isize>,
    status: usize,
}

impl BunchKaufman {
    /// Factorize `matrix` in place. Never fails; inspect [`status`](Self::status)
    /// or call [`ensure_nonsingular`](Self::ensure_nonsingular).
    pub fn factorize(matrix: PackedSymmetricMatrix) -> Self {
        let n = matrix.n;
        let mut ap = matrix.data;
        let (pivots, status) = factorize_packed(&mut ap, n);
        if status != 0 {
            debug!("Bunch-Kaufman: singular pivot block at column {status} of {n}");
        }
        Self {
            n,
            ap,
            pivots,
            status,
        }
    }

    /// Zero on success, otherwise the 1-based index of the first zero pivot block.
    pub fn status(&self) -> usize {
        self.status
    }

    pub fn is_singular(&self) -> bool {
        self.status != 0
    }

    pub fn ensure_nonsingular(&self) -> Result<()> {
        if self.is_singular() {
            Err(Error::SplineSingularMatrix { pivot: self.status })
        } else {
            Ok(())
        }
    }

    pub fn pivots(&self) -> &[isize] {
        &self.pivots
    }

    /// Solve `A·x = b`, overwriting `b` with `x`.
    pub fn solve(&self, b: &mut [f64]) -> Result<()> {
        self.ensure_nonsingular()?;
        if b.len() != self.n {
            return Err(Error::IncompatibleInputs(format!(
                "right-hand side has {} elements for a system of order {}",
                b.len(),
                self.n
            )));
        }
        solve_packed(&self.ap, self.n, &self.pivots, b);
        Ok(())
    }
}

/// 1-based accessor helpers keep the index arithmetic identical to the
/// textbook formulation of the packed algorithm.
#[inline]
fn at(ap: &[f64], k: usize) -> f64 {
    ap[k - 1]
}

#[inline]
fn at_mut(ap: &mut [f64], k: usize) -> &mut f64 {
    &mut ap[k - 1]
}

/// 1-based index of the largest absolute value in `ap[start..start+len]`.
fn index_of_max_abs(ap: &[f64], start: usize, len: usize) -> usize {
    let mut best = 1;
    let mut best_value = -1.0;
    for i in 0..len {
        let v = at(ap, start + i).abs();
        if v > best_value {
            best_value = v;
            best = i + 1;
        }
    }
    best
}

fn swap_packed(ap: &mut [f64], a: usize, b: usize) {
    ap.swap(a - 1, b - 1);
}

/// In-place `U·D·Uᵀ` factorization of an upper packed matrix.
/// Returns the pivot vector and the status code.
pub fn factorize_packed(ap: &mut [f64], n: usize) -> (Vec<isize>, usize) {
    let mut pivots = vec![0isize; n];
    let mut info = 0usize;

    let mut k = n;
    let mut kc = if n > 0 { (n - 1) * n / 2 + 1 } else { 1 };

    while k >= 1 {
        let mut knc = kc;
        let mut kstep = 1;
        let kp;
        let mut kpc = 0usize;

        let absakk = at(ap, kc + k - 1).abs();
        let (imax, colmax) = if k > 1 {
            let imax = index_of_max_abs(ap, kc, k - 1);
            (imax, at(ap, kc + imax - 1).abs())
        } else {
            (0, 0.0)
        };

        if absakk.max(colmax) == 0.0 {
            if info == 0 {
                info = k;
            }
            kp = k;
        } else {
            if absakk >= ALPHA * colmax {
                kp = k;
            } else {
                let mut rowmax = 0.0f64;
                let mut kx = imax * (imax + 1) / 2 + imax;
                for j in imax + 1..=k {
                    let v = at(ap, kx).abs();
                    if v > rowmax {
                        rowmax = v;
                    }
                    kx += j;
                }
                kpc = (imax - 1) * imax / 2 + 1;
                if imax > 1 {
                    let jmax = index_of_max_abs(ap, kpc, imax - 1);
                    rowmax = rowmax.max(at(ap, kpc + jmax - 1).abs());
                }

                if absakk >= ALPHA * colmax * (colmax / rowmax) {
                    kp = k;
                } else if at(ap, kpc + imax - 1).abs() >= ALPHA * rowmax {
                    kp = imax;
                } else {
                    kp = imax;
                    kstep = 2;
                }
            }

            let kk = k + 1 - kstep;
            if kstep == 2 {
                knc = knc + 1 - k;
            }

            if kp != kk {
                // Interchange rows and columns kk and kp of the leading submatrix.
                for i in 0..kp - 1 {
                    swap_packed(ap, knc + i, kpc + i);
                }
                let mut kx = kpc + kp - 1;
                for j in kp + 1..kk {
                    kx += j - 1;
                    swap_packed(ap, knc + j - 1, kx);
                }
                swap_packed(ap, knc + kk - 1, kpc + kp - 1);
                if kstep == 2 {
                    swap_packed(ap, kc + k - 2, kc + kp - 1);
                }
            }

            if kstep == 1 {
                // Rank-1 update of the leading (k-1)×(k-1) block.
                let r1 = 1.0 / at(ap, kc + k - 1);
                let column: Vec<f64> = ap[kc - 1..kc - 1 + (k - 1)].to_vec();
                let mut kk_pos = 1;
                for (j, &xj) in column.iter().enumerate() {
                    if xj != 0.0 {
                        let temp = -r1 * xj;
                        for (i, &xi) in column.iter().enumerate().take(j + 1) {
                            *at_mut(ap, kk_pos + i) += xi * temp;
                        }
                    }
                    kk_pos += j + 1;
                }
                for i in 0..k - 1 {
                    *at_mut(ap, kc + i) *= r1;
                }
            } else if k > 2 {
                // Rank-2 update of the leading (k-2)×(k-2) block.
                let col_k = (k - 1) * k / 2;
                let col_km1 = (k - 2) * (k - 1) / 2;
                let mut d12 = at(ap, k - 1 + col_k);
                let d22 = at(ap, k - 1 + col_km1) / d12;
                let d11 = at(ap, k + col_k) / d12;
                let t = 1.0 / (d11 * d22 - 1.0);
                d12 = t / d12;

                for j in (1..=k - 2).rev() {
                    let wkm1 = d12 * (d11 * at(ap, j + col_km1) - at(ap, j + col_k));
                    let wk = d12 * (d22 * at(ap, j + col_k) - at(ap, j + col_km1));
                    let col_j = (j - 1) * j / 2;
                    for i in (1..=j).rev() {
                        let update = at(ap, i + col_k) * wk + at(ap, i + col_km1) * wkm1;
                        *at_mut(ap, i + col_j) -= update;
                    }
                    *at_mut(ap, j + col_k) = wk;
                    *at_mut(ap, j + col_km1) = wkm1;
                }
            }
        }

        if kstep == 1 {
            pivots[k - 1] = kp as isize;
        } else {
            pivots[k - 1] = -(kp as isize);
            pivots[k - 2] = -(kp as isize);
        }

        k -= kstep;
        kc = knc.wrapping_sub(k);
    }

    (pivots, info)
}

/// Solve `A·x = b` given the output of [`factorize_packed`]. `b` is overwritten.
pub fn solve_packed(ap: &[f64], n: usize, pivots: &[isize], b: &mut [f64]) {
    // First sweep: solve U·D·y = b, moving from the last column to the first.
    let mut k = n;
    let mut kc = n * (n + 1) / 2 + 1;
    while k >= 1 {
        kc -= k;
        if pivots[k - 1] > 0 {
            let kp = pivots[k - 1] as usize;
            if kp != k {
                b.swap(k - 1, kp - 1);
            }
            let bk = b[k - 1];
            for i in 0..k - 1 {
                b[i] -= at(ap, kc + i) * bk;
            }
            b[k - 1] /= at(ap, kc + k - 1);
            k -= 1;
        } else {
            let kp = (-pivots[k - 1]) as usize;
            if kp != k - 1 {
                b.swap(k - 2, kp - 1);
            }
            let bk = b[k - 1];
            let bkm1 = b[k - 2];
            let prev = kc - (k - 1);
            for i in 0..k - 2 {
                b[i] -= at(ap, kc + i) * bk + at(ap, prev + i) * bkm1;
            }
            let akm1k = at(ap, kc + k - 2);
            let akm1 = at(ap, kc - 1) / akm1k;
            let ak = at(ap, kc + k - 1) / akm1k;
            let denom = akm1 * ak - 1.0;
            let bkm1 = b[k - 2] / akm1k;
            let bk = b[k - 1] / akm1k;
            b[k - 2] = (ak * bkm1 - bk) / denom;
            b[k - 1] = (akm1 * bk - bkm1) / denom;
            kc = kc + 1 - k;
            k -= 2;
        }
    }

    // Second sweep: solve Uᵀ·x = y, moving from the first column to the last.
    let mut k = 1;
    let mut kc = 1;
    while k <= n {
        if pivots[k - 1] > 0 {
            let dot: f64 = (0..k - 1).map(|i| at(ap, kc + i) * b[i]).sum();
            b[k - 1] -= dot;
            let kp = pivots[k - 1] as usize;
            if kp != k {
                b.swap(k - 1, kp - 1);
            }
            kc += k;
            k += 1;
        } else {
            let dot: f64 = (0..k - 1).map(|i| at(ap, kc + i) * b[i]).sum();
            b[k - 1] -= dot;
            let dot: f64 = (0..k - 1).map(|i| at(ap, kc + k + i) * b[i]).sum();
            b[k] -= dot;
            let kp = (-pivots[k - 1]) as usize;
            if kp != k {
                b.swap(k - 1, kp - 1);
            }
            kc += 2 * k + 1;
            k += 2;
        }
    }
}
