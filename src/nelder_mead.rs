//! Nelder-Mead simplex search
//!
//! Derivative-free minimization with box bounds. The start point is clamped
//! into the bounds; later candidates outside them rank as +inf and the
//! objective is never evaluated there.
//! Coefficients and defaults follow the common reference setup: reflection 1,
//! expansion 2, contraction 0.5, shrink 0.5, initial step 5% of each
//! coordinate.

use std::cmp::Ordering;

const RHO: f64 = 1.0;
const CHI: f64 = 2.0;
const PSI: f64 = 0.5;
const SIGMA: f64 = 0.5;

/// Search settings
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct NelderMeadConfig {
    /// Simplex size (max coordinate distance to the best vertex) to accept
    pub xatol: f64,

    /// Objective spread across the simplex to accept
    pub fatol: f64,

    /// Iteration cap, `None` = 200 per dimension
    pub max_iterations: Option<usize>,

    /// Evaluation cap, `None` = 200 per dimension
    pub max_evaluations: Option<usize>,

    /// Relative size of the initial simplex
    pub initial_step: f64,

    /// Absolute step used for coordinates that start at zero
    pub zero_step: f64,
}

impl Default for NelderMeadConfig {
    fn default() -> Self {
        Self {
            xatol: 1e-4,
            fatol: 1e-4,
            max_iterations: None,
            max_evaluations: None,
            initial_step: 0.05,
            zero_step: 0.00025,
        }
    }
}

/// Bounds of one coordinate
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Bound {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl Bound {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn at_least(lower: f64) -> Self {
        Self {
            lower: Some(lower),
            upper: None,
        }
    }

    fn contains(&self, x: f64) -> bool {
        self.lower.map_or(true, |lo| x >= lo) && self.upper.map_or(true, |hi| x <= hi)
    }

    fn clamp(&self, x: f64) -> f64 {
        let mut x = x;
        if let Some(lo) = self.lower {
            if x < lo {
                x = lo;
            }
        }
        if let Some(hi) = self.upper {
            if x > hi {
                x = hi;
            }
        }
        x
    }
}

/// Where the search ended
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// Best point found
    pub x: Vec<f64>,

    /// Objective at `x`
    pub value: f64,

    /// True if the tolerance test passed before any cap was hit
    pub converged: bool,

    pub iterations: usize,
    pub evaluations: usize,
}

/// Objective wrapper counting calls
struct Counted<F> {
    f: F,
    count: usize,
}

impl<F> Counted<F> {
    fn call<E>(&mut self, x: &[f64], bounds: &[Bound]) -> Result<f64, E>
    where
        F: FnMut(&[f64]) -> Result<f64, E>,
    {
        let inside = x
            .iter()
            .enumerate()
            .all(|(i, xi)| bounds.get(i).map_or(true, |bound| bound.contains(*xi)));
        if !inside {
            return Ok(f64::INFINITY);
        }

        self.count += 1;
        let fx = (self.f)(x)?;
        // undefined objective values rank worst
        Ok(if fx.is_nan() { f64::INFINITY } else { fx })
    }
}

fn clamp_point(x: &mut [f64], bounds: &[Bound]) {
    for (i, xi) in x.iter_mut().enumerate() {
        if let Some(bound) = bounds.get(i) {
            *xi = bound.clamp(*xi);
        }
    }
}

/// `wa * a + wb * b`
fn combine(a: &[f64], wa: f64, b: &[f64], wb: f64) -> Vec<f64> {
    a.iter().zip(b).map(|(ai, bi)| wa * ai + wb * bi).collect()
}

fn sort_simplex(sim: &mut Vec<Vec<f64>>, fsim: &mut Vec<f64>) {
    let mut order: Vec<usize> = (0..fsim.len()).collect();
    order.sort_by(|&a, &b| fsim[a].partial_cmp(&fsim[b]).unwrap_or(Ordering::Equal));
    *sim = order.iter().map(|&i| sim[i].clone()).collect();
    *fsim = order.iter().map(|&i| fsim[i]).collect();
}

/// Minimize `f` starting at `x0`.
///
/// An error from the objective aborts the search and is returned as is.
/// Hitting a cap is not an error: the result reports `converged = false`.
pub fn minimize<F, E>(
    f: F,
    x0: &[f64],
    bounds: &[Bound],
    config: &NelderMeadConfig,
) -> Result<SearchResult, E>
where
    F: FnMut(&[f64]) -> Result<f64, E>,
{
    let n = x0.len();
    let max_iterations = config.max_iterations.unwrap_or(200 * n.max(1));
    let max_evaluations = config.max_evaluations.unwrap_or(200 * n.max(1));
    let mut objective = Counted { f, count: 0 };

    // initial simplex
    let mut start = x0.to_vec();
    clamp_point(&mut start, bounds);
    let mut sim = vec![start.clone()];
    for k in 0..n {
        let mut y = start.clone();
        let step = if y[k] != 0.0 {
            config.initial_step * y[k]
        } else {
            config.zero_step
        };
        y[k] += step;
        clamp_point(&mut y, bounds);
        if y[k] == start[k] {
            // pinned against a bound, step the other way
            y[k] = start[k] - step;
            clamp_point(&mut y, bounds);
        }
        sim.push(y);
    }

    let mut fsim = Vec::with_capacity(n + 1);
    for vertex in &sim {
        fsim.push(objective.call(vertex, bounds)?);
    }
    sort_simplex(&mut sim, &mut fsim);

    let mut iterations = 0;
    let mut converged = false;

    loop {
        let size = sim[1..]
            .iter()
            .flat_map(|v| v.iter().zip(&sim[0]).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max);
        let spread = fsim[1..]
            .iter()
            .map(|fv| (fv - fsim[0]).abs())
            .fold(0.0, f64::max);
        if size <= config.xatol && spread <= config.fatol {
            converged = true;
            break;
        }
        if iterations >= max_iterations || objective.count >= max_evaluations {
            break;
        }

        // centroid of all but the worst vertex
        let mut xbar = vec![0.0; n];
        for vertex in &sim[..n] {
            for (c, v) in xbar.iter_mut().zip(vertex) {
                *c += v / n as f64;
            }
        }
        let worst = sim[n].clone();

        let xr = combine(&xbar, 1.0 + RHO, &worst, -RHO);
        let fxr = objective.call(&xr, bounds)?;
        let mut shrink = false;

        if fxr < fsim[0] {
            let xe = combine(&xbar, 1.0 + RHO * CHI, &worst, -RHO * CHI);
            let fxe = objective.call(&xe, bounds)?;
            if fxe < fxr {
                sim[n] = xe;
                fsim[n] = fxe;
            } else {
                sim[n] = xr;
                fsim[n] = fxr;
            }
        } else if fxr < fsim[n - 1] {
            sim[n] = xr;
            fsim[n] = fxr;
        } else if fxr < fsim[n] {
            // outside contraction
            let xc = combine(&xbar, 1.0 + PSI * RHO, &worst, -PSI * RHO);
            let fxc = objective.call(&xc, bounds)?;
            if fxc <= fxr {
                sim[n] = xc;
                fsim[n] = fxc;
            } else {
                shrink = true;
            }
        } else {
            // inside contraction
            let xcc = combine(&xbar, 1.0 - PSI, &worst, PSI);
            let fxcc = objective.call(&xcc, bounds)?;
            if fxcc < fsim[n] {
                sim[n] = xcc;
                fsim[n] = fxcc;
            } else {
                shrink = true;
            }
        }

        if shrink {
            let best = sim[0].clone();
            for j in 1..=n {
                sim[j] = combine(&best, 1.0 - SIGMA, &sim[j], SIGMA);
                fsim[j] = objective.call(&sim[j], bounds)?;
            }
        }

        iterations += 1;
        sort_simplex(&mut sim, &mut fsim);
    }

    Ok(SearchResult {
        x: sim[0].clone(),
        value: fsim[0],
        converged,
        iterations,
        evaluations: objective.count,
    })
}
