//! Levenberg–Marquardt over a residual closure with a numeric Jacobian.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};

/// Stopping criteria for the nonlinear refinements.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmOptions {
    /// Evaluation budget multiplier (`patience * (params + 1)` evaluations).
    pub max_iters: usize,
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iters: 100,
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 1e-12,
        }
    }
}

/// Residual vector of a parameter vector. `None` marks an invalid point of
/// the parameter space (e.g. a scene point crossing the image plane).
pub(crate) trait Residuals {
    fn residuals(&self, x: &DVector<f64>) -> Option<DVector<f64>>;
}

impl<F> Residuals for F
where
    F: Fn(&DVector<f64>) -> Option<DVector<f64>>,
{
    fn residuals(&self, x: &DVector<f64>) -> Option<DVector<f64>> {
        self(x)
    }
}

/// Central-difference Jacobian.
fn numeric_jacobian<R: Residuals>(r: &R, x: &DVector<f64>, m: usize) -> Option<DMatrix<f64>> {
    let mut jac = DMatrix::zeros(m, x.len());
    let mut probe = x.clone();
    for j in 0..x.len() {
        let h = 1e-6 * x[j].abs().max(1.0);
        probe[j] = x[j] + h;
        let plus = r.residuals(&probe)?;
        probe[j] = x[j] - h;
        let minus = r.residuals(&probe)?;
        probe[j] = x[j];
        jac.set_column(j, &((plus - minus) / (2.0 * h)));
    }
    Some(jac)
}

struct LmWrapper<'a, R: Residuals> {
    residuals: &'a R,
    params: DVector<f64>,
}

impl<R: Residuals> LeastSquaresProblem<f64, Dyn, Dyn> for LmWrapper<'_, R> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        self.residuals.residuals(&self.params)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let m = self.residuals.residuals(&self.params)?.len();
        numeric_jacobian(self.residuals, &self.params, m)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct LmOutcome {
    pub params: DVector<f64>,
    /// Sum of squared residuals at `params`.
    pub cost: f64,
    pub evaluations: usize,
    pub converged: bool,
}

pub(crate) fn minimize<R: Residuals>(r: &R, x0: DVector<f64>, opts: &LmOptions) -> LmOutcome {
    let lm = LevenbergMarquardt::new()
        .with_ftol(opts.ftol)
        .with_xtol(opts.xtol)
        .with_gtol(opts.gtol)
        .with_patience(opts.max_iters.max(1));

    let (wrapper, report) = lm.minimize(LmWrapper {
        residuals: r,
        params: x0,
    });
    let params = wrapper.params();
    let cost = r
        .residuals(&params)
        .map(|v| v.norm_squared())
        .unwrap_or(f64::INFINITY);
    log::debug!(
        "lm: {} evaluations, cost {:.3e}, {:?}",
        report.number_of_evaluations,
        cost,
        report.termination
    );
    LmOutcome {
        params,
        cost,
        evaluations: report.number_of_evaluations,
        converged: report.termination.was_successful(),
    }
}
