//! Optimisation
//!
//! - `MomentumSgd`: SGD with classical momentum and global gradient-norm clipping,
//!   plugged into candle through the `Optimizer` trait
//! - `FactorScheduler`: step decay of the learning rate with a floor

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use candle_nn::Optimizer;

#[derive(Clone, Debug, PartialEq)]
pub struct ParamsMomentumSgd {
    pub lr: f64,
    pub momentum: f64,
    /// Global L2 threshold; clipping is off when this is not positive
    pub max_grad_norm: f64,
}

impl Default for ParamsMomentumSgd {
    fn default() -> Self {
        Self {
            lr: 0.05,
            momentum: 0.9,
            max_grad_norm: 50.0,
        }
    }
}

pub struct MomentumSgd {
    vars: Vec<Var>,
    velocity: Vec<Tensor>,
    params: ParamsMomentumSgd,
    last_grad_norm: Option<f64>,
}

impl MomentumSgd {
    pub fn params(&self) -> &ParamsMomentumSgd {
        &self.params
    }

    /// Global gradient norm observed by the latest step, before clipping
    pub fn last_grad_norm(&self) -> Option<f64> {
        self.last_grad_norm
    }
}

impl Optimizer for MomentumSgd {
    type Config = ParamsMomentumSgd;

    fn new(vars: Vec<Var>, params: ParamsMomentumSgd) -> candle_core::Result<Self> {
        let vars: Vec<Var> = vars.into_iter().filter(|v| v.dtype().is_float()).collect();
        let velocity = vars
            .iter()
            .map(|v| v.as_tensor().zeros_like())
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self {
            vars,
            velocity,
            params,
            last_grad_norm: None,
        })
    }

    fn step(&mut self, grads: &GradStore) -> candle_core::Result<()> {
        let norm = global_grad_norm(&self.vars, grads)?;
        self.last_grad_norm = Some(norm);
        let scale = clip_scale(norm, self.params.max_grad_norm);

        for (var, velocity) in self.vars.iter().zip(self.velocity.iter_mut()) {
            let Some(grad) = grads.get(var.as_tensor()) else {
                continue;
            };
            // v <- mu * v - lr * scale * g ; theta <- theta + v
            let next = velocity
                .affine(self.params.momentum, 0.0)?
                .sub(&grad.affine(self.params.lr * scale, 0.0)?)?;
            var.set(&var.as_tensor().add(&next)?)?;
            *velocity = next;
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.params.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.params.lr = lr;
    }
}

/// L2 norm of all gradients taken together
pub fn global_grad_norm(vars: &[Var], grads: &GradStore) -> candle_core::Result<f64> {
    let mut total = 0.0f64;
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            let sq = grad
                .sqr()?
                .sum_all()?
                .to_dtype(candle_core::DType::F64)?
                .to_scalar::<f64>()?;
            total += sq;
        }
    }
    Ok(total.sqrt())
}

/// Factor that brings `norm` down to `max_norm`; 1.0 when already within bounds
pub fn clip_scale(norm: f64, max_norm: f64) -> f64 {
    if max_norm > 0.0 && norm.is_finite() && norm > max_norm {
        max_norm / norm
    } else {
        1.0
    }
}

/// Multiplies the learning rate by `factor` every `step` updates, never going
/// below `stop_factor_lr`.
#[derive(Clone, Debug, PartialEq)]
pub struct FactorScheduler {
    step: usize,
    factor: f64,
    stop_factor_lr: f64,
    base_lr: f64,
    count: usize,
}

impl FactorScheduler {
    pub fn new(base_lr: f64, step: usize, factor: f64, stop_factor_lr: f64) -> Self {
        Self {
            step: step.max(1),
            factor,
            stop_factor_lr,
            base_lr,
            count: 0,
        }
    }

    /// Learning rate to use for update number `num_update` (1-based).
    pub fn lr_at(&mut self, num_update: usize) -> f64 {
        while num_update > self.count + self.step {
            self.count += self.step;
            self.base_lr *= self.factor;
            if self.base_lr < self.stop_factor_lr {
                self.base_lr = self.stop_factor_lr;
            }
        }
        self.base_lr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn scalar_var(value: f32) -> Var {
        Var::new(&[value], &Device::Cpu).unwrap()
    }

    fn value(var: &Var) -> f32 {
        var.as_tensor().to_vec1::<f32>().unwrap()[0]
    }

    #[test]
    fn test_plain_sgd_step() {
        let w = scalar_var(1.0);
        let mut opt = MomentumSgd::new(
            vec![w.clone()],
            ParamsMomentumSgd {
                lr: 0.1,
                momentum: 0.0,
                max_grad_norm: 0.0,
            },
        )
        .unwrap();
        // d(w^2)/dw = 2w = 2
        let loss = w.as_tensor().sqr().unwrap().sum_all().unwrap();
        opt.backward_step(&loss).unwrap();
        assert!((value(&w) - 0.8).abs() < 1e-6);
        assert!((opt.last_grad_norm().unwrap() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_momentum_accumulates() {
        let w = scalar_var(0.0);
        let mut opt = MomentumSgd::new(
            vec![w.clone()],
            ParamsMomentumSgd {
                lr: 1.0,
                momentum: 0.5,
                max_grad_norm: 0.0,
            },
        )
        .unwrap();
        // loss = -w has constant gradient -1
        for _ in 0..2 {
            let loss = w.as_tensor().neg().unwrap().sum_all().unwrap();
            opt.backward_step(&loss).unwrap();
        }
        // v1 = 1, w = 1; v2 = 0.5 + 1 = 1.5, w = 2.5
        assert!((value(&w) - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_gradient_clipping_limits_update() {
        let w = scalar_var(10.0);
        let mut opt = MomentumSgd::new(
            vec![w.clone()],
            ParamsMomentumSgd {
                lr: 1.0,
                momentum: 0.0,
                max_grad_norm: 1.0,
            },
        )
        .unwrap();
        let loss = w.as_tensor().sqr().unwrap().sum_all().unwrap();
        opt.backward_step(&loss).unwrap();
        // raw gradient 20 is rescaled to norm 1
        assert!((value(&w) - 9.0).abs() < 1e-5);
        assert!((opt.last_grad_norm().unwrap() - 20.0).abs() < 1e-4);
    }

    #[test]
    fn test_clip_scale() {
        assert_eq!(clip_scale(5.0, 10.0), 1.0);
        assert_eq!(clip_scale(20.0, 10.0), 0.5);
        assert_eq!(clip_scale(20.0, 0.0), 1.0);
        assert_eq!(clip_scale(f64::NAN, 10.0), 1.0);
    }

    #[test]
    fn test_factor_scheduler_decays_with_floor() {
        let mut sched = FactorScheduler::new(0.1, 10, 0.5, 0.02);
        assert_eq!(sched.lr_at(1), 0.1);
        assert_eq!(sched.lr_at(10), 0.1);
        assert!((sched.lr_at(11) - 0.05).abs() < 1e-12);
        assert!((sched.lr_at(21) - 0.025).abs() < 1e-12);
        assert!((sched.lr_at(31) - 0.02).abs() < 1e-12);
        assert!((sched.lr_at(1000) - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_set_learning_rate() {
        let mut opt = MomentumSgd::new(vec![], ParamsMomentumSgd::default()).unwrap();
        opt.set_learning_rate(0.01);
        assert_eq!(opt.learning_rate(), 0.01);
    }
}
