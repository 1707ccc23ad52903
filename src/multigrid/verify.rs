//! Consistency checks run after a level has been (re)built.
//!
//! 1. every near-kernel vector lies in the range of `P`: `(1 − P R) v_i = 0`
//! 2. `R P = 1` on the coarse space
//! 3. the coarse operator equals its Galerkin definition `R A P` (plus any twist shift)
//! 4. `A†A` is Hermitian on the prolonged space, and `A_c†` is the adjoint of `A_c`
//!
//! Deviations are relative and compared against the tolerance of the lower of the
//! near-kernel and work precisions.

use crate::context::log_context::LevelContext;
use crate::core::blas;
use crate::core::field::LatticeField;
use crate::error::MgError;
use crate::multigrid::coarse_op::apply_twist_shift;
use crate::multigrid::level::Level;

fn check(
    ctx: &LevelContext,
    level: usize,
    name: &'static str,
    deviation: f64,
    tol: f64,
) -> Result<(), MgError> {
    ctx.verbose(format_args!("{name}: deviation = {deviation:e} (tol {tol:e})"));
    // NaN fails too
    if !(deviation <= tol) {
        return Err(MgError::Verification {
            level,
            check: name,
            deviation,
            tol,
        });
    }
    Ok(())
}

fn relative_difference(a: &LatticeField, b: &LatticeField) -> f64 {
    let mut diff = b.clone();
    let d = blas::xmy_norm(a, &mut diff).sqrt();
    let n = blas::norm2(a).sqrt();
    if n > 0.0 { d / n } else { d }
}

impl Level {
    pub(super) fn verify(&mut self) -> Result<(), MgError> {
        let (Some(transfer), Some(coarse)) = (self.transfer.as_ref(), self.coarse.as_deref())
        else {
            return Err(MgError::config(format!(
                "{}nothing to verify before the coarse level exists",
                self.ctx.prefix()
            )));
        };
        let lo = &self.opts.levels[self.level];
        let tol = lo.precision_null.min(self.r.precision()).tolerance();
        let ctx = &self.ctx;
        let level = self.level;
        ctx.summarize(format_args!("checking the transfer and coarse operator"));

        let work = self.ops.work_param(self.r.precision());
        let coarse_param = transfer.coarse_param().clone().with_precision(self.r.precision());
        let mut fine = LatticeField::new(work.clone());
        let mut fine2 = LatticeField::new(work.clone());
        let mut c1 = LatticeField::new(coarse_param.clone());
        let mut c2 = LatticeField::new(coarse_param.clone());

        // 1. (1 - P R) v_i
        for (i, v) in self.b.iter().take(transfer.n_vec()).enumerate() {
            fine.copy_from(v)?;
            transfer.restrict(&mut c1, &fine)?;
            transfer.prolong(&mut fine2, &c1)?;
            let dev = relative_difference(&fine, &fine2);
            ctx.debug(format_args!("vector {i}: |(1 - P R) v| / |v| = {dev:e}"));
            check(ctx, level, "null vector in range of P", dev, tol)?;
        }

        // 2. (1 - R P) eta
        c1.randomize(&mut self.rng);
        transfer.prolong(&mut fine, &c1)?;
        transfer.restrict(&mut c2, &fine)?;
        check(ctx, level, "R P = 1", relative_difference(&c1, &c2), tol)?;

        // 3. R A P against the native coarse operator
        c1.randomize(&mut self.rng);
        transfer.prolong(&mut fine, &c1)?;
        self.ops.work.apply(&mut fine2, &fine)?;
        transfer.restrict(&mut c2, &fine2)?;
        apply_twist_shift(&mut c2, &c1, self.coarse_shift(), transfer.n_chiral());
        let native_op = &coarse.ops.residual;
        let mut native = LatticeField::new(native_op.param().clone());
        let mut v = LatticeField::new(native_op.param().clone());
        v.copy_from(&c1)?;
        native_op.apply(&mut native, &v)?;
        let mut emulated = LatticeField::new(native_op.param().clone());
        emulated.copy_from(&c2)?;
        check(
            ctx,
            level,
            "coarse operator matches R A P",
            relative_difference(&emulated, &native),
            tol,
        )?;

        // 4a. <P eta, A^dag A P eta> is real
        c1.randomize(&mut self.rng);
        transfer.prolong(&mut fine, &c1)?;
        self.ops.work.apply_mdag_m(&mut fine2, &fine)?;
        let dot = blas::cdot(&fine, &fine2);
        let ratio = if dot.re != 0.0 { (dot.im / dot.re).abs() } else { dot.im.abs() };
        check(ctx, level, "A^dag A is Hermitian", ratio, tol)?;

        // 4b. <u, A_c v> = <A_c^dag u, v>
        let mut u = LatticeField::new(native_op.param().clone());
        u.randomize(&mut self.rng);
        v.randomize(&mut self.rng);
        let mut av = LatticeField::new(native_op.param().clone());
        let mut adu = LatticeField::new(native_op.param().clone());
        native_op.apply(&mut av, &v)?;
        native_op.apply_dagger(&mut adu, &u)?;
        let lhs = blas::cdot(&u, &av);
        let rhs = blas::cdot(&adu, &v);
        let scale = (blas::norm2(&u) * blas::norm2(&av)).sqrt();
        let dev = if scale > 0.0 { (lhs - rhs).norm() / scale } else { (lhs - rhs).norm() };
        check(ctx, level, "coarse adjoint", dev, tol)?;

        ctx.summarize(format_args!("verification passed"));
        Ok(())
    }
}
