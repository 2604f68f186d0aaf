use crate::contract::Leg;
use crate::engine::{PricingEngine, RequestContext};
use crate::errors::{PricingError, PricingResult};
use crate::market::{SoughtPoint, VolatilitySurface, ATM_DELTA};
use crate::models::FormulaInputs;
use crate::trace::DebugTrace;

/// Bound on the slope adjustment when short-dated skew has to be extrapolated.
const SLOPE_ADJUSTMENT_CAP: f64 = 0.03;

/// First tenor (days) beyond which an intraday contract's skew is extrapolated.
const EXTRAPOLATED_TENOR_DAYS: f64 = 7.0;

impl PricingEngine {
    /// Black-Scholes digital plus a first-order vega x skew correction.
    ///
    /// slope_adjustment = -sign(leg) * vanilla_vega(atm vol) * dvol/dK, with dvol/dK read off
    /// the surface by central difference at +/- one pip. The sum is not clamped.
    pub fn price_single_leg(
        &self,
        ctx: &RequestContext<'_>,
        surface: &dyn VolatilitySurface,
        leg: Leg,
        inputs: &FormulaInputs,
        trace: &mut DebugTrace,
    ) -> PricingResult<f64> {
        let bs_probability = self.formulas.digital_price(leg, inputs);
        trace.amount("bs_probability", bs_probability, inputs.trace());

        // Forward-starting contracts are priced without skew.
        if ctx.derived.is_forward_starting {
            trace.value("slope_adjustment", 0.0);
            return Ok(bs_probability);
        }

        let atm_vol = surface.get_volatility(&ctx.vol_query(SoughtPoint::Delta(ATM_DELTA as f64)))?;
        let vega_inputs = FormulaInputs {
            vol: atm_vol,
            ..*inputs
        };
        let vanilla_vega = self.formulas.vanilla_vega(&vega_inputs);

        let pip_size = ctx.instrument.pip_size;
        if !(pip_size > 0.0) {
            return Err(PricingError::MarketData(format!(
                "pip size for {} must be positive, got {pip_size}",
                ctx.request.underlying_symbol
            )));
        }
        let vol_up =
            surface.get_volatility(&ctx.vol_query(SoughtPoint::Strike(inputs.strike + pip_size)))?;
        let vol_down =
            surface.get_volatility(&ctx.vol_query(SoughtPoint::Strike(inputs.strike - pip_size)))?;
        let slope = (vol_up - vol_down) / (2.0 * pip_size);

        let mut slope_adjustment = -leg.sign() * vanilla_vega * slope;
        let extrapolated = surface
            .first_tenor()
            .is_some_and(|first| first > EXTRAPOLATED_TENOR_DAYS);
        if extrapolated && ctx.derived.is_intraday {
            slope_adjustment = slope_adjustment.clamp(-SLOPE_ADJUSTMENT_CAP, SLOPE_ADJUSTMENT_CAP);
        }

        let mut parameters = DebugTrace::new()
            .with("slope", slope)
            .with("vol_up", vol_up)
            .with("vol_down", vol_down)
            .with("pip_size", pip_size);
        parameters.amount("vanilla_vega", vanilla_vega, vega_inputs.trace());
        trace.amount("slope_adjustment", slope_adjustment, parameters);

        tracing::debug!(
            leg = %leg,
            bs_probability,
            vanilla_vega,
            slope,
            slope_adjustment,
            "slope adjusted"
        );
        Ok(bs_probability + slope_adjustment)
    }
}
