use crate::contract::{ContractType, Leg, PricedWith, Strikes, VolInput};
use crate::engine::{PricingEngine, RequestContext};
use crate::errors::{PricingError, PricingResult};
use crate::market::{SoughtPoint, VolatilitySurface};
use crate::models::FormulaInputs;
use crate::trace::DebugTrace;
use smallvec::smallvec;

/// Per-leg substitutions for a recursive pricing call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub contract_type: Option<ContractType>,
    pub strikes: Option<Strikes>,
    pub vol: Option<VolInput>,
}

impl Overrides {
    fn leg(leg: Leg, strike: f64, vol: Option<VolInput>) -> Self {
        Self {
            contract_type: Some(leg.contract_type()),
            strikes: Some(smallvec![strike]),
            vol,
        }
    }
}

impl PricingEngine {
    /// Theoretical probability of `ctx.request` with `overrides` applied.
    ///
    /// Leg amounts are not clamped here: two-barrier subtraction needs the raw values.
    pub fn calculate_probability(
        &self,
        ctx: &RequestContext<'_>,
        surface: &dyn VolatilitySurface,
        overrides: &Overrides,
        trace: &mut DebugTrace,
    ) -> PricingResult<f64> {
        let request = ctx.request;
        let contract_type = overrides
            .contract_type
            .as_ref()
            .unwrap_or(&request.contract_type);
        let strikes = overrides.strikes.as_ref().unwrap_or(&request.strikes);
        let vol = overrides.vol.or(request.vol);

        match contract_type {
            ContractType::ExpiryMiss => {
                self.two_barrier_probability(ctx, surface, strikes, vol, trace)
            }
            ContractType::ExpiryRange => {
                let discounted =
                    (-request.discount_rate * ctx.derived.time_in_years).exp();
                trace.value("discounted_probability", discounted);
                let miss = self.two_barrier_probability(ctx, surface, strikes, vol, trace)?;
                Ok(discounted - miss)
            }
            ContractType::Call => self.single_barrier(ctx, surface, Leg::Call, strikes, vol, trace),
            ContractType::Put => self.single_barrier(ctx, surface, Leg::Put, strikes, vol, trace),
            ContractType::Unsupported(code) => {
                Err(PricingError::UnsupportedContractType(code.clone()))
            }
        }
    }

    /// CALL at the high barrier plus PUT at the low barrier.
    fn two_barrier_probability(
        &self,
        ctx: &RequestContext<'_>,
        surface: &dyn VolatilitySurface,
        strikes: &Strikes,
        vol: Option<VolInput>,
        trace: &mut DebugTrace,
    ) -> PricingResult<f64> {
        let (low, high) = match strikes.as_slice() {
            [a, b] if a <= b => (*a, *b),
            [a, b] => (*b, *a),
            other => {
                return Err(PricingError::BarrierCountMismatch(format!(
                    "two-barrier contract needs 2 strikes, got {}",
                    other.len()
                )))
            }
        };

        let mut total = 0.0;
        for (leg, strike) in [(Leg::Call, high), (Leg::Put, low)] {
            let leg_vol = vol.map(|v| VolInput::Single(v.for_leg(leg)));
            total += self.calculate_probability(
                ctx,
                surface,
                &Overrides::leg(leg, strike, leg_vol),
                trace,
            )?;
        }
        Ok(total)
    }

    fn single_barrier(
        &self,
        ctx: &RequestContext<'_>,
        surface: &dyn VolatilitySurface,
        leg: Leg,
        strikes: &Strikes,
        vol: Option<VolInput>,
        trace: &mut DebugTrace,
    ) -> PricingResult<f64> {
        let request = ctx.request;
        let strike = match strikes.as_slice() {
            [strike] => *strike,
            other => {
                return Err(PricingError::BarrierCountMismatch(format!(
                    "{leg} needs 1 strike, got {}",
                    other.len()
                )))
            }
        };
        let vol = match vol {
            Some(v) => v.for_leg(leg),
            None => surface.get_volatility(&ctx.vol_query(SoughtPoint::Strike(strike)))?,
        };

        let numeraire = FormulaInputs {
            spot: request.spot,
            strike,
            t: ctx.derived.time_in_years,
            discount_rate: request.discount_rate,
            mu: request.mu,
            vol,
            payout_at_hit: request.payouttime_code,
        };
        let quanto_mu = request.r_rate - request.q_rate;

        let mut leg_trace = DebugTrace::new();
        let probability = match &request.priced_with {
            PricedWith::Numeraire => {
                self.price_single_leg(ctx, surface, leg, &numeraire, &mut leg_trace)?
            }
            PricedWith::Quanto => {
                let inputs = FormulaInputs {
                    mu: quanto_mu,
                    ..numeraire
                };
                self.price_single_leg(ctx, surface, leg, &inputs, &mut leg_trace)?
            }
            PricedWith::Base => {
                // Change of numeraire: price in the other currency, then convert.
                let inputs = FormulaInputs {
                    mu: quanto_mu,
                    discount_rate: request.r_rate,
                    ..numeraire
                };
                let numeraire_prob =
                    self.price_single_leg(ctx, surface, leg, &inputs, &mut leg_trace)?;
                let vanilla = self.formulas.vanilla_price(leg, &inputs);
                leg_trace
                    .value("numeraire_probability", numeraire_prob)
                    .amount("base_vanilla_probability", vanilla, inputs.trace())
                    .value("spot", request.spot)
                    .value("strike", strike);
                (numeraire_prob * strike + vanilla * leg.sign()) / request.spot
            }
            PricedWith::Unrecognized(code) => {
                return Err(PricingError::UnrecognizedPricedWith(code.clone()))
            }
        };

        tracing::debug!(
            leg = %leg,
            strike,
            vol,
            priced_with = %request.priced_with,
            probability,
            "leg priced"
        );
        leg_trace.value("probability", probability);
        trace.branch(leg.code(), leg_trace);
        Ok(probability)
    }
}
