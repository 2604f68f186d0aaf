use crate::contract::VolInput;
use crate::engine::{clamp01, Overrides, PricingEngine, RequestContext};
use crate::errors::PricingResult;
use crate::market::{SoughtPoint, VolatilitySurface};
use crate::trace::DebugTrace;

/// Quoted 25-delta butterflies above this are treated as mis-quotes.
const BUTTERFLY_CUTOFF: f64 = 0.01;

/// Worst-case exposure from a butterfly mis-quote, in probability points.
const BUTTERFLY_MARKUP_CAP: f64 = 0.1;

const TENOR_TOLERANCE: f64 = 1e-9;

impl PricingEngine {
    /// Reprices against a surface whose overnight 25/75-delta points are pulled back to the
    /// cutoff butterfly. Returns None when the markup does not apply.
    pub(crate) fn butterfly_markup(
        &self,
        ctx: &RequestContext<'_>,
        theo: Option<f64>,
    ) -> PricingResult<Option<(f64, DebugTrace)>> {
        let surface = self.surface.as_ref();
        let overnight = surface.overnight_tenor();
        if ctx.vol_days > overnight {
            return Ok(None);
        }
        let raw = surface.raw_surface();
        let Some(first) = raw.first() else {
            return Ok(None);
        };
        if (first.days - overnight).abs() > TENOR_TOLERANCE {
            return Ok(None);
        }

        let quotes = surface.get_market_rr_bf(first.days)?;
        if quotes.bf_25 <= BUTTERFLY_CUTOFF {
            return Ok(None);
        }

        let mut smile = first.smile.clone();
        let c25 = smile.get(&25).copied().unwrap_or(quotes.atm);
        smile.insert(25, BUTTERFLY_CUTOFF + quotes.atm + 0.5 * quotes.rr_25);
        smile.insert(75, c25 - quotes.rr_25);
        let modified = surface.with_smile(first.days, smile);

        let mut scratch = DebugTrace::new();
        let original_theo = match theo {
            Some(theo) => theo,
            None => clamp01(self.calculate_probability(
                ctx,
                surface,
                &Overrides::default(),
                &mut scratch,
            )?),
        };

        let overrides = Overrides {
            vol: Some(self.modified_vol(ctx, modified.as_ref())?),
            ..Overrides::default()
        };
        let modified_theo = clamp01(self.calculate_probability(
            ctx,
            modified.as_ref(),
            &overrides,
            &mut scratch,
        )?);

        let markup = (original_theo - modified_theo)
            .abs()
            .min(BUTTERFLY_MARKUP_CAP);
        let parameters = DebugTrace::new()
            .with("original_theo_probability", original_theo)
            .with("modified_theo_probability", modified_theo)
            .with("atm", quotes.atm)
            .with("rr_25", quotes.rr_25)
            .with("bf_25", quotes.bf_25)
            .with("tenor", first.days);

        tracing::debug!(
            symbol = %ctx.request.underlying_symbol,
            bf_25 = quotes.bf_25,
            markup,
            "butterfly markup"
        );
        Ok(Some((markup, parameters)))
    }

    /// Vol at the contract's strike(s) on the modified surface.
    fn modified_vol(
        &self,
        ctx: &RequestContext<'_>,
        modified: &dyn VolatilitySurface,
    ) -> PricingResult<VolInput> {
        let (low, high) = ctx.request.barriers();
        let at = |strike: f64| modified.get_volatility(&ctx.vol_query(SoughtPoint::Strike(strike)));
        if ctx.derived.two_barriers {
            Ok(VolInput::Barriers {
                high_barrier_vol: at(high)?,
                low_barrier_vol: at(low)?,
            })
        } else {
            Ok(VolInput::Single(at(high)?))
        }
    }
}
