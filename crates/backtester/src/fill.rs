use configuration::Simulation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

/// One bar in the simulator's working precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// The "virtual exchange" for backtesting: market fills with slippage and a taker fee.
#[derive(Debug, Clone, Copy)]
pub struct FillModel {
    fee_pct: f64,
    slippage_pct: f64,
}

impl FillModel {
    pub fn new(params: &Simulation) -> Self {
        Self { fee_pct: params.taker_fee_pct, slippage_pct: params.slippage_pct }
    }

    /// Taker fee as a fraction of notional, charged on each fill.
    pub fn fee_pct(&self) -> f64 {
        self.fee_pct
    }

    /// Calculates the execution price, modeling for slippage.
    ///
    /// For a simple model, we assume slippage moves the price against us
    /// by a certain percentage of the bar's high-low range.
    pub fn fill_price(&self, side: Side, reference: f64, bar: &Bar) -> f64 {
        let bar_range = bar.high - bar.low;
        if bar_range <= 0.0 {
            return reference; // No range, no slippage possible
        }
        let slippage_amount = bar_range * self.slippage_pct;
        match side {
            // For a buy, slippage makes the price HIGHER (worse).
            Side::Buy => reference + slippage_amount,
            // For a sell, slippage makes the price LOWER (worse), never below zero.
            Side::Sell => (reference - slippage_amount).max(f64::MIN_POSITIVE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn slippage_always_works_against_the_trader() {
        let model = FillModel::new(&Simulation { taker_fee_pct: 0.0004, slippage_pct: 0.1, initial_capital: 1.0 });
        let bar = Bar { open: 100.0, high: 104.0, low: 98.0, close: 102.0 };
        assert_relative_eq!(model.fill_price(Side::Buy, bar.close, &bar), 102.6, epsilon = 1e-9);
        assert_relative_eq!(model.fill_price(Side::Sell, bar.close, &bar), 101.4, epsilon = 1e-9);

        let flat = Bar { open: 5.0, high: 5.0, low: 5.0, close: 5.0 };
        assert_eq!(model.fill_price(Side::Buy, 5.0, &flat), 5.0);
    }
}
